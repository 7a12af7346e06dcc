//! Length‑prefixed framer for MeshCore companion serial frames.
//!
//! Companion frames on the wire are:
//!
//!   `<direction byte><len:u16 little-endian><payload bytes>`
//!
//! where the direction byte is `0x3E` ('>') for radio→host frames and `0x3C`
//! ('<') for host→radio frames. This module provides a small incremental
//! framer that can be fed arbitrary chunks and yields whole frames when
//! available. It attempts simple resynchronization on malformed input by
//! advancing a byte, so stray console noise on the line is never fatal.
use bytes::{Buf, BytesMut};

use super::{Direction, Frame};

/// Header size: direction byte + 2 byte length.
pub const HEADER_LEN: usize = 3;

/// Maximum payload carried by one frame (the length field is a u16).
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Incremental frame accumulator for one byte stream.
///
/// Each serial session and each TCP client owns its own codec; the buffer is
/// cleared on session reset so bytes from a dead session never leak into the
/// next one.
#[derive(Debug, Default)]
pub struct FrameCodec {
    buf: BytesMut,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append received bytes to the accumulator.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Attempt to extract the next complete frame.
    ///
    /// Returns `Some(frame)` when a full frame is buffered, otherwise `None`.
    /// An unknown direction byte at the head of the buffer is dropped and
    /// scanning continues (resync); a zero-length header loses its direction
    /// byte and is re-scanned, so `[dir 00 00]` never emits a frame.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let direction = match Direction::from_byte(self.buf[0]) {
                Some(d) => d,
                None => {
                    self.buf.advance(1);
                    continue;
                }
            };
            let len = u16::from_le_bytes([self.buf[1], self.buf[2]]) as usize;
            if len == 0 {
                // Framing artefact; drop the direction byte and re-scan.
                self.buf.advance(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + len {
                return None;
            }
            self.buf.advance(HEADER_LEN);
            let payload = self.buf.split_to(len).to_vec();
            return Some(Frame { direction, payload });
        }
    }

    /// Number of bytes currently buffered.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Discard all buffered bytes (session reset).
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Encode a frame with direction byte and length prefix.
    pub fn encode(direction: Direction, payload: &[u8]) -> Vec<u8> {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.push(direction.as_byte());
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Encode a host→radio frame.
    pub fn encode_outgoing(payload: &[u8]) -> Vec<u8> {
        Self::encode(Direction::ToRadio, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut codec = FrameCodec::new();
        let payload = b"hello mesh";
        let wire = FrameCodec::encode(Direction::FromRadio, payload);
        assert_eq!(wire[0], 0x3E);
        assert_eq!(wire[1], payload.len() as u8);
        assert_eq!(wire[2], 0);
        codec.push(&wire);
        let frame = codec.next_frame().expect("should decode frame");
        assert_eq!(frame.direction, Direction::FromRadio);
        assert_eq!(frame.payload, payload);
        assert!(codec.next_frame().is_none());
    }

    #[test]
    fn outgoing_uses_to_radio_direction() {
        let wire = FrameCodec::encode_outgoing(&[0x01, 0x02]);
        assert_eq!(wire, vec![0x3C, 0x02, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn partial_frame_waits_for_payload() {
        let mut codec = FrameCodec::new();
        // Header claims 4 payload bytes; only one delivered so far.
        codec.push(&[0x3E, 0x04, 0x00, 0x05]);
        assert!(codec.next_frame().is_none());
        codec.push(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let frame = codec.next_frame().expect("frame after completion");
        assert_eq!(frame.payload, vec![0x05, 0xAA, 0xBB, 0xCC]);
        // The trailing 0xDD stays buffered for the next frame.
        assert_eq!(codec.buffered_len(), 1);
    }

    #[test]
    fn resyncs_past_leading_garbage() {
        let mut codec = FrameCodec::new();
        codec.push(&[0x00, 0x3E, 0x03, 0x00, 0x05, 0xAA, 0xBB]);
        let frame = codec.next_frame().expect("frame after resync");
        assert_eq!(frame.direction, Direction::FromRadio);
        assert_eq!(frame.payload, vec![0x05, 0xAA, 0xBB]);
        assert!(codec.next_frame().is_none());
    }

    #[test]
    fn zero_length_header_is_discarded() {
        let mut codec = FrameCodec::new();
        codec.push(&[0x3E, 0x00, 0x00]);
        assert!(codec.next_frame().is_none());
        // A valid frame after the artefact still parses.
        codec.push(&FrameCodec::encode(Direction::FromRadio, &[0x07]));
        let frame = codec.next_frame().expect("frame after artefact");
        assert_eq!(frame.payload, vec![0x07]);
    }

    #[test]
    fn byte_at_a_time_matches_block_delivery() {
        let wire: Vec<u8> = [
            FrameCodec::encode(Direction::FromRadio, &[0x00, 0x01]),
            FrameCodec::encode(Direction::ToRadio, b"abc"),
        ]
        .concat();

        let mut block = FrameCodec::new();
        block.push(&wire);
        let mut block_frames = Vec::new();
        while let Some(f) = block.next_frame() {
            block_frames.push(f);
        }

        let mut trickle = FrameCodec::new();
        let mut trickle_frames = Vec::new();
        for b in &wire {
            trickle.push(std::slice::from_ref(b));
            while let Some(f) = trickle.next_frame() {
                trickle_frames.push(f);
            }
        }

        assert_eq!(block_frames, trickle_frames);
        assert_eq!(block_frames.len(), 2);
    }

    #[test]
    fn multiple_frames_fifo_order() {
        let mut codec = FrameCodec::new();
        codec.push(&FrameCodec::encode(Direction::FromRadio, &[0x01]));
        codec.push(&FrameCodec::encode(Direction::FromRadio, &[0x02]));
        assert_eq!(codec.next_frame().unwrap().payload, vec![0x01]);
        assert_eq!(codec.next_frame().unwrap().payload, vec![0x02]);
        assert!(codec.next_frame().is_none());
    }
}
