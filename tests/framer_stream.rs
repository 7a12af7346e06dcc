//! Frame codec behavior over arbitrary byte stream chunkings.

use meshbridge::protocol::{Direction, Frame, FrameCodec};

fn decode_all(codec: &mut FrameCodec, bytes: &[u8]) -> Vec<Frame> {
    codec.push(bytes);
    let mut frames = Vec::new();
    while let Some(f) = codec.next_frame() {
        frames.push(f);
    }
    frames
}

#[test]
fn decoding_is_deterministic_over_concatenation() {
    // decode(concat(a, b)) == decode(a) ++ decode(b)
    let a = FrameCodec::encode(Direction::FromRadio, &[0x00, 0x11, 0x22]);
    let b = FrameCodec::encode(Direction::ToRadio, &[0x01]);

    let mut joined = FrameCodec::new();
    let joined_frames = decode_all(&mut joined, &[a.clone(), b.clone()].concat());

    let mut split = FrameCodec::new();
    let mut split_frames = decode_all(&mut split, &a);
    split_frames.extend(decode_all(&mut split, &b));

    assert_eq!(joined_frames, split_frames);
}

#[test]
fn roundtrip_on_assorted_payloads() {
    for payload in [
        vec![0x00],
        vec![0x80],
        (0u8..=255).collect::<Vec<u8>>(),
        vec![0xAA; 300], // length needs both LE bytes
    ] {
        for direction in [Direction::FromRadio, Direction::ToRadio] {
            let mut codec = FrameCodec::new();
            let frames = decode_all(&mut codec, &FrameCodec::encode(direction, &payload));
            assert_eq!(
                frames,
                vec![Frame {
                    direction,
                    payload: payload.clone()
                }]
            );
        }
    }
}

#[test]
fn stray_byte_resync_scenario() {
    // 00 3E 03 00 05 AA BB → one frame {FromRadio, [05 AA BB]}
    let mut codec = FrameCodec::new();
    let frames = decode_all(&mut codec, &[0x00, 0x3E, 0x03, 0x00, 0x05, 0xAA, 0xBB]);
    assert_eq!(
        frames,
        vec![Frame {
            direction: Direction::FromRadio,
            payload: vec![0x05, 0xAA, 0xBB]
        }]
    );
}

#[test]
fn split_delivery_honors_length() {
    let mut codec = FrameCodec::new();
    assert!(decode_all(&mut codec, &[0x3E, 0x04, 0x00, 0x05]).is_empty());
    let frames = decode_all(&mut codec, &[0xAA, 0xBB, 0xCC, 0xDD]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, vec![0x05, 0xAA, 0xBB, 0xCC]);
}

#[test]
fn noise_between_frames_is_skipped() {
    let mut codec = FrameCodec::new();
    let mut stream = Vec::new();
    stream.extend_from_slice(b"garbage console output\r\n");
    stream.extend_from_slice(&FrameCodec::encode(Direction::FromRadio, &[0x80, 0x01]));
    stream.extend_from_slice(&[0xFF, 0x00]);
    stream.extend_from_slice(&FrameCodec::encode(Direction::FromRadio, &[0x06]));
    let frames = decode_all(&mut codec, &stream);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].payload, vec![0x80, 0x01]);
    assert_eq!(frames[1].payload, vec![0x06]);
}

#[test]
fn clear_discards_partial_frame() {
    let mut codec = FrameCodec::new();
    codec.push(&[0x3E, 0x10, 0x00, 0x01, 0x02]);
    assert!(codec.next_frame().is_none());
    codec.clear();
    assert_eq!(codec.buffered_len(), 0);
    // A fresh session parses cleanly after the reset.
    let frames = decode_all(&mut codec, &FrameCodec::encode(Direction::FromRadio, &[0x09]));
    assert_eq!(frames.len(), 1);
}
