//! Push-replay buffer: capacity bound, persistence round-trip, and the
//! fan-out-then-replay ordering a fresh WebSocket client observes.

use meshbridge::bridge::clients::{ClientKind, ClientRegistry, ReplayPhase};
use meshbridge::bridge::replay::PushBuffer;
use meshbridge::protocol::{Direction, FrameCodec};
use tempfile::tempdir;
use tokio::sync::mpsc;

fn push_frame(code: u8, seq: u8) -> Vec<u8> {
    FrameCodec::encode(Direction::FromRadio, &[code, seq])
}

#[test]
fn buffer_never_exceeds_capacity() {
    let dir = tempdir().unwrap();
    let mut buf = PushBuffer::load(4, dir.path().join("push.json"));
    for seq in 0..100u8 {
        buf.record(push_frame(0x80, seq));
        assert!(buf.len() <= 4, "capacity must bound the buffer");
    }
    let sequences: Vec<u8> = buf.entries().map(|e| e.frame[4]).collect();
    assert_eq!(sequences, vec![96, 97, 98, 99], "oldest entries evicted");
}

#[test]
fn persisted_buffer_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("push.json");

    let mut buf = PushBuffer::load(100, &path);
    for seq in 0..5u8 {
        buf.record(push_frame(0x80 + seq, seq));
    }
    buf.flush().expect("flush to disk");

    // Simulated restart: a fresh buffer loads the same entries in order.
    let reloaded = PushBuffer::load(100, &path);
    assert_eq!(reloaded.len(), 5);
    let original: Vec<_> = buf.entries().cloned().collect();
    let restored: Vec<_> = reloaded.entries().cloned().collect();
    assert_eq!(original, restored);
}

#[test]
fn corrupt_persistence_recovers_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("push.json");
    std::fs::write(&path, b"\0\0[{\"frame\": truncated").unwrap();
    let buf = PushBuffer::load(100, &path);
    assert!(buf.is_empty());
}

/// Scenario: pushes arrive while no one watches; a client connects, sends
/// its first command, and after the settle delay sees every previously-
/// buffered push in wire order followed by the live stream. Pushes landing
/// during the settle window are withheld from the client and arrive via the
/// replay instead, so its stream never runs out of wire order.
#[tokio::test]
async fn replay_then_live_stream_ordering() {
    let dir = tempdir().unwrap();
    let mut buf = PushBuffer::load(100, dir.path().join("push.json"));
    let mut registry = ClientRegistry::new();

    // Three pushes recorded before the client appears.
    for seq in 0..3u8 {
        buf.record(push_frame(0x80, seq));
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.insert(1, ClientKind::WebSocket, tx);
    assert_eq!(registry.get(1).unwrap().replay, ReplayPhase::Pending);

    // A push lands during the settle window: buffered, not delivered live.
    let windowed = push_frame(0x81, 3);
    buf.record(windowed.clone());
    registry.broadcast_push(&windowed);
    assert!(rx.try_recv().is_err(), "delivery deferred until replay");

    // Replay fires: the full buffer in insertion order...
    let frames: Vec<Vec<u8>> = buf.entries().map(|e| e.frame.clone()).collect();
    for frame in frames {
        registry.unicast(1, frame);
    }
    registry.get_mut(1).unwrap().replay = ReplayPhase::Done;

    // ...followed by the live stream.
    let live = push_frame(0x82, 9);
    buf.record(live.clone());
    registry.broadcast_push(&live);

    let mut seen = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        seen.push(frame);
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[0][4], 0);
    assert_eq!(seen[1][4], 1);
    assert_eq!(seen[2][4], 2);
    assert_eq!(seen[3], windowed);
    assert_eq!(seen[4], live);
}

/// Push frames fan out to every caught-up client exactly once; a response
/// frame reaches only the originator.
#[tokio::test]
async fn push_broadcast_response_unicast() {
    let mut registry = ClientRegistry::new();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    registry.insert(1, ClientKind::WebSocket, tx_a);
    registry.insert(2, ClientKind::Tcp, tx_b);
    registry.get_mut(1).unwrap().replay = ReplayPhase::Done;

    let push = push_frame(0x80, 7);
    registry.broadcast_push(&push);

    let response = FrameCodec::encode(Direction::FromRadio, &[0x00]);
    registry.unicast(1, response.clone());

    assert_eq!(rx_a.try_recv().unwrap(), push);
    assert_eq!(rx_a.try_recv().unwrap(), response);
    assert!(rx_a.try_recv().is_err());

    assert_eq!(rx_b.try_recv().unwrap(), push);
    assert!(rx_b.try_recv().is_err(), "response must not reach client 2");
}
