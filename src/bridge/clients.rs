//! Client registry and fan-out.
//!
//! A client is anything holding a socket to the bridge: a browser over the
//! WebSocket endpoint or a daemon over the raw TCP endpoint. Each client's
//! write half is an unbounded byte-sink channel drained by its own writer
//! task, so a slow or dead client can never stall the radio path. The
//! registry is mutated only on the bridge loop (accept, disconnect, dead
//! sink discovered during a write), which keeps iteration race-free.

use std::collections::HashMap;

use log::{debug, warn};
use tokio::sync::mpsc;

/// Identity of a connected client, unique for the process lifetime.
pub type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    WebSocket,
    Tcp,
}

impl ClientKind {
    pub fn label(self) -> &'static str {
        match self {
            ClientKind::WebSocket => "ws",
            ClientKind::Tcp => "tcp",
        }
    }
}

/// Replay progress for a WebSocket client. TCP clients are always-on
/// daemons that follow the live stream and are never replayed.
///
/// Until a WS client reaches `Done`, live push frames are withheld from it:
/// every push is recorded in the replay buffer first, so the replay itself
/// delivers the withheld frames in wire order and the client never sees a
/// buffered frame after a newer live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPhase {
    /// No command seen from this client yet.
    Pending,
    /// First command seen; replay fires after the settle delay.
    Scheduled,
    /// Replayed (or not applicable) — never replay again this connection.
    Done,
}

#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    pub kind: ClientKind,
    pub replay: ReplayPhase,
    sink: mpsc::UnboundedSender<Vec<u8>>,
}

impl ClientHandle {
    /// Queue bytes for this client. `false` means the writer task is gone
    /// and the client should be dropped from the registry.
    pub fn send(&self, bytes: Vec<u8>) -> bool {
        self.sink.send(bytes).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientHandle>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ClientId, kind: ClientKind, sink: mpsc::UnboundedSender<Vec<u8>>) {
        let replay = match kind {
            ClientKind::WebSocket => ReplayPhase::Pending,
            ClientKind::Tcp => ReplayPhase::Done,
        };
        self.clients.insert(
            id,
            ClientHandle {
                id,
                kind,
                replay,
                sink,
            },
        );
    }

    pub fn remove(&mut self, id: ClientId) -> Option<ClientHandle> {
        self.clients.remove(&id)
    }

    pub fn get(&self, id: ClientId) -> Option<&ClientHandle> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut ClientHandle> {
        self.clients.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn count_kind(&self, kind: ClientKind) -> usize {
        self.clients.values().filter(|c| c.kind == kind).count()
    }

    /// Deliver bytes to every connected client. Clients whose writer task
    /// has died are removed; delivery to the rest is unaffected.
    pub fn broadcast(&mut self, bytes: &[u8]) {
        let dead: Vec<ClientId> = self
            .clients
            .values()
            .filter(|c| !c.send(bytes.to_vec()))
            .map(|c| c.id)
            .collect();
        for id in dead {
            warn!("Dropping unresponsive client #{id}");
            self.clients.remove(&id);
        }
    }

    /// Deliver a push frame to every caught-up client: TCP clients and WS
    /// clients whose replay has completed. A WS client still awaiting its
    /// replay receives this frame from the buffer when the replay fires,
    /// which preserves wire order for that client.
    pub fn broadcast_push(&mut self, bytes: &[u8]) {
        let dead: Vec<ClientId> = self
            .clients
            .values()
            .filter(|c| c.replay == ReplayPhase::Done && !c.send(bytes.to_vec()))
            .map(|c| c.id)
            .collect();
        for id in dead {
            warn!("Dropping unresponsive client #{id}");
            self.clients.remove(&id);
        }
    }

    /// Deliver bytes to one client. A missing or dead client is logged and
    /// removed; the failure never propagates to the radio side.
    pub fn unicast(&mut self, id: ClientId, bytes: Vec<u8>) {
        match self.clients.get(&id) {
            Some(client) => {
                if !client.send(bytes) {
                    warn!("Dropping unresponsive client #{id}");
                    self.clients.remove(&id);
                }
            }
            None => debug!("Response for departed client #{id} dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(n: u64) -> (ClientRegistry, Vec<mpsc::UnboundedReceiver<Vec<u8>>>) {
        let mut reg = ClientRegistry::new();
        let mut rxs = Vec::new();
        for id in 0..n {
            let (tx, rx) = mpsc::unbounded_channel();
            reg.insert(id, ClientKind::WebSocket, tx);
            rxs.push(rx);
        }
        (reg, rxs)
    }

    #[test]
    fn broadcast_reaches_every_client_once() {
        let (mut reg, mut rxs) = registry_with(3);
        reg.broadcast(&[0x3E, 0x01, 0x00, 0x80]);
        for rx in rxs.iter_mut() {
            assert_eq!(rx.try_recv().unwrap(), vec![0x3E, 0x01, 0x00, 0x80]);
            assert!(rx.try_recv().is_err(), "exactly one delivery per client");
        }
    }

    #[test]
    fn broadcast_removes_dead_sinks() {
        let (mut reg, mut rxs) = registry_with(3);
        rxs.remove(1); // drop the receiver: client 1's writer is gone
        reg.broadcast(&[0xAA]);
        assert_eq!(reg.len(), 2);
        assert!(reg.get(1).is_none());
    }

    #[test]
    fn push_broadcast_skips_clients_awaiting_replay() {
        let mut reg = ClientRegistry::new();
        let (tx_pending, mut rx_pending) = mpsc::unbounded_channel();
        let (tx_done, mut rx_done) = mpsc::unbounded_channel();
        let (tx_tcp, mut rx_tcp) = mpsc::unbounded_channel();
        reg.insert(1, ClientKind::WebSocket, tx_pending);
        reg.insert(2, ClientKind::WebSocket, tx_done);
        reg.insert(3, ClientKind::Tcp, tx_tcp);
        reg.get_mut(2).unwrap().replay = ReplayPhase::Done;

        reg.broadcast_push(&[0x80]);
        assert!(
            rx_pending.try_recv().is_err(),
            "client awaiting replay gets the frame from the buffer instead"
        );
        assert_eq!(rx_done.try_recv().unwrap(), vec![0x80]);
        assert_eq!(rx_tcp.try_recv().unwrap(), vec![0x80]);
    }

    #[test]
    fn unicast_targets_single_client() {
        let (mut reg, mut rxs) = registry_with(2);
        reg.unicast(0, vec![0x01]);
        assert_eq!(rxs[0].try_recv().unwrap(), vec![0x01]);
        assert!(rxs[1].try_recv().is_err());
    }

    #[test]
    fn unicast_to_departed_client_is_silent() {
        let (mut reg, _rxs) = registry_with(1);
        reg.unicast(42, vec![0x01]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn tcp_clients_skip_replay() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut reg = ClientRegistry::new();
        reg.insert(9, ClientKind::Tcp, tx);
        assert_eq!(reg.get(9).unwrap().replay, ReplayPhase::Done);
    }
}
