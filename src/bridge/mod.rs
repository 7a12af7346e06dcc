//! # Bridge Core
//!
//! Everything between the serial transport and the client sockets: the
//! single-slot command queue, the client registry with its fan-out rules,
//! the push-replay buffer, and the supervisor loop that owns all of that
//! state ([`server::BridgeServer`]).
//!
//! The core contract: exactly one writer to the radio at any instant, and
//! every piece of mutable bridge state is touched only on the supervisor
//! loop. Other tasks (socket readers/writers, timers, the weather producer)
//! communicate with the loop through [`BridgeEvent`] messages.

pub mod clients;
pub mod queue;
pub mod replay;
pub mod server;

pub use server::BridgeServer;

use tokio::sync::mpsc;

use clients::{ClientId, ClientKind};

/// Events processed by the supervisor loop. Everything that mutates bridge
/// state arrives here, which is what makes the loop's critical sections
/// await-free.
#[derive(Debug)]
pub enum BridgeEvent {
    /// A socket finished its handshake and is ready for traffic.
    ClientConnected {
        id: ClientId,
        kind: ClientKind,
        sink: mpsc::UnboundedSender<Vec<u8>>,
    },
    /// A socket went away (EOF, error, or writer failure).
    ClientDisconnected { id: ClientId },
    /// A complete wire frame to submit to the command queue. `source` is
    /// `None` for internal producers.
    SubmitCommand {
        source: Option<ClientId>,
        wire: Vec<u8>,
    },
    /// The in-flight command's deadline fired. Stale generations are
    /// ignored by the queue.
    CommandDeadline { generation: u64 },
    /// The post-open settle delay elapsed; start the handshake.
    StartupSettled { session: u64 },
    /// The handshake response never arrived.
    StartupDeadline { session: u64 },
    /// A WebSocket client's replay delay elapsed.
    ReplayDue { id: ClientId },
}

/// Handle for internal producers (startup aside, currently the weather
/// producer) to submit commands with no originating client.
#[derive(Clone, Debug)]
pub struct CommandSubmitter {
    tx: mpsc::UnboundedSender<BridgeEvent>,
}

impl CommandSubmitter {
    pub fn new(tx: mpsc::UnboundedSender<BridgeEvent>) -> Self {
        Self { tx }
    }

    /// Submit a wire-ready frame. Responses to it broadcast to all clients
    /// because there is no originator to unicast to.
    pub fn submit(&self, wire: Vec<u8>) {
        let _ = self.tx.send(BridgeEvent::SubmitCommand { source: None, wire });
    }
}
