//! Single-slot command arbiter.
//!
//! The companion protocol has no request identifiers, so only one command
//! may be outstanding on the radio at a time. Commands from every source
//! (WebSocket clients, TCP clients, internal producers) funnel through this
//! queue in fair FIFO order; the bridge loop drains it one command at a time
//! and releases the slot when a terminal response arrives, the deadline
//! expires, or the serial session resets.
//!
//! Invariants:
//! 1. At most one command in flight.
//! 2. No live deadline without an in-flight command — deadlines are
//!    generation-tagged, and any generation not matching the current
//!    in-flight command is stale and ignored.
//! 3. While the startup handshake is incomplete, client commands accumulate
//!    as waiters but never enter the in-flight slot.
//! 4. A serial reset clears the in-flight command, all waiters, and the
//!    startup gate.
//!
//! The struct is a pure state machine: it never writes to the serial device
//! or arms timers itself. `try_drain` hands the caller a ticket naming the
//! bytes to write and the generation to arm a deadline for, which keeps the
//! critical section free of awaits and makes the queue directly testable.

use std::collections::VecDeque;
use std::time::Duration;

use super::clients::ClientId;

/// One queued command: wire-ready bytes plus the originating client.
/// `source == None` marks internally generated commands (startup, weather);
/// their responses have no unicast target.
#[derive(Debug, Clone)]
pub struct Command {
    pub wire: Vec<u8>,
    pub source: Option<ClientId>,
}

#[derive(Debug)]
struct InFlight {
    cmd: Command,
    generation: u64,
}

/// Ticket returned by [`CommandQueue::try_drain`]: write `wire` to the
/// serial device and arm a deadline tagged with `generation`.
#[derive(Debug)]
pub struct DeadlineTicket {
    pub generation: u64,
    pub wire: Vec<u8>,
}

#[derive(Debug)]
pub struct CommandQueue {
    waiters: VecDeque<Command>,
    in_flight: Option<InFlight>,
    startup_complete: bool,
    timeout: Duration,
    next_generation: u64,
}

impl CommandQueue {
    pub fn new(timeout: Duration) -> Self {
        Self {
            waiters: VecDeque::new(),
            in_flight: None,
            startup_complete: false,
            timeout,
            next_generation: 0,
        }
    }

    /// Configured per-command deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn startup_complete(&self) -> bool {
        self.startup_complete
    }

    /// Open or close the startup gate. Opening does not drain by itself;
    /// the caller follows up with [`try_drain`](Self::try_drain).
    pub fn set_startup_complete(&mut self, complete: bool) {
        self.startup_complete = complete;
    }

    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Source of the in-flight command: `None` when nothing is in flight,
    /// `Some(None)` for an internal command without an originator.
    pub fn in_flight_source(&self) -> Option<Option<ClientId>> {
        self.in_flight.as_ref().map(|f| f.cmd.source)
    }

    /// Append a command to the waiter queue.
    pub fn enqueue(&mut self, cmd: Command) {
        self.waiters.push_back(cmd);
    }

    /// Move the head waiter into the in-flight slot when permitted.
    ///
    /// Preconditions: startup complete, nothing in flight, a waiter exists,
    /// and the serial port is open. Returns the write/deadline ticket, or
    /// `None` when any precondition fails.
    pub fn try_drain(&mut self, serial_open: bool) -> Option<DeadlineTicket> {
        if !self.startup_complete || self.in_flight.is_some() || !serial_open {
            return None;
        }
        let cmd = self.waiters.pop_front()?;
        let generation = self.bump_generation();
        let wire = cmd.wire.clone();
        self.in_flight = Some(InFlight { cmd, generation });
        Some(DeadlineTicket { generation, wire })
    }

    /// A streaming response arrived: keep the command in flight but restart
    /// its deadline. Returns the fresh deadline generation (the previous one
    /// becomes stale), or `None` when nothing is in flight.
    pub fn extend_timeout(&mut self) -> Option<u64> {
        let generation = self.bump_generation();
        let flight = self.in_flight.as_mut()?;
        flight.generation = generation;
        Some(generation)
    }

    /// A terminal response arrived: release the slot. Returns the completed
    /// command so the caller can log it.
    pub fn resolve_terminal(&mut self) -> Option<Command> {
        self.in_flight.take().map(|f| f.cmd)
    }

    /// A deadline fired. Returns the dropped command when the generation
    /// still matches the in-flight command; stale generations return `None`
    /// and change nothing.
    pub fn on_deadline(&mut self, generation: u64) -> Option<Command> {
        match &self.in_flight {
            Some(flight) if flight.generation == generation => {
                self.in_flight.take().map(|f| f.cmd)
            }
            _ => None,
        }
    }

    /// Serial session reset: drop the in-flight command, every waiter, and
    /// close the startup gate. All outstanding deadline generations become
    /// stale.
    pub fn reset(&mut self) -> usize {
        let dropped = self.waiters.len() + usize::from(self.in_flight.is_some());
        self.waiters.clear();
        self.in_flight = None;
        self.startup_complete = false;
        self.bump_generation();
        dropped
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}
