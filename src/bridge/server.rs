//! Supervisor loop: wires the serial transport, client acceptors, command
//! queue, dispatcher, startup sequencer and replay buffer together.
//!
//! All bridge state lives on this loop. Socket tasks and timers only send
//! [`BridgeEvent`]s; the loop reacts to one event at a time, which gives the
//! ordering guarantees for free: frames dispatch in wire order, a response
//! reaches its originator before the next command is written, and client
//! sets never change mid-iteration.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;

use crate::bridge::clients::{ClientId, ClientKind, ClientRegistry, ReplayPhase};
use crate::bridge::queue::{Command, CommandQueue};
use crate::bridge::replay::PushBuffer;
use crate::bridge::{BridgeEvent, CommandSubmitter};
use crate::config::Config;
use crate::logutil::{escape_log, hex_snippet};
use crate::protocol::{
    app_start_payload, classify, is_streaming_response, DeviceIdentity, Direction, Frame,
    FrameClass, FrameCodec, RESP_CODE_SELF_INFO,
};
use crate::serial::{self, SerialEvent, SerialLink};
use crate::weather;

/// Name the bridge announces in the `AppStart` handshake.
pub const APP_NAME: &str = "MeshBridge";

/// Settle delay between serial open and the handshake write.
const STARTUP_SETTLE: Duration = Duration::from_millis(500);
/// How long to wait for the `SelfInfo` reply before giving up on identity.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
/// Delay between a WS client's first command and its buffer replay, giving
/// the remote app time to initialize.
const REPLAY_DELAY: Duration = Duration::from_secs(3);

/// Single-shot hook intercepting the handshake reply for one session.
#[derive(Debug)]
struct ExpectedResponse {
    code: u8,
    session: u64,
}

pub struct BridgeServer {
    config: Config,
    link: SerialLink,
    codec: FrameCodec,
    queue: CommandQueue,
    clients: ClientRegistry,
    replay: PushBuffer,
    identity: Option<DeviceIdentity>,
    startup_hook: Option<ExpectedResponse>,
    /// Serial session counter; timers carry the session they were armed in
    /// so a reconnect invalidates them.
    session: u64,
    /// Readiness flag shared with the weather producer: startup complete
    /// and serial open.
    ready: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<BridgeEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<BridgeEvent>>,
}

impl BridgeServer {
    pub fn new(config: Config) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let replay = PushBuffer::load(config.replay.capacity, &config.replay.file);
        let queue = CommandQueue::new(config.queue.command_timeout);
        Self {
            link: SerialLink::new(),
            codec: FrameCodec::new(),
            queue,
            clients: ClientRegistry::new(),
            replay,
            identity: None,
            startup_hook: None,
            session: 0,
            ready: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx: Some(events_rx),
            config,
        }
    }

    /// Cached identity of the current serial session, when the handshake
    /// succeeded.
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Run the bridge until a shutdown signal arrives.
    pub async fn run(&mut self) -> Result<()> {
        let mut events_rx = self
            .events_rx
            .take()
            .ok_or_else(|| anyhow!("bridge already running"))?;

        let ws_addr = SocketAddr::from(([0, 0, 0, 0], self.config.server.ws_port));
        let ws_listener = TcpListener::bind(ws_addr)
            .await
            .with_context(|| format!("failed to bind WebSocket port {}", ws_addr.port()))?;
        let tcp_addr = SocketAddr::from(([0, 0, 0, 0], self.config.server.tcp_port));
        let tcp_listener = TcpListener::bind(tcp_addr)
            .await
            .with_context(|| format!("failed to bind TCP port {}", tcp_addr.port()))?;
        info!(
            "Listening: ws :{}, tcp :{} (web app proxy external at :{})",
            self.config.server.ws_port, self.config.server.tcp_port, self.config.server.http_port
        );

        let ids = Arc::new(AtomicU64::new(1));
        tokio::spawn(run_ws_listener(
            ws_listener,
            self.events_tx.clone(),
            ids.clone(),
        ));
        tokio::spawn(run_tcp_listener(tcp_listener, self.events_tx.clone(), ids));

        let (serial_tx, mut serial_rx) = mpsc::unbounded_channel();
        let serial_task = serial::spawn_supervisor(
            self.config.serial.clone(),
            self.link.clone(),
            serial_tx,
        );
        let weather_task = weather::spawn_if_enabled(
            &self.config.weather,
            CommandSubmitter::new(self.events_tx.clone()),
            self.ready.clone(),
        );

        // Doubles as the push-buffer debounce check.
        let mut housekeeping = tokio::time::interval(Duration::from_secs(1));
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = serial_rx.recv() => self.on_serial_event(event),
                Some(event) = events_rx.recv() => self.on_event(event),
                _ = housekeeping.tick() => { self.replay.flush_if_due(); }
                _ = shutdown_signal() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        serial_task.abort();
        if let Some(task) = weather_task {
            task.abort();
        }
        if let Err(e) = self.replay.flush() {
            warn!("Final push buffer flush failed: {e}");
        }
        self.link.close();
        info!("Bridge shutdown complete");
        Ok(())
    }

    fn on_serial_event(&mut self, event: SerialEvent) {
        match event {
            SerialEvent::Opened => {
                self.session += 1;
                let session = self.session;
                debug!("Serial session {session} started; settling before handshake");
                spawn_event_timer(
                    self.events_tx.clone(),
                    STARTUP_SETTLE,
                    BridgeEvent::StartupSettled { session },
                );
            }
            SerialEvent::Bytes(bytes) => {
                trace!("RX {} bytes: {}", bytes.len(), hex_snippet(&bytes, 32));
                self.codec.push(&bytes);
                while let Some(frame) = self.codec.next_frame() {
                    self.on_frame(frame);
                }
            }
            SerialEvent::Closed => {
                warn!("Serial connection lost; resetting bridge state");
                self.reset_state();
            }
        }
    }

    fn on_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::ClientConnected { id, kind, sink } => {
                self.clients.insert(id, kind, sink);
                info!(
                    "{} client #{id} connected ({} total)",
                    kind.label(),
                    self.clients.len()
                );
                if kind == ClientKind::Tcp {
                    let tcp = self.clients.count_kind(ClientKind::Tcp);
                    if tcp > 1 {
                        warn!(
                            "{tcp} TCP clients connected; their command streams interleave \
                             on the single radio queue"
                        );
                    }
                }
            }
            BridgeEvent::ClientDisconnected { id } => {
                if self.clients.remove(id).is_some() {
                    info!(
                        "Client #{id} disconnected ({} remaining)",
                        self.clients.len()
                    );
                }
            }
            BridgeEvent::SubmitCommand { source, wire } => self.on_submit(source, wire),
            BridgeEvent::CommandDeadline { generation } => {
                if let Some(cmd) = self.queue.on_deadline(generation) {
                    warn!(
                        "Command from {} timed out after {:?}; advancing queue",
                        source_label(cmd.source),
                        self.queue.timeout()
                    );
                    self.drain();
                }
            }
            BridgeEvent::StartupSettled { session } => self.begin_handshake(session),
            BridgeEvent::StartupDeadline { session } => {
                if session == self.session && self.startup_hook.is_some() {
                    warn!("Startup handshake timed out; continuing without device identity");
                    self.startup_hook = None;
                    self.complete_startup();
                }
            }
            BridgeEvent::ReplayDue { id } => self.replay_to_client(id),
        }
    }

    fn on_submit(&mut self, source: Option<ClientId>, wire: Vec<u8>) {
        if wire.is_empty() {
            return;
        }
        if let Some(id) = source {
            // A WS client's first command schedules its one-shot replay.
            if let Some(client) = self.clients.get_mut(id) {
                if client.kind == ClientKind::WebSocket && client.replay == ReplayPhase::Pending {
                    client.replay = ReplayPhase::Scheduled;
                    spawn_event_timer(
                        self.events_tx.clone(),
                        REPLAY_DELAY,
                        BridgeEvent::ReplayDue { id },
                    );
                }
            }
        }
        self.queue.enqueue(Command { wire, source });
        self.drain();
    }

    /// Dispatch one frame from the radio (base routing policy: startup hook,
    /// then push broadcast, then response unicast).
    fn on_frame(&mut self, frame: Frame) {
        if frame.direction != Direction::FromRadio {
            debug!("Ignoring host-direction frame echoed on the serial line");
            return;
        }
        let class = match classify(&frame.payload) {
            Some(c) => c,
            None => return,
        };

        if let Some(hook) = &self.startup_hook {
            let code = match &class {
                FrameClass::Response { code } => *code,
                FrameClass::Push { code, .. } => *code,
            };
            if hook.code == code {
                self.startup_hook = None;
                self.finish_handshake(&frame.payload);
                return;
            }
        }

        let raw = frame.to_wire();
        match class {
            FrameClass::Push { code, event } => {
                debug!(
                    "Push {code:#04x} ({}) → {} client(s)",
                    event.label(),
                    self.clients.len()
                );
                // Recorded before delivery: WS clients still awaiting their
                // replay pick this frame up from the buffer, keeping their
                // push stream in wire order.
                self.replay.record(raw.clone());
                self.clients.broadcast_push(&raw);
            }
            FrameClass::Response { code } => {
                match self.queue.in_flight_source() {
                    // Solicited by a client: that client alone sees it.
                    Some(Some(id)) => self.clients.unicast(id, raw),
                    // Internal command, or nothing in flight (e.g. a reply
                    // landing after its deadline): everyone sees it.
                    _ => self.clients.broadcast(&raw),
                }
                if is_streaming_response(code) {
                    if let Some(generation) = self.queue.extend_timeout() {
                        self.arm_deadline(generation);
                    }
                } else {
                    if let Some(cmd) = self.queue.resolve_terminal() {
                        debug!(
                            "Command from {} resolved with code {code:#04x}",
                            source_label(cmd.source)
                        );
                    }
                    self.drain();
                }
            }
        }
    }

    /// Move the next waiter onto the wire if the queue permits.
    fn drain(&mut self) {
        if let Some(ticket) = self.queue.try_drain(self.link.is_open()) {
            match self.link.write(&ticket.wire) {
                Ok(()) => self.arm_deadline(ticket.generation),
                Err(e) => {
                    // The port died under us; the Closed event will reset
                    // everything shortly.
                    warn!("Serial write failed: {e}; dropping command");
                    self.queue.resolve_terminal();
                }
            }
        }
    }

    fn arm_deadline(&self, generation: u64) {
        spawn_event_timer(
            self.events_tx.clone(),
            self.queue.timeout(),
            BridgeEvent::CommandDeadline { generation },
        );
    }

    /// Write `AppStart` directly to the serial device, bypassing the gated
    /// queue. No client write can race this because `startup_complete` is
    /// still false.
    fn begin_handshake(&mut self, session: u64) {
        if session != self.session || self.queue.startup_complete() || !self.link.is_open() {
            return;
        }
        let wire = FrameCodec::encode_outgoing(&app_start_payload(APP_NAME));
        match self.link.write(&wire) {
            Ok(()) => {
                debug!("AppStart sent; awaiting SelfInfo");
                self.startup_hook = Some(ExpectedResponse {
                    code: RESP_CODE_SELF_INFO,
                    session,
                });
                spawn_event_timer(
                    self.events_tx.clone(),
                    STARTUP_TIMEOUT,
                    BridgeEvent::StartupDeadline { session },
                );
            }
            Err(e) => {
                warn!("Startup handshake write failed: {e}; continuing without device identity");
                self.complete_startup();
            }
        }
    }

    fn finish_handshake(&mut self, payload: &[u8]) {
        match DeviceIdentity::from_self_info(payload) {
            Ok(identity) => {
                info!(
                    "Radio identity: {} [{}…]",
                    escape_log(&identity.name),
                    &identity.public_key_hex()[..12]
                );
                self.identity = Some(identity);
            }
            Err(e) => warn!("SelfInfo decode failed: {e}; continuing without device identity"),
        }
        self.complete_startup();
    }

    /// Open the queue gate and release commands accumulated during the
    /// handshake.
    fn complete_startup(&mut self) {
        self.queue.set_startup_complete(true);
        self.ready.store(self.link.is_open(), Ordering::Relaxed);
        let waiting = self.queue.waiting();
        if waiting > 0 {
            info!("Releasing {waiting} command(s) queued during startup");
        }
        self.drain();
    }

    /// One-shot replay of the push buffer to a freshly-initialized WS
    /// client.
    fn replay_to_client(&mut self, id: ClientId) {
        let still_scheduled = match self.clients.get_mut(id) {
            Some(client) if client.replay == ReplayPhase::Scheduled => {
                client.replay = ReplayPhase::Done;
                true
            }
            _ => false,
        };
        if !still_scheduled || self.replay.is_empty() {
            return;
        }
        info!(
            "Replaying {} buffered push frame(s) to ws client #{id}",
            self.replay.len()
        );
        let frames: Vec<Vec<u8>> = self.replay.entries().map(|e| e.frame.clone()).collect();
        for frame in frames {
            self.clients.unicast(id, frame);
        }
    }

    /// Serial loss: drop every in-flight and waiting command, close the
    /// startup gate, clear the codec and session identity. Client sockets
    /// stay connected; their new commands wait for the next startup.
    fn reset_state(&mut self) {
        let dropped = self.queue.reset();
        self.codec.clear();
        self.startup_hook = None;
        self.identity = None;
        self.ready.store(false, Ordering::Relaxed);
        if dropped > 0 {
            warn!("Dropped {dropped} pending command(s) on serial reset");
        }
    }
}

fn source_label(source: Option<ClientId>) -> String {
    match source {
        Some(id) => format!("client #{id}"),
        None => "internal producer".to_string(),
    }
}

/// Post an event after a delay. Receivers validate the carried generation
/// or session, so a stale timer firing is harmless.
fn spawn_event_timer(
    tx: mpsc::UnboundedSender<BridgeEvent>,
    delay: Duration,
    event: BridgeEvent,
) {
    tokio::spawn(async move {
        sleep(delay).await;
        let _ = tx.send(event);
    });
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

// ============================================================================
// Acceptors
// ============================================================================

async fn run_ws_listener(
    listener: TcpListener,
    events: mpsc::UnboundedSender<BridgeEvent>,
    ids: Arc<AtomicU64>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let events = events.clone();
                let ids = ids.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_ws_client(stream, peer, events, ids).await {
                        debug!("ws connection from {peer} ended: {e}");
                    }
                });
            }
            Err(e) => {
                warn!("WebSocket accept failed: {e}");
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// One WebSocket client. Each inbound binary message is one complete wire
/// frame, already framed by the browser shim.
async fn handle_ws_client(
    stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<BridgeEvent>,
    ids: Arc<AtomicU64>,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| anyhow!("handshake failed: {e}"))?;
    let id = ids.fetch_add(1, Ordering::Relaxed);
    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    if events
        .send(BridgeEvent::ClientConnected {
            id,
            kind: ClientKind::WebSocket,
            sink: sink_tx,
        })
        .is_err()
    {
        return Ok(());
    }
    debug!("ws client #{id} from {peer}");

    let (mut write, mut read) = ws.split();
    let writer = tokio::spawn(async move {
        while let Some(bytes) = sink_rx.recv().await {
            if write.send(Message::Binary(bytes)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Binary(bytes)) => {
                if bytes.is_empty() {
                    continue;
                }
                if events
                    .send(BridgeEvent::SubmitCommand {
                        source: Some(id),
                        wire: bytes,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {} // pings are answered by the protocol layer
        }
    }

    writer.abort();
    let _ = events.send(BridgeEvent::ClientDisconnected { id });
    Ok(())
}

async fn run_tcp_listener(
    listener: TcpListener,
    events: mpsc::UnboundedSender<BridgeEvent>,
    ids: Arc<AtomicU64>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let events = events.clone();
                let ids = ids.clone();
                tokio::spawn(handle_tcp_client(stream, peer, events, ids));
            }
            Err(e) => {
                warn!("TCP accept failed: {e}");
                sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// One raw TCP client speaking serial framing. The byte stream gets its own
/// frame accumulator; extracted frames are rebuilt so only well-formed wire
/// bytes reach the queue.
async fn handle_tcp_client(
    stream: TcpStream,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<BridgeEvent>,
    ids: Arc<AtomicU64>,
) {
    let id = ids.fetch_add(1, Ordering::Relaxed);
    let (sink_tx, mut sink_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    if events
        .send(BridgeEvent::ClientConnected {
            id,
            kind: ClientKind::Tcp,
            sink: sink_tx,
        })
        .is_err()
    {
        return;
    }
    debug!("tcp client #{id} from {peer}");

    let (mut reader, mut write_half) = stream.into_split();
    let writer = tokio::spawn(async move {
        while let Some(bytes) = sink_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
            if write_half.flush().await.is_err() {
                break;
            }
        }
    });

    let mut codec = FrameCodec::new();
    let mut buf = [0u8; 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                codec.push(&buf[..n]);
                while let Some(frame) = codec.next_frame() {
                    let wire = FrameCodec::encode(frame.direction, &frame.payload);
                    if events
                        .send(BridgeEvent::SubmitCommand {
                            source: Some(id),
                            wire,
                        })
                        .is_err()
                    {
                        writer.abort();
                        return;
                    }
                }
            }
            Err(_) => break,
        }
    }

    writer.abort();
    let _ = events.send(BridgeEvent::ClientDisconnected { id });
}
