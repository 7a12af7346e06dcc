//! # Serial Transport Module
//!
//! Owns the one physical link to the companion radio. A supervisor task
//! opens the configured device, pumps received bytes to the bridge, and on
//! any failure (open error or mid-session loss) retries every five seconds,
//! forever. The write half is shared through a cloneable [`SerialLink`] so
//! the bridge loop can submit command bytes without owning the port.
//!
//! The device is opened with a short read timeout and explicit 8N1 settings;
//! some USB serial adapters misbehave without them. DTR/RTS are asserted on
//! open to wake ESP32-class boards.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serialport::SerialPort;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::SerialConfig;

/// Delay between reopen attempts after an open failure or a session loss.
pub const REOPEN_DELAY: Duration = Duration::from_secs(5);

/// Read timeout on the device; the pump loops on expiry.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Transport events delivered to the bridge loop.
#[derive(Debug)]
pub enum SerialEvent {
    /// The device was (re)opened; a new serial session begins.
    Opened,
    /// Bytes received from the radio.
    Bytes(Vec<u8>),
    /// The device was lost; the supervisor will retry after [`REOPEN_DELAY`].
    Closed,
}

/// Shared handle to the write half of the serial port.
///
/// Empty while the device is closed; writes then fail and the caller decides
/// what to do with the unsent command.
#[derive(Clone, Default)]
pub struct SerialLink {
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
}

impl SerialLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.port.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    /// Write bytes verbatim to the radio. Fails when the port is closed.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self
            .port
            .lock()
            .map_err(|_| anyhow!("serial port lock poisoned"))?;
        match guard.as_mut() {
            Some(port) => {
                port.write_all(bytes)
                    .map_err(|e| anyhow!("serial write failed: {e}"))?;
                port.flush().map_err(|e| anyhow!("serial flush failed: {e}"))?;
                Ok(())
            }
            None => Err(anyhow!("serial port is closed")),
        }
    }

    /// Drop the write half, closing the device descriptor we hold.
    pub fn close(&self) {
        if let Ok(mut guard) = self.port.lock() {
            *guard = None;
        }
    }

    fn install(&self, port: Box<dyn SerialPort>) {
        if let Ok(mut guard) = self.port.lock() {
            *guard = Some(port);
        }
    }
}

/// Spawn the open/reopen supervisor. It runs until the event receiver is
/// dropped (bridge shutdown).
pub fn spawn_supervisor(
    cfg: SerialConfig,
    link: SerialLink,
    events: mpsc::UnboundedSender<SerialEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = run_session(&cfg, &link, &events).await {
                warn!("Serial port {} unavailable: {e}", cfg.port);
            }
            if events.is_closed() {
                break;
            }
            sleep(REOPEN_DELAY).await;
        }
    })
}

/// One serial session: open, pump bytes until the device is lost, clean up.
async fn run_session(
    cfg: &SerialConfig,
    link: &SerialLink,
    events: &mpsc::UnboundedSender<SerialEvent>,
) -> Result<()> {
    let port = open_port(cfg)?;
    let reader = port
        .try_clone()
        .map_err(|e| anyhow!("failed to clone serial handle: {e}"))?;
    link.install(port);
    info!("Serial port {} open at {} baud", cfg.port, cfg.baud_rate);
    let _ = events.send(SerialEvent::Opened);

    let pump_events = events.clone();
    let pump = tokio::task::spawn_blocking(move || read_pump(reader, pump_events));
    let _ = pump.await;

    link.close();
    let _ = events.send(SerialEvent::Closed);
    Ok(())
}

fn open_port(cfg: &SerialConfig) -> Result<Box<dyn SerialPort>> {
    let mut builder = serialport::new(&cfg.port, cfg.baud_rate).timeout(READ_TIMEOUT);
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder
        .open()
        .map_err(|e| anyhow!("failed to open {}: {e}", cfg.port))?;
    // Wake the board and drop any boot chatter buffered before we attached.
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    let mut purge = [0u8; 512];
    if let Ok(available) = port.bytes_to_read() {
        if available > 0 {
            let _ = port.read(&mut purge);
        }
    }
    Ok(port)
}

/// Blocking read loop. Returns when the device errors out or the bridge has
/// gone away (send failure).
fn read_pump(mut port: Box<dyn SerialPort>, events: mpsc::UnboundedSender<SerialEvent>) {
    let mut buf = [0u8; 1024];
    loop {
        match port.read(&mut buf) {
            Ok(0) => std::thread::sleep(Duration::from_millis(5)),
            Ok(n) => {
                if events.send(SerialEvent::Bytes(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Serial read ended: {e}");
                return;
            }
        }
    }
}
