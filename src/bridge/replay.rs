//! Push-replay buffer.
//!
//! Every push frame the radio emits is recorded in a bounded FIFO so that a
//! freshly-connected WebSocket client can catch up on recent mesh activity
//! (adverts, receipts, log records) it missed while its page was closed.
//! The buffer is persisted to a single JSON file — frames base64-encoded
//! with millisecond timestamps — debounced five seconds after the last
//! mutation and flushed unconditionally on graceful shutdown. A corrupt or
//! missing file is equivalent to an empty buffer and is never fatal.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Debounce window between a mutation and the write-back.
pub const PERSIST_DEBOUNCE: std::time::Duration = std::time::Duration::from_secs(5);

/// One buffered push frame: the raw wire bytes and when they arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEntry {
    pub frame: Vec<u8>,
    pub timestamp_ms: i64,
}

/// On-disk form of a [`PushEntry`].
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    frame: String,
    timestamp: i64,
}

#[derive(Debug)]
pub struct PushBuffer {
    entries: VecDeque<PushEntry>,
    capacity: usize,
    path: PathBuf,
    dirty_since: Option<Instant>,
}

impl PushBuffer {
    /// Load the persisted buffer, tolerating absence and corruption.
    pub fn load<P: AsRef<Path>>(capacity: usize, path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut buffer = Self {
            entries: VecDeque::new(),
            capacity,
            path,
            dirty_since: None,
        };
        match buffer.read_entries() {
            Ok(entries) => {
                let total = entries.len();
                buffer.entries = entries;
                // Keep the newest entries when the file outgrows the
                // configured capacity.
                while buffer.entries.len() > buffer.capacity {
                    buffer.entries.pop_front();
                }
                if total > 0 {
                    debug!(
                        "Loaded {} buffered push frames from {}",
                        buffer.entries.len(),
                        buffer.path.display()
                    );
                }
            }
            Err(e) => {
                warn!(
                    "Push buffer {} unreadable ({e}); starting empty",
                    buffer.path.display()
                );
            }
        }
        buffer
    }

    fn read_entries(&self) -> Result<VecDeque<PushEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VecDeque::new());
            }
            Err(e) => return Err(anyhow!("read failed: {e}")),
        };
        // Guard against accidental leading NULs from previous partial writes
        let cleaned = content.trim_start_matches('\0');
        let stored: Vec<StoredEntry> =
            serde_json::from_str(cleaned).map_err(|e| anyhow!("parse failed: {e}"))?;
        let mut entries = VecDeque::with_capacity(stored.len());
        for entry in stored {
            match BASE64.decode(&entry.frame) {
                Ok(frame) => entries.push_back(PushEntry {
                    frame,
                    timestamp_ms: entry.timestamp,
                }),
                Err(e) => debug!("Skipping undecodable buffered frame: {e}"),
            }
        }
        Ok(entries)
    }

    /// Record one push frame, evicting the oldest entry on overflow. A
    /// zero-capacity buffer stores nothing.
    pub fn record(&mut self, frame: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(PushEntry {
            frame,
            timestamp_ms: Utc::now().timestamp_millis(),
        });
        self.dirty_since = Some(Instant::now());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Buffered entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &PushEntry> {
        self.entries.iter()
    }

    /// Write back when the debounce window since the last mutation has
    /// elapsed. Returns whether a flush happened.
    pub fn flush_if_due(&mut self) -> bool {
        match self.dirty_since {
            Some(since) if since.elapsed() >= PERSIST_DEBOUNCE => match self.flush() {
                Ok(()) => true,
                Err(e) => {
                    warn!("Push buffer write-back failed: {e}");
                    // Retry on a later tick rather than hammering the disk.
                    self.dirty_since = Some(Instant::now());
                    false
                }
            },
            _ => false,
        }
    }

    /// Unconditional write-back (shutdown path). Atomic: the serialized
    /// buffer lands in a temp file that replaces the destination.
    pub fn flush(&mut self) -> Result<()> {
        let stored: Vec<StoredEntry> = self
            .entries
            .iter()
            .map(|e| StoredEntry {
                frame: BASE64.encode(&e.frame),
                timestamp: e.timestamp_ms,
            })
            .collect();
        let content = serde_json::to_string(&stored)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent);
            }
        }
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let base = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("push_buffer.json");
        let mut counter = 0u32;
        let tmp_path = loop {
            let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(mut tmp) => {
                    tmp.write_all(content.as_bytes())?;
                    tmp.flush()?;
                    let _ = tmp.sync_all();
                    break candidate;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    counter = counter.saturating_add(1);
                    continue;
                }
                Err(e) => return Err(anyhow!("failed to create temp file: {e}")),
            }
        };
        fs::rename(&tmp_path, &self.path)?;
        if let Ok(dir_file) = File::open(&dir) {
            let _ = dir_file.sync_all();
        }
        self.dirty_since = None;
        debug!(
            "Persisted {} push frames to {}",
            self.entries.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn capacity_evicts_oldest() {
        let dir = tempdir().unwrap();
        let mut buf = PushBuffer::load(3, dir.path().join("push.json"));
        for i in 0u8..5 {
            buf.record(vec![0x3E, 0x01, 0x00, 0x80 + i]);
        }
        assert_eq!(buf.len(), 3);
        let frames: Vec<u8> = buf.entries().map(|e| e.frame[3]).collect();
        assert_eq!(frames, vec![0x82, 0x83, 0x84]);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let dir = tempdir().unwrap();
        let mut buf = PushBuffer::load(0, dir.path().join("push.json"));
        buf.record(vec![0x3E, 0x01, 0x00, 0x80]);
        buf.record(vec![0x3E, 0x01, 0x00, 0x81]);
        assert!(buf.is_empty());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("push.json");
        let mut buf = PushBuffer::load(10, &path);
        buf.record(vec![0x3E, 0x02, 0x00, 0x80, 0x01]);
        buf.record(vec![0x3E, 0x01, 0x00, 0x83]);
        buf.flush().expect("flush");

        let reloaded = PushBuffer::load(10, &path);
        assert_eq!(reloaded.len(), 2);
        let a: Vec<&PushEntry> = buf.entries().collect();
        let b: Vec<&PushEntry> = reloaded.entries().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let buf = PushBuffer::load(10, dir.path().join("absent.json"));
        assert!(buf.is_empty());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("push.json");
        fs::write(&path, b"{this is not json").unwrap();
        let buf = PushBuffer::load(10, &path);
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_file_trims_to_newest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("push.json");
        let mut buf = PushBuffer::load(10, &path);
        for i in 0u8..6 {
            buf.record(vec![0x3E, 0x01, 0x00, 0x80 + i]);
        }
        buf.flush().unwrap();

        let reloaded = PushBuffer::load(2, &path);
        assert_eq!(reloaded.len(), 2);
        let frames: Vec<u8> = reloaded.entries().map(|e| e.frame[3]).collect();
        assert_eq!(frames, vec![0x84, 0x85]);
    }

    #[test]
    fn flush_if_due_respects_debounce() {
        let dir = tempdir().unwrap();
        let mut buf = PushBuffer::load(10, dir.path().join("push.json"));
        buf.record(vec![0x3E, 0x01, 0x00, 0x80]);
        // Mutation is fresh; the debounce window has not elapsed.
        assert!(!buf.flush_if_due());
        // Clean buffers never flush.
        buf.flush().unwrap();
        assert!(!buf.flush_if_due());
    }
}
