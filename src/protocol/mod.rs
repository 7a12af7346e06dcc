//! # MeshCore Companion Protocol
//!
//! Types and helpers for the framed byte protocol spoken by MeshCore
//! companion firmware over a serial link. Messages are either:
//!
//! - **Commands** (host → radio): first payload byte is a `CMD_*` code
//! - **Responses** (radio → host): first payload byte is a `RESP_CODE_*`
//!   code below `0x80`, solicited by the command currently in flight
//! - **Push notifications** (radio → host): first payload byte is a
//!   `PUSH_CODE_*` code at or above `0x80`, delivered unsolicited
//!
//! The bridge forwards frames verbatim and only decodes the handful of
//! payloads it needs for routing and logging; everything else stays opaque.
//!
//! ## Framing
//!
//! `[direction:u8][len:u16 LE][payload]` — see [`framer::FrameCodec`].

pub mod events;
pub mod framer;

pub use events::{DeviceIdentity, PushEvent};
pub use framer::FrameCodec;

use thiserror::Error;

// ============================================================================
// Command Codes (host → radio)
// ============================================================================

/// Initial handshake command, answered with `SelfInfo`.
pub const CMD_APP_START: u8 = 1;
/// Send a text message to a channel.
pub const CMD_SEND_CHANNEL_TXT_MSG: u8 = 3;

/// App version byte carried in the `AppStart` handshake.
pub const APP_START_VERSION: u8 = 1;

/// Plain text type for channel messages.
pub const TXT_TYPE_PLAIN: u8 = 0;

// ============================================================================
// Response Codes (radio → host, solicited)
// ============================================================================

/// Generic OK response.
pub const RESP_CODE_OK: u8 = 0;
/// Generic error response.
pub const RESP_CODE_ERR: u8 = 1;
/// Start of a contacts listing (streaming).
pub const RESP_CODE_CONTACTS_START: u8 = 2;
/// One contact entry (streaming).
pub const RESP_CODE_CONTACT: u8 = 3;
/// End of a contacts listing (terminal).
pub const RESP_CODE_END_OF_CONTACTS: u8 = 4;
/// Self info, the reply to `AppStart`.
pub const RESP_CODE_SELF_INFO: u8 = 5;
/// Message accepted for sending.
pub const RESP_CODE_SENT: u8 = 6;
/// Contact message from the offline queue (streaming).
pub const RESP_CODE_CONTACT_MSG_RECV: u8 = 7;
/// Channel message from the offline queue (streaming).
pub const RESP_CODE_CHANNEL_MSG_RECV: u8 = 8;
/// Current device time.
pub const RESP_CODE_CURR_TIME: u8 = 9;
/// Offline queue drained.
pub const RESP_CODE_NO_MORE_MESSAGES: u8 = 10;
/// Exported contact blob.
pub const RESP_CODE_EXPORT_CONTACT: u8 = 11;
/// Battery voltage reading.
pub const RESP_CODE_BATTERY_VOLTAGE: u8 = 12;
/// Device info block.
pub const RESP_CODE_DEVICE_INFO: u8 = 13;

// ============================================================================
// Push Codes (radio → host, unsolicited)
// ============================================================================

/// Advertisement received from another node.
pub const PUSH_CODE_ADVERT: u8 = 0x80;
/// Path to a contact was updated.
pub const PUSH_CODE_PATH_UPDATED: u8 = 0x81;
/// Delivery confirmation (ACK) for a previously sent message.
pub const PUSH_CODE_SEND_CONFIRMED: u8 = 0x82;
/// One or more messages are waiting in the offline queue.
pub const PUSH_CODE_MSG_WAITING: u8 = 0x83;
/// Raw data packet received.
pub const PUSH_CODE_RAW_DATA: u8 = 0x84;
/// Login to a room server succeeded.
pub const PUSH_CODE_LOGIN_SUCCESS: u8 = 0x85;
/// Login to a room server failed.
pub const PUSH_CODE_LOGIN_FAIL: u8 = 0x86;
/// Status response from a room server.
pub const PUSH_CODE_STATUS_RESPONSE: u8 = 0x87;
/// Raw RX log record (SNR/RSSI plus undecoded packet bytes).
pub const PUSH_CODE_LOG_RX_DATA: u8 = 0x88;

/// Size of a node public key in bytes.
pub const PUB_KEY_SIZE: usize = 32;

/// Frame direction on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Radio → host, `0x3E` ('>').
    FromRadio,
    /// Host → radio, `0x3C` ('<').
    ToRadio,
}

impl Direction {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x3E => Some(Self::FromRadio),
            0x3C => Some(Self::ToRadio),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::FromRadio => 0x3E,
            Self::ToRadio => 0x3C,
        }
    }
}

/// One complete frame extracted from a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub direction: Direction,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Rebuild the raw wire bytes (header + payload) for forwarding.
    pub fn to_wire(&self) -> Vec<u8> {
        FrameCodec::encode(self.direction, &self.payload)
    }
}

/// Classification of a FromRadio payload by its first byte.
///
/// The solicited/unsolicited dichotomy drives all routing: responses are
/// unicast to the in-flight command's originator and advance the queue,
/// pushes are buffered and broadcast to every client.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameClass {
    /// Solicited reply to the command currently in flight (`code < 0x80`).
    Response { code: u8 },
    /// Unsolicited notification (`code >= 0x80`), decoded best-effort.
    Push { code: u8, event: PushEvent },
}

/// Classify a FromRadio payload. Returns `None` for an empty payload, which
/// the framer never emits.
pub fn classify(payload: &[u8]) -> Option<FrameClass> {
    let code = *payload.first()?;
    if code >= 0x80 {
        Some(FrameClass::Push {
            code,
            event: PushEvent::decode(payload),
        })
    } else {
        Some(FrameClass::Response { code })
    }
}

/// Response codes that may be the first of several replies to one command.
///
/// This set is embedded policy, not protocol-discoverable: if the firmware
/// gains new streaming codes they must be added here.
pub const STREAMING_RESPONSE_CODES: [u8; 4] = [
    RESP_CODE_CONTACTS_START,
    RESP_CODE_CONTACT,
    RESP_CODE_CONTACT_MSG_RECV,
    RESP_CODE_CHANNEL_MSG_RECV,
];

/// Whether a response code keeps the command queue locked (non-terminal).
pub fn is_streaming_response(code: u8) -> bool {
    STREAMING_RESPONSE_CODES.contains(&code)
}

/// Build the `AppStart` handshake payload:
/// `[cmd][app_ver][6 reserved zero bytes][app name utf-8]`.
pub fn app_start_payload(app_name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + app_name.len());
    out.push(CMD_APP_START);
    out.push(APP_START_VERSION);
    out.extend_from_slice(&[0u8; 6]);
    out.extend_from_slice(app_name.as_bytes());
    out
}

/// Build a `SendChannelTxtMsg` payload:
/// `[cmd][txt_type][channel_idx][timestamp:u32 LE][utf-8 text]`.
pub fn channel_text_payload(channel: u8, timestamp: u32, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(7 + text.len());
    out.push(CMD_SEND_CHANNEL_TXT_MSG);
    out.push(TXT_TYPE_PLAIN);
    out.push(channel);
    out.extend_from_slice(&timestamp.to_le_bytes());
    out.extend_from_slice(text.as_bytes());
    out
}

/// Errors from typed payload decoders.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("self info payload too short: {0} bytes")]
    SelfInfoTooShort(usize),
    #[error("unexpected response code {0:#04x}")]
    UnexpectedCode(u8),
}
