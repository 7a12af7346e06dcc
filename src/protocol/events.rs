//! Best-effort decoders for push notifications and the `SelfInfo` reply.
//!
//! The bridge forwards every frame verbatim; these decoders exist for
//! routing (the startup handshake) and for structured logging. An unknown
//! or truncated push payload therefore never fails — it decodes to
//! [`PushEvent::Opaque`] and is forwarded as-is.

use super::{ProtocolError, PUB_KEY_SIZE};

/// Decoded view of an unsolicited radio→host notification.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Advertisement from another node (`0x80`).
    Advert { public_key: [u8; PUB_KEY_SIZE] },
    /// Path update for a known contact (`0x81`).
    PathUpdated { public_key: [u8; PUB_KEY_SIZE] },
    /// Delivery confirmation (`0x82`): ack code plus measured round trip.
    SendConfirmed { ack_code: u32, round_trip_ms: u32 },
    /// Offline messages waiting (`0x83`).
    MsgWaiting,
    /// Raw application data (`0x84`) with link quality readings.
    RawData { snr: f32, rssi: i8, data: Vec<u8> },
    /// RX log record (`0x88`) with link quality readings.
    LogRxData { snr: f32, rssi: i8, raw: Vec<u8> },
    /// Any other (or truncated) push payload, forwarded undecoded.
    Opaque { code: u8 },
}

impl PushEvent {
    /// Decode a push payload (first byte `>= 0x80`). Truncated or unknown
    /// payloads come back as [`PushEvent::Opaque`].
    pub fn decode(payload: &[u8]) -> PushEvent {
        let code = match payload.first() {
            Some(c) => *c,
            None => return PushEvent::Opaque { code: 0 },
        };
        match code {
            super::PUSH_CODE_ADVERT if payload.len() >= 33 => PushEvent::Advert {
                public_key: key_at(payload, 1),
            },
            super::PUSH_CODE_PATH_UPDATED if payload.len() >= 33 => PushEvent::PathUpdated {
                public_key: key_at(payload, 1),
            },
            super::PUSH_CODE_SEND_CONFIRMED if payload.len() >= 9 => PushEvent::SendConfirmed {
                ack_code: u32_le_at(payload, 1),
                round_trip_ms: u32_le_at(payload, 5),
            },
            super::PUSH_CODE_MSG_WAITING => PushEvent::MsgWaiting,
            super::PUSH_CODE_RAW_DATA if payload.len() >= 4 => PushEvent::RawData {
                snr: payload[1] as i8 as f32 / 4.0,
                rssi: payload[2] as i8,
                data: payload[4..].to_vec(),
            },
            super::PUSH_CODE_LOG_RX_DATA if payload.len() >= 3 => PushEvent::LogRxData {
                snr: payload[1] as i8 as f32 / 4.0,
                rssi: payload[2] as i8,
                raw: payload[3..].to_vec(),
            },
            _ => PushEvent::Opaque { code },
        }
    }

    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            PushEvent::Advert { .. } => "advert",
            PushEvent::PathUpdated { .. } => "path-updated",
            PushEvent::SendConfirmed { .. } => "send-confirmed",
            PushEvent::MsgWaiting => "msg-waiting",
            PushEvent::RawData { .. } => "raw-data",
            PushEvent::LogRxData { .. } => "log-rx",
            PushEvent::Opaque { .. } => "opaque",
        }
    }
}

fn key_at(payload: &[u8], offset: usize) -> [u8; PUB_KEY_SIZE] {
    let mut key = [0u8; PUB_KEY_SIZE];
    key.copy_from_slice(&payload[offset..offset + PUB_KEY_SIZE]);
    key
}

fn u32_le_at(payload: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}

/// Identity of the attached radio, cached once per serial session from the
/// `SelfInfo` reply to the startup handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub public_key: [u8; PUB_KEY_SIZE],
    pub name: String,
}

/// Fixed offset of the public key inside a `SelfInfo` payload.
const SELF_INFO_KEY_OFFSET: usize = 4;
/// Fixed offset of the NUL-terminated device name.
const SELF_INFO_NAME_OFFSET: usize = 58;

impl DeviceIdentity {
    /// Decode a `SelfInfo` payload (first byte `0x05`). Only the public key
    /// and device name are extracted; the remaining fixed fields are radio
    /// tuning data the bridge does not interpret.
    pub fn from_self_info(payload: &[u8]) -> Result<Self, ProtocolError> {
        match payload.first() {
            Some(&super::RESP_CODE_SELF_INFO) => {}
            Some(&other) => return Err(ProtocolError::UnexpectedCode(other)),
            None => return Err(ProtocolError::SelfInfoTooShort(0)),
        }
        if payload.len() < SELF_INFO_NAME_OFFSET {
            return Err(ProtocolError::SelfInfoTooShort(payload.len()));
        }
        let name_bytes = &payload[SELF_INFO_NAME_OFFSET..];
        let name_end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_bytes.len());
        Ok(DeviceIdentity {
            public_key: key_at(payload, SELF_INFO_KEY_OFFSET),
            name: String::from_utf8_lossy(&name_bytes[..name_end]).into_owned(),
        })
    }

    /// Public key rendered as lowercase hex.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }
}
