//! # MeshBridge - Companion Radio Multiplexer
//!
//! MeshBridge exposes a single locally-attached MeshCore companion radio to
//! several concurrent client interfaces: a browser-facing WebSocket endpoint,
//! a raw TCP endpoint speaking the same binary protocol, and an internal
//! producer of periodic weather-report broadcasts.
//!
//! The companion protocol carries no request identifiers, so the bridge
//! serializes radio access — at most one command outstanding at any instant —
//! while still delivering unsolicited push events (advertisements, delivery
//! receipts, log records) to every attached client in real time. Recent
//! pushes are kept in a persistent replay buffer and replayed to
//! freshly-connected WebSocket clients.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshbridge::bridge::BridgeServer;
//! use meshbridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let mut server = BridgeServer::new(config);
//!     server.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`protocol`] - Companion protocol framing, codes, and payload decoders
//! - [`serial`] - Serial transport with automatic reopen
//! - [`bridge`] - Command queue, client fan-out, replay buffer, supervisor
//! - [`weather`] - Scheduled weather-report producer
//! - [`config`] - Environment-driven configuration
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────────┐
//! │ WS :3000 │   │ TCP :5000│   │ weather timer │
//! └────┬─────┘   └────┬─────┘   └───────┬───────┘
//!      └──────────────┼─────────────────┘
//!                ┌────▼─────┐
//!                │  bridge  │  one command in flight,
//!                │   loop   │  pushes fan out to all
//!                └────┬─────┘
//!                ┌────▼─────┐
//!                │  serial  │  /dev/ttyACM0
//!                └──────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod logutil;
pub mod protocol;
pub mod serial;
pub mod weather;
