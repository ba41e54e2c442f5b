//! # p3-bridge
//!
//! Bridges a MYLAPS P3 transponder-timing decoder to an HTTP(S)
//! race-control backend.
//!
//! ## Architecture
//!
//! - **Decoder side** (TCP client or UDP listener): a byte stream in the
//!   P3 wire format — SOH/EOT framing, DLE byte-stuffing, CRC-16 per
//!   record.
//! - **Backend side**: one JSON envelope per record, POSTed with bounded
//!   inline retries; failures land in a persistent FIFO queue that is
//!   drained periodically and after every successful POST.
//!
//! Data flows one way: `transport → framer → parser → delivery`. The
//! bridge never writes to the decoder, and delivery is at-least-once —
//! receivers deduplicate on `receivedAt` plus the record identifiers.
//!
//! ## Example
//!
//! ```ignore
//! use p3_bridge::{Bridge, Config};
//!
//! #[tokio::main]
//! async fn main() -> p3_bridge::Result<()> {
//!     let config = Config::load("p3-bridge.json")?;
//!     let bridge = Bridge::start(config).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     bridge.shutdown().await
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod delivery;
pub mod error;
pub mod protocol;
pub mod stats;
pub mod transport;

pub use bridge::{Bridge, Pipeline};
pub use config::{Config, Mode};
pub use error::{BridgeError, Result};
pub use stats::{Stats, StatsSnapshot};
