//! AT transport for the Laird BL65x USB dongle
//!
//! This crate turns the dongle's unframed serial byte stream into typed
//! queues and a serialized command/response exchange, and drives the
//! connection sequence a BT510 sensor needs (secure VSP connect with a
//! one-shot plain-mode pairing detour).
//!
//! ## Architecture
//!
//! - [`classifier`] - Byte stream reassembly and message classification
//! - [`transport`] - Reader task, message queues, command correlation
//! - [`connection`] - Connect/disconnect state machine
//! - [`channel`] - The JSON packet seam shared by both transports
//! - [`commander`] - JSON-RPC sensor operations over any channel
//! - [`serial_json`] - Direct bench UART transport
//! - [`protocol`] - AT protocol constants
//! - [`error`] - Error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bt510_core::DongleConfig;
//! use bt510_dongle::AtTransport;
//! use std::time::Duration;
//!
//! # async fn example(port: tokio::io::DuplexStream) -> Result<(), bt510_dongle::DongleError> {
//! let (reader, writer) = tokio::io::split(port);
//! let transport = AtTransport::start(reader, writer, DongleConfig::default());
//!
//! transport.initialize().await?;
//! transport
//!     .connect("01c13a7e4118a2", Duration::from_secs(10))
//!     .await?;
//! // ... exchange JSON with the sensor ...
//! transport.disconnect().await;
//! transport.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod classifier;
pub mod commander;
mod commands;
pub mod connection;
pub mod error;
mod events;
pub mod protocol;
pub mod serial_json;
pub mod transport;

// Public API exports
pub use channel::JsonChannel;
pub use classifier::{Classified, DongleEvent, LineClassifier};
pub use commander::Commander;
pub use connection::ConnectionState;
pub use error::DongleError;
pub use serial_json::JsonSerialTransport;
pub use transport::AtTransport;
