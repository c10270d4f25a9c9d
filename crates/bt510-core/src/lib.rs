//! Core protocol types for the Laird Sentrius BT510 sensor
//!
//! This crate holds everything that can be expressed without I/O: the
//! advertisement and scan-response decoders, the alarm flags bit-field,
//! sensor event interpretation, event log decoding, JSON-RPC envelopes,
//! and host-side configuration.
//!
//! ## Architecture
//!
//! - [`advertisement`] - Fixed-layout advertisement + scan-response decoding
//! - [`flags`] - The bit-packed alarm/state word
//! - [`event`] - Interpretation of advertisements as sensor events
//! - [`event_log`] - Stored event log decoding
//! - [`rpc`] - JSON-RPC 2.0 request/response envelopes
//! - [`config`] - Dongle and commander configuration
//! - [`error`] - Error types
//!
//! The transport that feeds these types lives in `bt510-dongle`.

pub mod advertisement;
pub mod config;
pub mod error;
pub mod event;
pub mod event_log;
pub mod flags;
pub mod rpc;

// Public API exports
pub use advertisement::{
    AdvHeader, AdvertisementReport, ScanResponse, VersionResponse, VspResponse,
};
pub use config::{CommanderConfig, DongleConfig};
pub use error::{ConfigError, DecodeError, RpcError};
pub use event::{MagnetState, ResetReason, SensorEvent, SensorEventKind};
pub use event_log::{record_count, EventLog, LoggedEvent};
pub use flags::SensorFlags;
pub use rpc::{RpcRequest, RpcResponse};
