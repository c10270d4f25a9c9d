//! Error types for the dongle transport

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the AT transport and its JSON command layer.
#[derive(Error, Debug)]
pub enum DongleError {
    #[error("AT command timeout for {command:?}")]
    CommandTimeout { command: String },

    #[error("write attempted without an active link")]
    TransportUnavailable,

    #[error("link closed while waiting for a response")]
    LinkClosed,

    #[error("connection to {0} failed")]
    ConnectFailed(String),

    #[error("pairing sequence did not complete")]
    PairingFailed,

    #[error("sensor rejected request: {0}")]
    Rejected(String),

    #[error("JSON-RPC response error: {0}")]
    Rpc(#[from] bt510_core::RpcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
