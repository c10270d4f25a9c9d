//! Error types for BT510 protocol decoding

use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while decoding fixed-layout sensor data.
///
/// The advertisement decoder recovers from all of these internally and folds
/// them into validity flags; they surface directly only from the event log
/// decoder and the JSON-RPC response parser.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("buffer too short: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("invalid UTF-8 in name field")]
    InvalidUtf8,

    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("event data length {0} is not a multiple of the record size")]
    BadEventSize(usize),

    #[error("decoded length {got} does not match stated size {stated}")]
    SizeMismatch { stated: usize, got: usize },
}

/// Errors raised while interpreting a JSON-RPC response envelope.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("response is neither a result nor an error object")]
    Malformed,

    #[error("response field `{0}` missing or of unexpected type")]
    UnexpectedField(&'static str),
}

/// Errors raised while loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration file: {0}")]
    Json(#[from] serde_json::Error),
}
