//! The JSON packet seam between transports and the commander

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::DongleError;

/// A transport able to exchange JSON packets with a sensor.
///
/// Two independent implementations exist: the VSP link through the BL65x
/// dongle ([`crate::AtTransport`]) and a direct bench UART
/// ([`crate::JsonSerialTransport`]).
#[async_trait]
pub trait JsonChannel: Send + Sync {
    /// Send one JSON text. Transports without flow control honor `delay`
    /// before writing.
    async fn send_json(&self, text: &str, delay: Duration) -> Result<(), DongleError>;

    /// Receive the next decoded JSON packet, or `None` after `limit`.
    async fn recv_json(&self, limit: Duration) -> Option<Value>;
}
