//! Host-side configuration
//!
//! Plain JSON files with every key optional; missing keys keep their
//! defaults so the same file can be shared between tools that only care
//! about a subset.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ----------------------------------------------------------------------------
// Dongle Configuration
// ----------------------------------------------------------------------------

/// Configuration for the BL65x dongle transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DongleConfig {
    /// Known sensor addresses, as reported in advertisements.
    pub bd_addrs: Vec<String>,
    /// Which of `bd_addrs` to talk to.
    pub bd_addr_index: usize,
    /// Requested BLE connection interval in microseconds.
    #[serde(rename = "ble_connection_interval_us")]
    pub connection_interval_us: u32,
    #[serde(rename = "disconnect_timeout")]
    pub disconnect_timeout_secs: f64,
    #[serde(rename = "connection_timeout")]
    pub connection_timeout_secs: f64,
    /// Fixed numeric passkey sent in answer to pairing prompts.
    pub passkey: u32,
    /// Per-step timeout for the pairing fallback sequence.
    #[serde(rename = "pairing_step")]
    pub pairing_step_secs: f64,
    /// Number of `^` characters in the VSP disconnect escape sequence.
    pub escape_count: u32,
    /// Spacing between escape characters in milliseconds.
    pub escape_delay_ms: u64,
}

impl Default for DongleConfig {
    fn default() -> Self {
        Self {
            bd_addrs: Vec::new(),
            bd_addr_index: 0,
            connection_interval_us: 30_000,
            disconnect_timeout_secs: 10.0,
            connection_timeout_secs: 10.0,
            passkey: 123_456,
            pairing_step_secs: 2.0,
            escape_count: 4,
            escape_delay_ms: 300,
        }
    }
}

impl DongleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file, keeping defaults for absent keys.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// The currently selected sensor address.
    pub fn current_address(&self) -> Option<&str> {
        self.bd_addrs.get(self.bd_addr_index).map(String::as_str)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.disconnect_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection_timeout_secs)
    }

    pub fn pairing_step(&self) -> Duration {
        Duration::from_secs_f64(self.pairing_step_secs)
    }

    pub fn escape_delay(&self) -> Duration {
        Duration::from_millis(self.escape_delay_ms)
    }

    /// Set the passkey.
    pub fn with_passkey(mut self, passkey: u32) -> Self {
        self.passkey = passkey;
        self
    }

    /// Add a sensor address.
    pub fn with_address(mut self, addr: String) -> Self {
        self.bd_addrs.push(addr);
        self
    }
}

// ----------------------------------------------------------------------------
// Commander Configuration
// ----------------------------------------------------------------------------

/// Configuration for the JSON-RPC commander.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommanderConfig {
    /// Pause before each send; protects UARTs without flow control.
    #[serde(rename = "inter_message_delay")]
    pub inter_message_delay_secs: f64,
    /// How long a reboot takes before the sensor answers again.
    #[serde(rename = "reset_delay")]
    pub reset_delay_secs: f64,
    /// Settling time before commands that reset the sensor.
    #[serde(rename = "reset_after_write_delay")]
    pub reset_after_write_delay_secs: f64,
    /// How long to wait for each response packet.
    #[serde(rename = "get_queue_timeout")]
    pub response_timeout_secs: f64,
}

impl Default for CommanderConfig {
    fn default() -> Self {
        Self {
            inter_message_delay_secs: 0.01,
            reset_delay_secs: 10.0,
            reset_after_write_delay_secs: 2.0,
            response_timeout_secs: 2.0,
        }
    }
}

impl CommanderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn inter_message_delay(&self) -> Duration {
        Duration::from_secs_f64(self.inter_message_delay_secs)
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reset_delay_secs)
    }

    pub fn reset_after_write_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reset_after_write_delay_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.response_timeout_secs)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DongleConfig::default();
        assert_eq!(config.passkey, 123_456);
        assert_eq!(config.disconnect_timeout(), Duration::from_secs(10));
        assert_eq!(config.pairing_step(), Duration::from_secs(2));
        assert_eq!(config.escape_count, 4);
        assert!(config.current_address().is_none());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: DongleConfig = serde_json::from_str(
            r#"{"bd_addrs": ["01c13a7e4118a2"], "passkey": 999999, "disconnect_timeout": 5.5}"#,
        )
        .unwrap();
        assert_eq!(config.current_address(), Some("01c13a7e4118a2"));
        assert_eq!(config.passkey, 999_999);
        assert_eq!(config.disconnect_timeout(), Duration::from_secs_f64(5.5));
        assert_eq!(config.connection_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_address_selection() {
        let config: DongleConfig = serde_json::from_str(
            r#"{"bd_addrs": ["01aa", "01bb"], "bd_addr_index": 1}"#,
        )
        .unwrap();
        assert_eq!(config.current_address(), Some("01bb"));
    }

    #[test]
    fn test_commander_defaults() {
        let config = CommanderConfig::default();
        assert_eq!(config.inter_message_delay(), Duration::from_millis(10));
        assert_eq!(config.response_timeout(), Duration::from_secs(2));
    }
}
