//! Typed AT command helpers
//!
//! Thin wrappers over [`AtTransport::command`] for the handful of dongle
//! commands the host actually uses, plus the post-open initialization
//! sequence.

use tracing::{debug, info};

use crate::error::DongleError;
use crate::protocol::{
    DEFAULT_COMMAND_TIMEOUT, ERROR_PREFIX, ESCAPE_GUARD_MS, SCAN_COMMAND_TIMEOUT, SUCCESS_PREFIX,
};
use crate::transport::AtTransport;

impl AtTransport {
    /// Send a command with the default `OK` terminal prefix and budget.
    pub async fn command_ok(&self, cmd: &str) -> Result<Vec<String>, DongleError> {
        self.command(cmd, SUCCESS_PREFIX, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    /// Soft-reset the radio.
    ///
    /// The reset only works while the radio is not in a connection; a
    /// stuck dongle has to be re-plugged.
    pub async fn reset(&self) -> Result<Vec<String>, DongleError> {
        self.command_ok("ATZ").await
    }

    /// Persist the S-registers.
    pub async fn save_settings(&self) -> Result<Vec<String>, DongleError> {
        self.command_ok("AT&W").await
    }

    /// Query a device information field.
    pub async fn ati(&self, index: u32) -> Result<Vec<String>, DongleError> {
        self.command_ok(&format!("ATI {index}")).await
    }

    /// The dongle's own Bluetooth address.
    pub async fn mac_address(&self) -> Result<Vec<String>, DongleError> {
        self.ati(4).await
    }

    /// Read an S-register, returning the reported value line.
    pub async fn attribute(&self, attribute: u32) -> Result<Option<String>, DongleError> {
        let lines = self.command_ok(&format!("ATS {attribute}?")).await?;
        Ok(lines
            .into_iter()
            .find(|line| !line.starts_with(SUCCESS_PREFIX) && !line.starts_with(ERROR_PREFIX)))
    }

    /// Write an S-register.
    pub async fn set_attribute(&self, attribute: u32, value: i64) -> Result<Vec<String>, DongleError> {
        self.command_ok(&format!("ATS {attribute}={value}")).await
    }

    /// Start a BLE scan; advertisement lines then arrive on the scan
    /// queue.
    pub async fn scan(
        &self,
        duration_secs: u32,
        name_match: &str,
        rssi_threshold: i32,
    ) -> Result<Vec<String>, DongleError> {
        debug!("starting scan for {name_match:?}");
        self.command(
            &format!("AT+LSCN {duration_secs},\"{name_match}\",{rssi_threshold}"),
            SUCCESS_PREFIX,
            SCAN_COMMAND_TIMEOUT,
        )
        .await
    }

    /// Cancel a running scan.
    pub async fn cancel_scan(&self) -> Result<Vec<String>, DongleError> {
        debug!("stopping scan");
        self.command("AT+LSCNX", SUCCESS_PREFIX, SCAN_COMMAND_TIMEOUT)
            .await
    }

    /// Initialize the radio after the serial port is opened.
    pub async fn initialize(&self) -> Result<(), DongleError> {
        self.reset().await?;
        debug!("radio reset");
        debug!("dongle BD address: {:?}", self.mac_address().await?);

        debug!("initializing radio");
        // Max bi-directional throughput and DLE (bits 3 and 4 set).
        self.set_attribute(100, 24).await?;
        // Enable disconnect via the escape sequence.
        self.set_attribute(109, -1).await?;
        self.set_attribute(111, i64::from(self.config().escape_count))
            .await?;
        self.set_attribute(210, ESCAPE_GUARD_MS).await?;
        // Minimum and maximum connection interval in microseconds.
        let interval = i64::from(self.config().connection_interval_us);
        self.set_attribute(300, interval).await?;
        self.set_attribute(301, interval).await?;

        // PairingIoCapability 4 = keyboard + display; cannot be changed
        // on the fly, so a differing value costs a save and reset.
        if self.attribute(107).await?.as_deref() != Some("4") {
            self.set_attribute(107, 4).await?;
            self.save_settings().await?;
            self.reset().await?;
        }

        // Return advertisement data when scanning.
        self.command("AT+SFMT 1", SUCCESS_PREFIX, DEFAULT_COMMAND_TIMEOUT)
            .await?;
        info!("radio initialized");
        Ok(())
    }
}
