//! JSON-RPC commander for the sensor's configuration interface
//!
//! Works over any [`JsonChannel`], so the same operations run through the
//! dongle's VSP link or a bench UART unchanged.

use serde_json::{json, Map, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use bt510_core::{CommanderConfig, RpcError, RpcRequest, RpcResponse};

use crate::channel::JsonChannel;
use crate::error::DongleError;

// ----------------------------------------------------------------------------
// Commander
// ----------------------------------------------------------------------------

/// Issues JSON-RPC requests to a sensor and interprets the responses.
pub struct Commander<C> {
    channel: C,
    config: CommanderConfig,
}

impl<C: JsonChannel> Commander<C> {
    pub fn new(channel: C, config: CommanderConfig) -> Self {
        Self { channel, config }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Send a request and wait for its response envelope.
    pub async fn roundtrip(&self, request: RpcRequest) -> Result<RpcResponse, DongleError> {
        let text = request.to_string();
        debug!("{text}");
        self.channel
            .send_json(&text, self.config.inter_message_delay())
            .await?;
        let value = self
            .channel
            .recv_json(self.config.response_timeout())
            .await
            .ok_or_else(|| DongleError::CommandTimeout {
                command: request.method().to_string(),
            })?;
        let response = RpcResponse::from_value(&value)?;
        if let RpcResponse::Error { code, message } = &response {
            warn!("sensor error {code}: {message}");
        }
        Ok(response)
    }

    /// Send a request that must answer with the plain `"ok"` result.
    async fn expect_ok(&self, request: RpcRequest) -> Result<(), DongleError> {
        let method = request.method().to_string();
        let response = self.roundtrip(request).await?;
        if response.is_ok_literal() {
            Ok(())
        } else {
            Err(rejected(&method, &response))
        }
    }

    // - - - attribute access

    /// Read a named attribute; the value comes back as a top-level field
    /// beside the `"ok"` result.
    pub async fn get_attribute(&self, name: &str) -> Result<Value, DongleError> {
        let response = self.roundtrip(RpcRequest::new("get").params(json!(name))).await?;
        if !response.is_ok_literal() {
            return Err(rejected("get", &response));
        }
        response
            .field(name)
            .cloned()
            .ok_or(DongleError::Rpc(RpcError::UnexpectedField("attribute")))
    }

    /// Write one or more named attributes.
    pub async fn set_attributes(&self, fields: Map<String, Value>) -> Result<(), DongleError> {
        self.expect_ok(RpcRequest::new("set").named_params(fields))
            .await
    }

    /// Unlock the configuration for writing.
    pub async fn unlock(&self) -> Result<(), DongleError> {
        self.set_lock(0).await
    }

    /// Lock the configuration.
    pub async fn lock(&self) -> Result<(), DongleError> {
        self.set_lock(1).await
    }

    async fn set_lock(&self, value: u32) -> Result<(), DongleError> {
        let mut fields = Map::new();
        fields.insert("lock".to_string(), json!(value));
        self.set_attributes(fields).await
    }

    // - - - clock

    pub async fn set_epoch(&self, epoch: u32) -> Result<(), DongleError> {
        self.expect_ok(RpcRequest::new("setEpoch").params(json!(epoch)))
            .await
    }

    pub async fn get_epoch(&self) -> Result<i64, DongleError> {
        let response = self.roundtrip(RpcRequest::new("getEpoch")).await?;
        Ok(response.result_i64()?)
    }

    // - - - diagnostics

    /// Flash the LEDs for `duration_ms`.
    pub async fn led_test(&self, duration_ms: u32) -> Result<(), DongleError> {
        self.expect_ok(RpcRequest::new("ledTest").params(json!(duration_ms)))
            .await
    }

    /// Dump the sensor's attribute table to its own debug console.
    pub async fn dump(&self) -> Result<(), DongleError> {
        self.expect_ok(RpcRequest::new("dump")).await
    }

    // - - - resets

    /// Reboot the sensor and wait out its startup time.
    pub async fn reboot(&self) -> Result<(), DongleError> {
        self.reset_command(RpcRequest::new("reboot")).await
    }

    /// Reboot into the bootloader.
    pub async fn enter_bootloader(&self) -> Result<(), DongleError> {
        self.reset_command(RpcRequest::new("reboot").params(json!(1)))
            .await
    }

    /// Restore factory configuration.
    pub async fn factory_reset(&self) -> Result<(), DongleError> {
        self.reset_command(RpcRequest::new("factoryReset")).await
    }

    async fn reset_command(&self, request: RpcRequest) -> Result<(), DongleError> {
        sleep(self.config.reset_after_write_delay()).await;
        self.expect_ok(request).await?;
        sleep(self.config.reset_delay()).await;
        Ok(())
    }

    // - - - event log

    /// Arrange the log for reading (FIFO order); returns the number of
    /// stored bytes.
    pub async fn prepare_log(&self) -> Result<i64, DongleError> {
        let response = self
            .roundtrip(RpcRequest::new("prepareLog").params(json!(0)))
            .await?;
        Ok(response.result_i64()?)
    }

    /// Read up to `count` bytes of the log as a `[size, base64]` pair.
    pub async fn read_log(&self, count: u32) -> Result<(usize, String), DongleError> {
        let response = self
            .roundtrip(RpcRequest::new("readLog").params(json!(count)))
            .await?;
        Ok(response.result_log_pair()?)
    }

    /// Acknowledge `count` read bytes; returns how many were dropped.
    pub async fn ack_log(&self, count: u32) -> Result<i64, DongleError> {
        let response = self
            .roundtrip(RpcRequest::new("ackLog").params(json!(count)))
            .await?;
        Ok(response.result_i64()?)
    }
}

fn rejected(method: &str, response: &RpcResponse) -> DongleError {
    match response {
        RpcResponse::Error { code, message } => {
            DongleError::Rejected(format!("{method}: {message} ({code})"))
        }
        RpcResponse::Ok { result, .. } => {
            DongleError::Rejected(format!("{method}: unexpected result {result}"))
        }
    }
}
