//! Direct bench UART transport
//!
//! Used on the test fixture, where the sensor's UART is wired straight to
//! the host with no dongle in between. Only JSON packets flow here; there
//! is no AT layer and no connection management. The terminal inserts
//! newlines and may mix in other debug text, so the filter waits for a
//! complete line and only parses spans that mention a result or an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::JsonChannel;
use crate::error::DongleError;

// ----------------------------------------------------------------------------
// Frame Filter
// ----------------------------------------------------------------------------

/// Accumulates terminal output and extracts response packets.
#[derive(Debug, Default)]
struct JsonFrameFilter {
    text: String,
}

impl JsonFrameFilter {
    /// Feed bytes; returns a packet when one completes.
    fn feed(&mut self, data: &[u8]) -> Option<Value> {
        self.text.push_str(&String::from_utf8_lossy(data));

        // Wait for a finished line that contains a brace pair.
        if !self.text.contains("\r\n") || !self.text.contains('{') || !self.text.contains('}') {
            return None;
        }

        let start = self.text.find('{')?;
        let end = self.text.rfind('}')?;
        let mut packet = None;
        if end > start && (self.text.contains("result") || self.text.contains("error")) {
            match serde_json::from_str(&self.text[start..=end]) {
                Ok(value) => packet = Some(value),
                Err(err) => debug!("discarding unparseable packet: {err}"),
            }
        }
        self.text.clear();
        packet
    }
}

// ----------------------------------------------------------------------------
// Serial JSON Transport
// ----------------------------------------------------------------------------

struct SerialShared {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    json_packets: Mutex<mpsc::UnboundedReceiver<Value>>,
}

/// JSON transport over a direct serial line.
pub struct JsonSerialTransport {
    shared: Arc<SerialShared>,
    cancel: CancellationToken,
    reader_task: JoinHandle<()>,
}

impl JsonSerialTransport {
    /// Start the transport over the given byte stream halves.
    pub fn start<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (json_tx, json_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SerialShared {
            writer: Mutex::new(Box::new(writer) as Box<dyn AsyncWrite + Send + Unpin>),
            json_packets: Mutex::new(json_rx),
        });

        let cancel = CancellationToken::new();
        let reader_task = tokio::spawn(run_reader(reader, json_tx, cancel.clone()));

        Self {
            shared,
            cancel,
            reader_task,
        }
    }

    /// Stop the reader task and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(err) = self.reader_task.await {
            warn!("serial reader ended abnormally: {err}");
        }
    }
}

#[async_trait]
impl JsonChannel for JsonSerialTransport {
    async fn send_json(&self, text: &str, delay: Duration) -> Result<(), DongleError> {
        // The bench UART has no flow control; pausing before each send
        // keeps the sensor from dropping characters.
        sleep(delay).await;
        let mut writer = self.shared.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv_json(&self, limit: Duration) -> Option<Value> {
        let mut rx = self.shared.json_packets.lock().await;
        match timeout(limit, rx.recv()).await {
            Ok(packet) => packet,
            Err(_) => None,
        }
    }
}

async fn run_reader<R>(
    mut reader: R,
    json_tx: mpsc::UnboundedSender<Value>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut filter = JsonFrameFilter::default();
    let mut buf = [0u8; 1024];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    warn!("serial read error: {err}");
                    break;
                }
            },
        };
        if let Some(packet) = filter.feed(&buf[..n]) {
            let _ = json_tx.send(packet);
        }
    }
    debug!("serial reader stopped");
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waits_for_complete_line() {
        let mut filter = JsonFrameFilter::default();
        assert!(filter.feed(br#"{"result": "ok"}"#).is_none());
        let packet = filter.feed(b"\r\n").expect("packet after line end");
        assert_eq!(packet["result"], "ok");
    }

    #[test]
    fn test_debug_text_around_packet_ignored() {
        let mut filter = JsonFrameFilter::default();
        let packet = filter
            .feed(b"boot banner {\"result\": 7} trailing\r\n")
            .expect("packet");
        assert_eq!(packet["result"], 7);
    }

    #[test]
    fn test_non_response_json_dropped() {
        let mut filter = JsonFrameFilter::default();
        assert!(filter.feed(b"{\"status\": 1}\r\n").is_none());
        // The buffer is cleared either way.
        assert!(filter.text.is_empty());
    }
}
