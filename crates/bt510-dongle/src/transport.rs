//! The AT transport engine
//!
//! One reader task owns the incoming byte stream and feeds the classifier;
//! it must never block on anything but the transport read. Classified
//! messages fan out into per-purpose queues. Outgoing commands are
//! serialized by a single lock that also owns the response queue's
//! receiving end, so response lines can only ever be matched to the one
//! command in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bt510_core::DongleConfig;

use crate::channel::JsonChannel;
use crate::classifier::{Classified, DongleEvent, LineClassifier};
use crate::connection::ConnectionState;
use crate::error::DongleError;
use crate::events;
use crate::protocol::ERROR_PREFIX;

// ----------------------------------------------------------------------------
// Signals
// ----------------------------------------------------------------------------

/// A set/clear condition that waiters can block on with a timeout.
pub(crate) struct Signal {
    tx: watch::Sender<bool>,
}

impl Signal {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub(crate) fn set(&self) {
        self.tx.send_replace(true);
    }

    pub(crate) fn clear(&self) {
        self.tx.send_replace(false);
    }

    /// Wait until the signal is set, returning false on timeout.
    pub(crate) async fn wait(&self, limit: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        let result = matches!(timeout(limit, rx.wait_for(|set| *set)).await, Ok(Ok(_)));
        result
    }
}

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

/// The write half plus the response queue consumer. Holding both under one
/// lock is what serializes commands and pins response lines to the single
/// command in flight.
pub(crate) struct IoHalf {
    pub(crate) writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub(crate) responses: mpsc::UnboundedReceiver<String>,
}

/// State shared between the transport handle, the reader task, and the
/// event dispatcher.
pub(crate) struct Shared {
    pub(crate) io: Mutex<IoHalf>,
    pub(crate) config: DongleConfig,
    pub(crate) vsp_connected: AtomicBool,
    pub(crate) allow_plain_fallback: AtomicBool,
    pub(crate) alive: AtomicBool,
    pub(crate) pairing_done: Signal,
    pub(crate) no_carrier: Signal,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) events_tx: mpsc::UnboundedSender<DongleEvent>,
    json_packets: Mutex<mpsc::UnboundedReceiver<Value>>,
    advertisements: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl Shared {
    /// Send one AT command and collect response lines until a terminal
    /// prefix arrives or the budget runs out.
    pub(crate) async fn command(
        &self,
        cmd: &str,
        expect: &str,
        limit: Duration,
    ) -> Result<Vec<String>, DongleError> {
        let mut io = self.io.lock().await;
        debug!(command = cmd, "sending AT command");
        io.writer.write_all(format!("{cmd}\r").as_bytes()).await?;
        io.writer.flush().await?;

        let deadline = Instant::now() + limit;
        let mut lines = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match timeout(remaining, io.responses.recv()).await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(DongleError::LinkClosed),
                Err(_) => {
                    return Err(DongleError::CommandTimeout {
                        command: cmd.to_string(),
                    })
                }
            };
            let terminal = line.starts_with(expect) || line.starts_with(ERROR_PREFIX);
            lines.push(line);
            if terminal {
                return Ok(lines);
            }
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

// ----------------------------------------------------------------------------
// AT Transport
// ----------------------------------------------------------------------------

/// Handle to a running AT transport.
///
/// Constructed with [`AtTransport::start`]; dropped tasks are cleaned up by
/// [`AtTransport::stop`], which must be awaited for an orderly teardown.
pub struct AtTransport {
    pub(crate) shared: Arc<Shared>,
    cancel: CancellationToken,
    reader_task: JoinHandle<()>,
    event_task: JoinHandle<()>,
}

impl AtTransport {
    /// Start the transport over the given byte stream halves.
    pub fn start<R, W>(reader: R, writer: W, config: DongleConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ads_tx, ads_rx) = mpsc::unbounded_channel();
        let (json_tx, json_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        let shared = Arc::new(Shared {
            io: Mutex::new(IoHalf {
                writer: Box::new(writer),
                responses: responses_rx,
            }),
            config,
            vsp_connected: AtomicBool::new(false),
            allow_plain_fallback: AtomicBool::new(true),
            alive: AtomicBool::new(true),
            pairing_done: Signal::new(),
            no_carrier: Signal::new(),
            state: state_tx,
            events_tx: events_tx.clone(),
            json_packets: Mutex::new(json_rx),
            advertisements: Mutex::new(ads_rx),
        });

        let cancel = CancellationToken::new();
        let reader_task = tokio::spawn(run_reader(
            reader,
            shared.clone(),
            ReaderChannels {
                responses: responses_tx,
                events: events_tx,
                advertisements: ads_tx,
                json_packets: json_tx,
            },
            cancel.clone(),
        ));
        let event_task = tokio::spawn(events::run_dispatcher(shared.clone(), events_rx));

        Self {
            shared,
            cancel,
            reader_task,
            event_task,
        }
    }

    /// Stop both background tasks and wait for them to finish.
    pub async fn stop(self) {
        self.shared.alive.store(false, Ordering::SeqCst);
        let _ = self.shared.events_tx.send(DongleEvent::Shutdown);
        self.cancel.cancel();
        if let Err(err) = self.reader_task.await {
            warn!("reader task ended abnormally: {err}");
        }
        if let Err(err) = self.event_task.await {
            warn!("event dispatcher ended abnormally: {err}");
        }
    }

    /// Send one AT command and wait for its response lines.
    ///
    /// Lines accumulate until one starts with `expect` or with `ERROR`;
    /// both are terminal and returned to the caller. Only silence past
    /// `limit` is an error.
    pub async fn command(
        &self,
        cmd: &str,
        expect: &str,
        limit: Duration,
    ) -> Result<Vec<String>, DongleError> {
        self.shared.command(cmd, expect, limit).await
    }

    /// Whether a VSP connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.shared.vsp_connected.load(Ordering::SeqCst)
    }

    /// Re-arm the plain-mode pairing fallback. Needed when connecting to
    /// multiple sensors in one session: each new device gets one pairing
    /// attempt.
    pub fn allow_pairing(&self) {
        self.shared.allow_plain_fallback.store(true, Ordering::SeqCst);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Subscribe to connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// The configuration this transport was started with.
    pub fn config(&self) -> &DongleConfig {
        &self.shared.config
    }

    /// Pop the next advertisement line, waiting up to `limit`.
    pub async fn get_scan(&self, limit: Duration) -> Option<String> {
        let mut rx = self.advertisements().await;
        match timeout(limit, rx.recv()).await {
            Ok(line) => line,
            Err(_) => None,
        }
    }

    /// Pop the next JSON packet, waiting up to `limit`.
    pub async fn get_json(&self, limit: Duration) -> Option<Value> {
        let mut rx = self.shared.json_packets.lock().await;
        match timeout(limit, rx.recv()).await {
            Ok(packet) => packet,
            Err(_) => {
                warn!("get JSON timeout");
                None
            }
        }
    }

    async fn advertisements(
        &self,
    ) -> tokio::sync::MutexGuard<'_, mpsc::UnboundedReceiver<String>> {
        self.shared.advertisements.lock().await
    }

    /// Write raw VSP data to the connected sensor.
    pub async fn send_vsp(&self, text: &str) -> Result<(), DongleError> {
        if !self.is_connected() {
            warn!("attempt to send VSP data without a connection");
            return Err(DongleError::TransportUnavailable);
        }
        let mut io = self.shared.io.lock().await;
        io.writer.write_all(text.as_bytes()).await?;
        io.writer.flush().await?;
        Ok(())
    }

    /// Throw away stale response and JSON packets left over from a
    /// previous link.
    pub(crate) async fn drain_stale(&self) {
        let mut io = self.shared.io.lock().await;
        while io.responses.try_recv().is_ok() {}
        drop(io);
        let mut json = self.shared.json_packets.lock().await;
        while json.try_recv().is_ok() {}
    }
}

#[async_trait]
impl JsonChannel for AtTransport {
    async fn send_json(&self, text: &str, _delay: Duration) -> Result<(), DongleError> {
        // The BLE link has flow control; the inter-message delay is a
        // bench-UART concern.
        self.send_vsp(text).await
    }

    async fn recv_json(&self, limit: Duration) -> Option<Value> {
        self.get_json(limit).await
    }
}

// ----------------------------------------------------------------------------
// Reader Task
// ----------------------------------------------------------------------------

struct ReaderChannels {
    responses: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<DongleEvent>,
    advertisements: mpsc::UnboundedSender<String>,
    json_packets: mpsc::UnboundedSender<Value>,
}

/// Read bytes off the transport, classify them, and route the results.
async fn run_reader<R>(
    mut reader: R,
    shared: Arc<Shared>,
    channels: ReaderChannels,
    cancel: CancellationToken,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut classifier = LineClassifier::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!("transport closed");
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    warn!("transport read error: {err}");
                    break;
                }
            },
        };

        for message in classifier.feed(&buf[..n]) {
            match message {
                Classified::Response(line) => {
                    let _ = channels.responses.send(line);
                }
                Classified::Advertisement(line) => {
                    let _ = channels.advertisements.send(line);
                }
                Classified::Json(value) => {
                    let _ = channels.json_packets.send(value);
                }
                Classified::PairingComplete => shared.pairing_done.set(),
                Classified::Event(event) => {
                    if matches!(event, DongleEvent::NoCarrier(_)) {
                        shared.no_carrier.set();
                    }
                    let _ = channels.events.send(event);
                }
            }
        }
    }
    debug!("reader task stopped");
}
