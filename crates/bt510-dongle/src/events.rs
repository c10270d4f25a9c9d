//! The event dispatcher
//!
//! Spontaneous dongle events are handled on their own task so the reader
//! never blocks on anything but the transport read. Each event is handled
//! inside its own failure boundary: a failed passkey answer is logged and
//! the loop moves on.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::classifier::DongleEvent;
use crate::protocol::{PASSKEY_RESPONSE_TIMEOUT, SUCCESS_PREFIX};
use crate::transport::Shared;

/// Drain the event queue until the shutdown sentinel arrives.
pub(crate) async fn run_dispatcher(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<DongleEvent>,
) {
    while shared.alive.load(Ordering::SeqCst) {
        let Some(event) = events.recv().await else {
            break;
        };
        match event {
            DongleEvent::Shutdown => break,
            DongleEvent::NoCarrier(line) => {
                shared.vsp_connected.store(false, Ordering::SeqCst);
                info!("disconnected ({line})");
            }
            DongleEvent::PasskeyRequest(_) => {
                let cmd = format!("AT+PRSP 1,{}", shared.config.passkey);
                match shared
                    .command(&cmd, SUCCESS_PREFIX, PASSKEY_RESPONSE_TIMEOUT)
                    .await
                {
                    Ok(_) => debug!("passkey response accepted"),
                    Err(err) => info!("failed to encrypt: {err}"),
                }
            }
        }
    }
    debug!("event dispatcher stopped");
}
