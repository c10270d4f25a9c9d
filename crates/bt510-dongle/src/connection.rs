//! Connection establishment and teardown
//!
//! The sensor only accepts a secured VSP connection from a bonded peer.
//! A fresh sensor therefore needs one plain-mode detour: connect without
//! VSP, pair, drop the link, and only then connect in VSP mode. The detour
//! is allowed once per session per sensor; `allow_pairing` re-arms it.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::DongleError;
use crate::protocol::{
    ESCAPE_CHAR, PLAIN_CONNECT_PREFIX, SECURE_CONNECT_PREFIX, SUCCESS_PREFIX,
};
use crate::transport::AtTransport;

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// States of the connection establishment sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    SecureConnecting,
    SecureConnected,
    PlainConnecting,
    Pairing,
    WaitingDisconnect,
    Disconnected,
    Failed,
}

// ----------------------------------------------------------------------------
// Connect / Disconnect
// ----------------------------------------------------------------------------

impl AtTransport {
    /// Connect to a sensor in VSP mode, pairing through a plain-mode
    /// detour when the direct attempt fails.
    ///
    /// Timeouts at the individual steps are converted into state
    /// transitions here; only the terminal outcome is returned.
    pub async fn connect(&self, addr: &str, limit: Duration) -> Result<(), DongleError> {
        if self.is_connected() {
            return Ok(());
        }
        self.drain_stale().await;

        self.shared.set_state(ConnectionState::SecureConnecting);
        info!("attempting to connect to {addr}");
        let first_failure = match self.try_secure_connect(addr, limit).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if !self
            .shared
            .allow_plain_fallback
            .swap(false, Ordering::SeqCst)
        {
            info!("already tried to connect in non-VSP mode");
            self.shared.set_state(ConnectionState::Failed);
            return Err(first_failure);
        }
        debug!("secure connect failed, falling back to pairing: {first_failure}");

        if let Err(err) = self.pair_via_plain_link(addr).await {
            self.shared.set_state(ConnectionState::Failed);
            return Err(err);
        }

        // Now that the sensor knows us, try VSP again. This second attempt
        // has no further fallback.
        self.shared.set_state(ConnectionState::SecureConnecting);
        match self.try_secure_connect(addr, limit).await {
            Ok(()) => Ok(()),
            Err(err) => {
                info!("secure connect after pairing failed: {err}");
                self.shared.set_state(ConnectionState::Failed);
                Err(DongleError::ConnectFailed(addr.to_string()))
            }
        }
    }

    async fn try_secure_connect(&self, addr: &str, limit: Duration) -> Result<(), DongleError> {
        let lines = self
            .command(&format!("ATD {addr}"), SECURE_CONNECT_PREFIX, limit)
            .await?;
        if !last_line_starts_with(&lines, SECURE_CONNECT_PREFIX) {
            return Err(DongleError::ConnectFailed(addr.to_string()));
        }
        self.shared.vsp_connected.store(true, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::SecureConnected);
        info!("connected in VSP mode");
        Ok(())
    }

    /// The plain-mode pairing detour: connect, pair, settle, disconnect,
    /// settle again.
    async fn pair_via_plain_link(&self, addr: &str) -> Result<(), DongleError> {
        let step = self.config().pairing_step();

        self.shared.set_state(ConnectionState::PlainConnecting);
        info!("attempting non-VSP connection");
        let lines = match self
            .command(&format!("AT+LCON {addr}"), PLAIN_CONNECT_PREFIX, step)
            .await
        {
            Ok(lines) => lines,
            Err(err) => {
                info!("unable to connect in non-VSP mode");
                return Err(err);
            }
        };
        if !last_line_starts_with(&lines, PLAIN_CONNECT_PREFIX) {
            info!("unable to connect in non-VSP mode");
            return Err(DongleError::ConnectFailed(addr.to_string()));
        }
        info!("connected in non-VSP mode");

        self.shared.set_state(ConnectionState::Pairing);
        self.shared.pairing_done.clear();
        let paired = self
            .command("AT+PAIR 1", SUCCESS_PREFIX, step)
            .await
            .map(|lines| last_line_starts_with(&lines, SUCCESS_PREFIX))
            .unwrap_or(false);
        if !paired {
            info!("unable to pair");
            return Err(DongleError::PairingFailed);
        }
        if !self.shared.pairing_done.wait(step).await {
            debug!("pairing-complete signal not seen within {step:?}");
        }
        // Closing the link too soon makes the sensor report a spurious
        // encryption failure, so settle before disconnecting.
        sleep(step).await;
        info!("encrypted in non-VSP mode");

        self.shared.set_state(ConnectionState::WaitingDisconnect);
        self.shared.no_carrier.clear();
        // Plain-mode links close with AT+LDSC, not the escape sequence.
        if self
            .command("AT+LDSC 1", SUCCESS_PREFIX, step)
            .await
            .is_err()
        {
            info!("unable to close non-VSP connection");
            return Err(DongleError::PairingFailed);
        }
        if !self
            .shared
            .no_carrier
            .wait(self.config().disconnect_timeout())
            .await
        {
            debug!("no disconnect notice within the disconnect timeout");
        }
        self.shared.set_state(ConnectionState::Disconnected);
        info!("closed non-VSP connection, retrying VSP now that pairing is done");
        // The radio needs this settling time before the next connection
        // attempt can succeed.
        sleep(step).await;
        Ok(())
    }

    /// Request a VSP disconnect with the escape sequence, best-effort.
    ///
    /// Does nothing outside VSP mode. The wait for the disconnect notice
    /// can time out without failing the caller.
    pub async fn disconnect(&self) {
        self.shared.no_carrier.clear();
        if !self.is_connected() {
            return;
        }
        {
            let mut io = self.shared.io.lock().await;
            debug!("requesting disconnect");
            let escape_delay = self.config().escape_delay();
            for i in 0..self.config().escape_count {
                if let Err(err) = io.writer.write_all(ESCAPE_CHAR).await {
                    warn!("escape sequence write failed: {err}");
                    break;
                }
                let _ = io.writer.flush().await;
                if i + 1 < self.config().escape_count {
                    sleep(escape_delay).await;
                }
            }
        }
        if self
            .shared
            .no_carrier
            .wait(self.config().disconnect_timeout())
            .await
        {
            // The dispatcher clears the flag too, but may still be behind
            // the notice we just observed.
            self.shared.vsp_connected.store(false, Ordering::SeqCst);
            self.shared.set_state(ConnectionState::Disconnected);
        } else {
            debug!("disconnect wait timed out");
        }
    }
}

fn last_line_starts_with(lines: &[String], prefix: &str) -> bool {
    lines.last().is_some_and(|line| line.starts_with(prefix))
}
