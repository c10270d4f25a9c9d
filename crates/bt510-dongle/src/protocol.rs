//! AT protocol constants for the BL65x dongle

use std::time::Duration;

// ----------------------------------------------------------------------------
// Response Prefixes
// ----------------------------------------------------------------------------

/// Default terminal prefix for command responses.
pub const SUCCESS_PREFIX: &str = "OK";

/// Terminal prefix for rejected commands. Terminal, but not an error in
/// itself; only silence is.
pub const ERROR_PREFIX: &str = "ERROR";

/// Printed when a VSP (secure) connection is established.
pub const SECURE_CONNECT_PREFIX: &str = "CONNECT";

/// Printed when a plain (non-VSP) connection is established.
pub const PLAIN_CONNECT_PREFIX: &str = "connect";

/// Prefix of advertisement report lines produced by `AT+SFMT 1` scanning.
pub const ADVERTISEMENT_PREFIX: &str = "AD";

/// Printed when the BLE link drops.
pub const NO_CARRIER_PREFIX: &str = "NOCARRIER";

/// Alternate disconnect notice.
pub const DISCONNECT_PREFIX: &str = "discon";

/// Printed when the peer asks for a passkey.
pub const PASSKEY_PREFIX: &str = "passkey?";

/// Printed when the link encryption state changes; signals that pairing
/// finished.
pub const ENCRYPT_PREFIX: &str = "encrypt";

// ----------------------------------------------------------------------------
// Timing and Escape Sequence
// ----------------------------------------------------------------------------

/// Default budget for one command/response exchange.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Budget for scan start/stop commands.
pub const SCAN_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Budget for answering a passkey prompt.
pub const PASSKEY_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// The character repeated to request a VSP disconnect.
pub const ESCAPE_CHAR: &[u8] = b"^";

/// Value programmed into S-register 210: the spacing the dongle requires
/// between escape characters, in milliseconds. The host writes them a
/// little further apart than this.
pub const ESCAPE_GUARD_MS: i64 = 250;
