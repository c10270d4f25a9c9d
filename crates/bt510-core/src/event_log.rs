//! Decoding of the sensor's stored event log
//!
//! `readLog` responses carry `[size, base64]` pairs; the decoded blob is a
//! run of fixed 8-byte records. The salt keeps records that share a
//! timestamp in order.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::debug;

use crate::error::DecodeError;
use crate::event::{MagnetState, ResetReason, SensorEventKind};

// ----------------------------------------------------------------------------
// Log Records
// ----------------------------------------------------------------------------

/// Size of one stored event record in bytes.
pub const EVENT_RECORD_SIZE: usize = 8;

/// Number of whole records in a stated log payload size, zero when the size
/// is not a record multiple.
pub fn record_count(size: usize) -> usize {
    if size % EVENT_RECORD_SIZE != 0 {
        0
    } else {
        size / EVENT_RECORD_SIZE
    }
}

/// One stored event: timestamp u32, data u16, type u8, salt u8,
/// little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggedEvent {
    pub timestamp: u32,
    pub data: u16,
    pub event_type: u8,
    pub salt: u8,
}

impl LoggedEvent {
    fn decode(b: &[u8; EVENT_RECORD_SIZE]) -> Self {
        Self {
            timestamp: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            data: u16::from_le_bytes([b[4], b[5]]),
            event_type: b[6],
            salt: b[7],
        }
    }

    pub fn kind(&self) -> Option<SensorEventKind> {
        SensorEventKind::from_u8(self.event_type)
    }

    /// Render the data field the way the event kind defines it.
    pub fn data_string(&self) -> String {
        let Some(kind) = self.kind() else {
            return "?".to_string();
        };
        if kind.carries_temperature() {
            format!("{}", f64::from(self.data as i16) / 100.0)
        } else if kind.carries_battery_voltage() {
            // Logged battery readings are millivolts.
            format!("{}", f64::from(self.data) / 1000.0)
        } else if kind == SensorEventKind::Magnet {
            match self.data & 0x1 {
                0 => format!("{:?}", MagnetState::Near),
                _ => format!("{:?}", MagnetState::Far),
            }
        } else if kind == SensorEventKind::Reset {
            match u8::try_from(self.data).ok().and_then(ResetReason::from_u8) {
                Some(reason) => format!("{reason:?}"),
                None => "?".to_string(),
            }
        } else {
            "-".to_string()
        }
    }
}

// ----------------------------------------------------------------------------
// Event Log
// ----------------------------------------------------------------------------

/// Accumulated decode of one or more `readLog` payloads.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    pub events: Vec<LoggedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `[size, base64]` pairs, appending the records in order.
    ///
    /// A base64 decode failure aborts the batch; entries whose stated size
    /// is not a record multiple or disagrees with the decoded length are
    /// skipped.
    pub fn parse(&mut self, entries: &[(usize, String)]) {
        for (size, b64) in entries {
            match self.push_entry(*size, b64) {
                Ok(count) => debug!("decoded {count} logged events"),
                Err(DecodeError::InvalidBase64(err)) => {
                    debug!("base64 decode error: {err}");
                    return;
                }
                Err(err) => debug!("event log entry skipped: {err}"),
            }
        }
    }

    /// Decode a single `[size, base64]` pair, returning the number of
    /// records appended.
    pub fn push_entry(&mut self, size: usize, b64: &str) -> Result<usize, DecodeError> {
        let buf = BASE64.decode(b64)?;
        if size % EVENT_RECORD_SIZE != 0 {
            return Err(DecodeError::BadEventSize(size));
        }
        if buf.len() != size {
            return Err(DecodeError::SizeMismatch {
                stated: size,
                got: buf.len(),
            });
        }

        let before = self.events.len();
        for chunk in buf.chunks_exact(EVENT_RECORD_SIZE) {
            let mut record = [0u8; EVENT_RECORD_SIZE];
            record.copy_from_slice(chunk);
            self.events.push(LoggedEvent::decode(&record));
        }
        Ok(self.events.len() - before)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // {"jsonrpc": "2.0", "id": 2, "result": [16, "kd7OXWsJAQCR3s5dwgsMAQ=="]}
    const SAMPLE: &str = "kd7OXWsJAQCR3s5dwgsMAQ==";

    #[test]
    fn test_sample_pair_decodes_two_records() {
        let mut log = EventLog::new();
        log.parse(&[(16, SAMPLE.to_string())]);
        assert_eq!(log.events.len(), 2);

        let first = log.events[0];
        assert_eq!(first.timestamp, 1_573_838_481);
        assert_eq!(first.data, 2411);
        assert_eq!(first.kind(), Some(SensorEventKind::Temperature));
        assert_eq!(first.salt, 0);
        assert_eq!(first.data_string(), "24.11");

        let second = log.events[1];
        assert_eq!(second.timestamp, 1_573_838_481);
        assert_eq!(second.kind(), Some(SensorEventKind::BatteryGood));
        assert_eq!(second.salt, 1);
        assert_eq!(second.data_string(), "3.01");
    }

    #[test]
    fn test_size_not_record_multiple_skipped() {
        let mut log = EventLog::new();
        log.parse(&[(12, SAMPLE.to_string()), (16, SAMPLE.to_string())]);
        // The bad entry is skipped; the good one still decodes.
        assert_eq!(log.events.len(), 2);
    }

    #[test]
    fn test_stated_size_mismatch_skipped() {
        let mut log = EventLog::new();
        assert!(matches!(
            log.push_entry(8, SAMPLE),
            Err(DecodeError::SizeMismatch { stated: 8, got: 16 })
        ));
        assert!(log.events.is_empty());
    }

    #[test]
    fn test_bad_base64_aborts_batch() {
        let mut log = EventLog::new();
        log.parse(&[
            ("not-base64!".len(), "not-base64!".to_string()),
            (16, SAMPLE.to_string()),
        ]);
        assert!(log.events.is_empty());
    }

    #[test]
    fn test_record_count() {
        assert_eq!(record_count(16), 2);
        assert_eq!(record_count(0), 0);
        assert_eq!(record_count(12), 0);
    }

    #[test]
    fn test_negative_temperature_rendering() {
        let event = LoggedEvent {
            timestamp: 0,
            data: 0xFF9C, // -100 as i16
            event_type: SensorEventKind::Temperature as u8,
            salt: 0,
        };
        assert_eq!(event.data_string(), "-1");
    }
}
