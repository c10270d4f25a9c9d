//! Interpretation of advertisements as sensor events
//!
//! Each valid advertisement carries one event record; the payload's meaning
//! depends on the record type (centi-degrees for the temperature family,
//! centi-volts for the battery family, and so on).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::advertisement::AdvertisementReport;

// ----------------------------------------------------------------------------
// Event Kinds
// ----------------------------------------------------------------------------

/// Sensor event types carried in the advertisement `record_type` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SensorEventKind {
    Reserved = 0,
    Temperature = 1,
    /// Magnet (or proximity) state change.
    Magnet = 2,
    Movement = 3,
    AlarmHighTemp1 = 4,
    AlarmHighTemp2 = 5,
    AlarmHighTempClear = 6,
    AlarmLowTemp1 = 7,
    AlarmLowTemp2 = 8,
    AlarmLowTempClear = 9,
    AlarmDeltaTemp = 10,
    AlarmTempRateOfChange = 11,
    BatteryGood = 12,
    AdvOnButton = 13,
    Reserved14 = 14,
    Impact = 15,
    BatteryBad = 16,
    Reset = 17,
}

impl SensorEventKind {
    /// Convert from the wire byte, returning None for unknown values.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Reserved),
            1 => Some(Self::Temperature),
            2 => Some(Self::Magnet),
            3 => Some(Self::Movement),
            4 => Some(Self::AlarmHighTemp1),
            5 => Some(Self::AlarmHighTemp2),
            6 => Some(Self::AlarmHighTempClear),
            7 => Some(Self::AlarmLowTemp1),
            8 => Some(Self::AlarmLowTemp2),
            9 => Some(Self::AlarmLowTempClear),
            10 => Some(Self::AlarmDeltaTemp),
            11 => Some(Self::AlarmTempRateOfChange),
            12 => Some(Self::BatteryGood),
            13 => Some(Self::AdvOnButton),
            14 => Some(Self::Reserved14),
            15 => Some(Self::Impact),
            16 => Some(Self::BatteryBad),
            17 => Some(Self::Reset),
            _ => None,
        }
    }

    /// Whether the payload is a temperature in hundredths of a degree.
    pub fn carries_temperature(self) -> bool {
        matches!(
            self,
            Self::Temperature
                | Self::AlarmHighTemp1
                | Self::AlarmHighTemp2
                | Self::AlarmHighTempClear
                | Self::AlarmLowTemp1
                | Self::AlarmLowTemp2
                | Self::AlarmLowTempClear
                | Self::AlarmDeltaTemp
                | Self::AlarmTempRateOfChange
        )
    }

    /// Whether the payload is a battery voltage.
    pub fn carries_battery_voltage(self) -> bool {
        matches!(self, Self::BatteryGood | Self::BatteryBad | Self::AdvOnButton)
    }
}

/// Magnet switch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MagnetState {
    Near = 0,
    Far = 1,
}

/// Reset reasons reported with [`SensorEventKind::Reset`] events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResetReason {
    PowerUp = 0,
    ResetPin = 1,
    Watchdog = 2,
    SoftwareRequest = 3,
    Lockup = 4,
    Off = 5,
    LpComp = 6,
    DebugInterface = 7,
    Nfc = 8,
    Vbus = 9,
    Unknown = 10,
}

impl ResetReason {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PowerUp),
            1 => Some(Self::ResetPin),
            2 => Some(Self::Watchdog),
            3 => Some(Self::SoftwareRequest),
            4 => Some(Self::Lockup),
            5 => Some(Self::Off),
            6 => Some(Self::LpComp),
            7 => Some(Self::DebugInterface),
            8 => Some(Self::Nfc),
            9 => Some(Self::Vbus),
            10 => Some(Self::Unknown),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Sensor Event State
// ----------------------------------------------------------------------------

/// Rolling event state built from successive advertisements.
///
/// Sensors repeat each advertisement many times; the record number
/// deduplicates them so consumers see one update per event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorEvent {
    pub epoch: u32,
    pub kind: SensorEventKind,
    pub number: u16,
    pub magnet_state: MagnetState,
    pub temperature: f64,
    pub battery_voltage: f64,
    pub reset_reason: ResetReason,
}

impl Default for SensorEvent {
    fn default() -> Self {
        Self {
            epoch: 0,
            kind: SensorEventKind::Reserved,
            number: 0,
            magnet_state: MagnetState::Far,
            temperature: 0.0,
            battery_voltage: 0.0,
            reset_reason: ResetReason::Unknown,
        }
    }
}

impl SensorEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one advertisement into a `SensorEvent`.
    pub fn from_report(report: &AdvertisementReport) -> Option<Self> {
        let mut event = Self::new();
        event.update(report).then_some(event)
    }

    /// Update the event state from a parsed advertisement.
    ///
    /// Returns false for invalid advertisements and for repeats of the
    /// record already seen.
    pub fn update(&mut self, report: &AdvertisementReport) -> bool {
        let Some(header) = report.header.as_ref().filter(|_| report.header_valid) else {
            debug!("advertisement not valid");
            return false;
        };
        if self.number == header.record_number {
            debug!("duplicate advertisement");
            return false;
        }

        self.number = header.record_number;
        self.epoch = header.epoch;

        match SensorEventKind::from_u8(header.record_type) {
            None => debug!("sensor event type {} not valid", header.record_type),
            Some(kind) => {
                self.kind = kind;
                if kind.carries_temperature() {
                    self.temperature = f64::from(header.payload as u16 as i16) / 100.0;
                } else if kind.carries_battery_voltage() {
                    self.battery_voltage = f64::from(header.payload as u16) / 100.0;
                } else if kind == SensorEventKind::Magnet {
                    self.magnet_state = if header.payload & 0x1 == 0 {
                        MagnetState::Near
                    } else {
                        MagnetState::Far
                    };
                } else if kind == SensorEventKind::Reset {
                    self.reset_reason = u8::try_from(header.payload)
                        .ok()
                        .and_then(ResetReason::from_u8)
                        .unwrap_or(ResetReason::Unknown);
                }
            }
        }

        true
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_event_from_capture() {
        let report = AdvertisementReport::parse(
            "0201061BFF7700010000000000A218417E3AC10C5B004E4B9D5DB60A00000011077C16A55EBA11CB920C497FB801119A560C0853656E74726975732D4254",
        );
        let event = SensorEvent::from_report(&report).expect("valid event");
        assert_eq!(event.kind, SensorEventKind::BatteryGood);
        assert_eq!(event.number, 0x5B);
        assert_eq!(event.epoch, 0x5D9D_4B4E);
        assert!((event.battery_voltage - 27.42).abs() < 1e-9);
    }

    #[test]
    fn test_temperature_event_from_capture() {
        let report = AdvertisementReport::parse(
            "0201061BFF77000100000002804AC50547A8C9011C016BD5EE5DC20900000110FFE400030000000104140000000312000809546573742D3461",
        );
        let event = SensorEvent::from_report(&report).expect("valid event");
        assert_eq!(event.kind, SensorEventKind::Temperature);
        assert!((event.temperature - 24.98).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_record_number_suppressed() {
        let report = AdvertisementReport::parse(
            "0201061BFF7700010000000000A218417E3AC10C5B004E4B9D5DB60A00000011077C16A55EBA11CB920C497FB801119A560C0853656E74726975732D4254",
        );
        let mut event = SensorEvent::new();
        assert!(event.update(&report));
        assert!(!event.update(&report));
    }

    #[test]
    fn test_invalid_report_ignored() {
        let report = AdvertisementReport::from_bytes(&[0u8; 8]);
        let mut event = SensorEvent::new();
        assert!(!event.update(&report));
        assert_eq!(event.kind, SensorEventKind::Reserved);
    }

    #[test]
    fn test_negative_temperature_payload() {
        // -1.00 C encodes as 0xFF9C in the low payload half.
        let mut buf = hex::decode(
            "0201061BFF7700010000000000A218417E3AC10C5B004E4B9D5DB60A00000011077C16A55EBA11CB920C497FB801119A560C0853656E74726975732D4254",
        )
        .unwrap();
        buf[19] = 1; // record_type = Temperature
        buf[26] = 0x9C;
        buf[27] = 0xFF;
        buf[28] = 0;
        buf[29] = 0;
        let report = AdvertisementReport::from_bytes(&buf);
        let event = SensorEvent::from_report(&report).expect("valid event");
        assert!((event.temperature + 1.0).abs() < 1e-9);
    }
}
