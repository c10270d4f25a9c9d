//! BT510 advertisement and scan-response decoding
//!
//! The sensor broadcasts a fixed-layout manufacturer-specific advertisement
//! followed by a scan response that comes in one of two shapes, selected by
//! a single length byte. Decoding never fails outright: malformed input
//! produces a report with the validity flags cleared, mirroring how hosts
//! must tolerate whatever the radio hands them.

use tracing::debug;

use crate::error::DecodeError;
use crate::flags::SensorFlags;

// ----------------------------------------------------------------------------
// Wire Layout Constants
// ----------------------------------------------------------------------------

/// Fixed advertisement header length in bytes.
pub const ADV_HEADER_LEN: usize = 31;

/// Offset of the scan-response discriminant byte.
pub const RSP_START: usize = 31;

/// Discriminant value selecting the VSP scan-response shape.
const VSP_SHAPE_LENGTH: u8 = 0x11;

/// Offset of the name field relative to the end of the stated response.
const RSP_NAME_OFFSET: usize = 3;

/// The 128-bit VSP service UUID advertised by the sensor.
const VSP_UUID: [u8; 16] = [
    0x7c, 0x16, 0xa5, 0x5e, 0xba, 0x11, 0xcb, 0x92, 0x0c, 0x49, 0x7f, 0xb8, 0x01, 0x11, 0x9a,
    0x56,
];

// ----------------------------------------------------------------------------
// Advertisement Header
// ----------------------------------------------------------------------------

/// The fixed 31-byte advertisement header, little-endian throughout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvHeader {
    pub flags_length: u8,
    pub flags_adtype: u8,
    pub flags_data: u8,
    pub ms_length: u8,
    pub ms_adtype: u8,
    pub company_id: u16,
    pub protocol_id: u16,
    pub network_id: u16,
    pub flags: u16,
    pub bluetooth_address: [u8; 6],
    pub record_type: u8,
    pub record_number: u16,
    pub epoch: u32,
    pub payload: u32,
    pub reset_count: u8,
}

impl AdvHeader {
    /// Decode the header from the start of a raw advertisement buffer.
    pub fn decode(b: &[u8]) -> Result<Self, DecodeError> {
        if b.len() < ADV_HEADER_LEN {
            return Err(DecodeError::Truncated {
                needed: ADV_HEADER_LEN,
                got: b.len(),
            });
        }

        let mut bluetooth_address = [0u8; 6];
        bluetooth_address.copy_from_slice(&b[13..19]);

        Ok(Self {
            flags_length: b[0],
            flags_adtype: b[1],
            flags_data: b[2],
            ms_length: b[3],
            ms_adtype: b[4],
            company_id: u16::from_le_bytes([b[5], b[6]]),
            protocol_id: u16::from_le_bytes([b[7], b[8]]),
            network_id: u16::from_le_bytes([b[9], b[10]]),
            flags: u16::from_le_bytes([b[11], b[12]]),
            bluetooth_address,
            record_type: b[19],
            record_number: u16::from_le_bytes([b[20], b[21]]),
            epoch: u32::from_le_bytes([b[22], b[23], b[24], b[25]]),
            payload: u32::from_le_bytes([b[26], b[27], b[28], b[29]]),
            reset_count: b[30],
        })
    }

    /// Check the seven discriminator fields against their required values.
    pub fn is_valid(&self) -> bool {
        self.flags_length == 2
            && self.flags_adtype == 0x01
            && self.flags_data == 0x06
            && self.ms_length == 0x1B
            && self.ms_adtype == 0xFF
            && self.company_id == 0x0077
            && self.protocol_id == 0x0001
    }

    /// Render the device address as the byte-reversed lowercase hex string
    /// used everywhere on the host side.
    pub fn display_address(&self) -> String {
        let mut reversed = self.bluetooth_address;
        reversed.reverse();
        hex::encode(reversed)
    }
}

// ----------------------------------------------------------------------------
// Scan Response Shapes
// ----------------------------------------------------------------------------

/// Short scan-response shape carrying the VSP service UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VspResponse {
    pub vsp_length: u8,
    pub vsp_uuid_type: u8,
    pub vsp_uuid: [u8; 16],
    pub name_length: u8,
    pub name_type: u8,
}

impl VspResponse {
    const LEN: usize = 20;

    fn decode(b: &[u8]) -> Result<Self, DecodeError> {
        let end = RSP_START + Self::LEN;
        if b.len() < end {
            return Err(DecodeError::Truncated {
                needed: end,
                got: b.len(),
            });
        }
        let r = &b[RSP_START..end];

        let mut vsp_uuid = [0u8; 16];
        vsp_uuid.copy_from_slice(&r[2..18]);

        Ok(Self {
            vsp_length: r[0],
            vsp_uuid_type: r[1],
            vsp_uuid,
            name_length: r[18],
            name_type: r[19],
        })
    }

    fn is_valid(&self) -> bool {
        self.vsp_length == 0x11 && self.vsp_uuid_type == 0x07 && self.vsp_uuid == VSP_UUID
    }
}

/// Long scan-response shape carrying firmware, bootloader, and hardware
/// version information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionResponse {
    pub ms2_length: u8,
    pub ms2_type: u8,
    pub ms2_company_id: u16,
    pub protocol_id: u16,
    pub product_id: u16,
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub firmware_build: u8,
    pub firmware_type: u8,
    pub config_version: u8,
    pub bootloader_major: u8,
    pub bootloader_minor: u8,
    pub bootloader_build: u8,
    pub packed_hardware_version: u8,
    pub name_length: u8,
    pub name_type: u8,
}

impl VersionResponse {
    const LEN: usize = 19;

    fn decode(b: &[u8]) -> Result<Self, DecodeError> {
        let end = RSP_START + Self::LEN;
        if b.len() < end {
            return Err(DecodeError::Truncated {
                needed: end,
                got: b.len(),
            });
        }
        let r = &b[RSP_START..end];

        Ok(Self {
            ms2_length: r[0],
            ms2_type: r[1],
            ms2_company_id: u16::from_le_bytes([r[2], r[3]]),
            protocol_id: u16::from_le_bytes([r[4], r[5]]),
            product_id: u16::from_le_bytes([r[6], r[7]]),
            firmware_major: r[8],
            firmware_minor: r[9],
            firmware_build: r[10],
            firmware_type: r[11],
            config_version: r[12],
            bootloader_major: r[13],
            bootloader_minor: r[14],
            bootloader_build: r[15],
            packed_hardware_version: r[16],
            name_length: r[17],
            name_type: r[18],
        })
    }

    fn is_valid(&self) -> bool {
        self.ms2_length == 0x10
            && self.ms2_type == 0xFF
            && self.ms2_company_id == 0x00E4
            && self.protocol_id == 0x0003
            && self.product_id == 0
    }

    /// Split the packed hardware byte into its major (bits 3-7) and minor
    /// (bits 0-2) components.
    pub fn hardware_version(&self) -> String {
        format!(
            "{}.{}",
            (self.packed_hardware_version >> 3) & 0x1F,
            self.packed_hardware_version & 0x07
        )
    }
}

/// One of the two scan-response shapes, selected by the discriminant byte
/// at [`RSP_START`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResponse {
    Vsp(VspResponse),
    Versions(VersionResponse),
}

impl ScanResponse {
    fn is_valid(&self) -> bool {
        match self {
            Self::Vsp(r) => r.is_valid(),
            Self::Versions(r) => r.is_valid(),
        }
    }

    fn name_length(&self) -> u8 {
        match self {
            Self::Vsp(r) => r.name_length,
            Self::Versions(r) => r.name_length,
        }
    }
}

// ----------------------------------------------------------------------------
// Advertisement Report
// ----------------------------------------------------------------------------

/// Everything decoded from one received advertisement buffer.
///
/// `header_valid` is true iff all seven header discriminators match; no
/// other header field should drive decisions when it is false. The scan
/// response is decoded independently of header validity, and
/// `has_versions` is true only when the version shape was selected and its
/// own discriminators passed.
#[derive(Debug, Clone, Default)]
pub struct AdvertisementReport {
    pub header: Option<AdvHeader>,
    pub header_valid: bool,
    pub flags: Option<SensorFlags>,
    pub bd_addr: String,
    pub scan_response: Option<ScanResponse>,
    pub response_valid: bool,
    pub has_versions: bool,
    pub name: String,
}

impl AdvertisementReport {
    /// Decode a hex advertisement string as reported by `AD` scan lines.
    ///
    /// An odd number of hex digits is treated as empty input; some callers
    /// are known to deliver truncated buffers and the radio occasionally
    /// splits lines mid-byte.
    pub fn parse(hex_buf: &str) -> Self {
        let bytes = if hex_buf.len() % 2 == 0 {
            hex::decode(hex_buf).unwrap_or_default()
        } else {
            Vec::new()
        };
        debug!(
            "advertisement length {} -> {} bytes",
            hex_buf.len(),
            bytes.len()
        );
        Self::from_bytes(&bytes)
    }

    /// Decode a raw advertisement buffer.
    pub fn from_bytes(b: &[u8]) -> Self {
        let mut report = Self::default();

        match AdvHeader::decode(b) {
            Ok(header) => {
                report.header_valid = header.is_valid();
                if report.header_valid {
                    report.bd_addr = header.display_address();
                    report.flags = Some(SensorFlags::from_word(header.flags));
                }
                report.header = Some(header);
            }
            Err(err) => debug!("error parsing advertisement header: {err}"),
        }

        // The scan response is decoded regardless of header validity.
        match Self::decode_scan_response(b) {
            Ok((response, name)) => {
                report.response_valid = response.is_valid();
                report.has_versions =
                    report.response_valid && matches!(response, ScanResponse::Versions(_));
                report.name = name;
                report.scan_response = Some(response);
            }
            Err(err) => debug!("error parsing scan response: {err}"),
        }

        report
    }

    fn decode_scan_response(b: &[u8]) -> Result<(ScanResponse, String), DecodeError> {
        let discriminant = *b.get(RSP_START).ok_or(DecodeError::Truncated {
            needed: RSP_START + 1,
            got: b.len(),
        })?;

        let response = if discriminant == VSP_SHAPE_LENGTH {
            ScanResponse::Vsp(VspResponse::decode(b)?)
        } else {
            ScanResponse::Versions(VersionResponse::decode(b)?)
        };

        // The discriminant doubles as the stated response length; the name
        // sits past it, sized by the response's own name_length byte.
        let name_start = RSP_START + discriminant as usize + RSP_NAME_OFFSET;
        let name_len = usize::from(response.name_length()).saturating_sub(1);
        let name_bytes =
            b.get(name_start..name_start + name_len)
                .ok_or(DecodeError::Truncated {
                    needed: name_start + name_len,
                    got: b.len(),
                })?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| DecodeError::InvalidUtf8)?
            .to_string();

        Ok((response, name))
    }

    /// The address argument expected by the dongle's connect commands.
    pub fn at_address(&self) -> String {
        format!("01{}", self.bd_addr)
    }

    /// Hardware version as `"major.minor"`, or `"0.0"` when no version
    /// information was advertised.
    pub fn hardware_version(&self) -> String {
        match &self.scan_response {
            Some(ScanResponse::Versions(r)) if self.has_versions => r.hardware_version(),
            _ => "0.0".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
