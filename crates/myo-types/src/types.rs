//! Decoded read results from the Myo armband.

use core::fmt;

use bytes::Buf;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Minimum number of bytes in a basic-info payload.
pub const MIN_DEVICE_INFO_BYTES: usize = 14;

/// Minimum number of bytes in a firmware-version payload.
pub const MIN_FIRMWARE_VERSION_BYTES: usize = 8;

/// Basic device information read from the basic-info characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceInfo {
    /// Unique serial number.
    pub serial: [u8; 6],
    /// Pose that unlocks the device.
    pub unlock_pose: u16,
    /// Active classifier type.
    pub classifier_type: u8,
    /// Index of the active classifier.
    pub classifier_index: u8,
    /// Whether a custom classifier is stored on the device.
    pub has_custom_classifier: bool,
    /// Whether the device is currently streaming with indications.
    pub stream_indicating: u8,
    /// Hardware SKU.
    pub sku: u8,
    /// Reserved trailing bytes.
    pub reserved: Vec<u8>,
}

impl DeviceInfo {
    /// Parse a `DeviceInfo` from a basic-info payload.
    ///
    /// The byte format is:
    /// - bytes 0-5: serial number
    /// - bytes 6-7: unlock pose (u16 LE)
    /// - byte 8: classifier type
    /// - byte 9: classifier index
    /// - byte 10: has custom classifier (0 or 1)
    /// - byte 11: stream indicating
    /// - byte 12: SKU
    /// - bytes 13..: reserved
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::TruncatedPayload`] if `data` contains fewer than
    /// [`MIN_DEVICE_INFO_BYTES`] (14) bytes.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        if data.len() < MIN_DEVICE_INFO_BYTES {
            return Err(ParseError::truncated(MIN_DEVICE_INFO_BYTES, data.len()));
        }

        let mut buf = data;
        let mut serial = [0u8; 6];
        buf.copy_to_slice(&mut serial);
        let unlock_pose = buf.get_u16_le();
        let classifier_type = buf.get_u8();
        let classifier_index = buf.get_u8();
        let has_custom_classifier = buf.get_u8() != 0;
        let stream_indicating = buf.get_u8();
        let sku = buf.get_u8();

        Ok(DeviceInfo {
            serial,
            unlock_pose,
            classifier_type,
            classifier_index,
            has_custom_classifier,
            stream_indicating,
            sku,
            reserved: buf.to_vec(),
        })
    }

    /// The serial number as colon-separated hex, e.g. `"f3:f8:2e:fb:8c:3c"`.
    pub fn serial_string(&self) -> String {
        self.serial
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Firmware version read from the firmware-version characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FirmwareVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    /// Hardware revision of the board.
    pub hardware_rev: u16,
}

impl FirmwareVersion {
    /// Parse a `FirmwareVersion` from its 8-byte payload of big-endian `u16`
    /// fields: major, minor, patch, hardware revision.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::TruncatedPayload`] if `data` contains fewer than
    /// [`MIN_FIRMWARE_VERSION_BYTES`] (8) bytes.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        if data.len() < MIN_FIRMWARE_VERSION_BYTES {
            return Err(ParseError::truncated(MIN_FIRMWARE_VERSION_BYTES, data.len()));
        }

        let mut buf = data;
        Ok(FirmwareVersion {
            major: buf.get_u16(),
            minor: buf.get_u16(),
            patch: buf.get_u16(),
            hardware_rev: buf.get_u16(),
        })
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{} (hw rev {})",
            self.major, self.minor, self.patch, self.hardware_rev
        )
    }
}

/// Decode a basic-info payload.
pub fn decode_device_info(data: &[u8]) -> ParseResult<DeviceInfo> {
    DeviceInfo::from_bytes(data)
}

/// Decode a firmware-version payload.
pub fn decode_firmware_version(data: &[u8]) -> ParseResult<FirmwareVersion> {
    FirmwareVersion::from_bytes(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info_bytes() -> Vec<u8> {
        vec![
            0xf3, 0xf8, 0x2e, 0xfb, 0x8c, 0x3c, // serial
            0x01, 0x00, // unlock pose = 1
            0x02, // classifier type
            0x05, // classifier index
            0x01, // has custom classifier
            0x00, // stream indicating
            0x02, // sku
            0xAA, 0xBB, // reserved
        ]
    }

    #[test]
    fn test_parse_device_info() {
        let info = DeviceInfo::from_bytes(&sample_info_bytes()).unwrap();
        assert_eq!(info.serial, [0xf3, 0xf8, 0x2e, 0xfb, 0x8c, 0x3c]);
        assert_eq!(info.unlock_pose, 1);
        assert_eq!(info.classifier_type, 2);
        assert_eq!(info.classifier_index, 5);
        assert!(info.has_custom_classifier);
        assert_eq!(info.stream_indicating, 0);
        assert_eq!(info.sku, 2);
        assert_eq!(info.reserved, vec![0xAA, 0xBB]);
        assert_eq!(info.serial_string(), "f3:f8:2e:fb:8c:3c");
    }

    #[test]
    fn test_device_info_minimum_length() {
        let bytes = sample_info_bytes();
        let info = DeviceInfo::from_bytes(&bytes[..14]).unwrap();
        assert_eq!(info.reserved, vec![0xAA]);

        assert_eq!(
            DeviceInfo::from_bytes(&bytes[..13]),
            Err(ParseError::TruncatedPayload {
                expected: 14,
                actual: 13
            })
        );
        assert!(DeviceInfo::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_parse_firmware_version_big_endian() {
        let bytes = [0x00, 0x01, 0x00, 0x05, 0x07, 0xD0, 0x00, 0x02];
        let version = FirmwareVersion::from_bytes(&bytes).unwrap();
        assert_eq!(version.major, 1);
        assert_eq!(version.minor, 5);
        assert_eq!(version.patch, 2000);
        assert_eq!(version.hardware_rev, 2);
        assert_eq!(version.to_string(), "1.5.2000 (hw rev 2)");
    }

    #[test]
    fn test_firmware_version_truncated() {
        assert_eq!(
            decode_firmware_version(&[0, 1, 0, 5, 0, 1, 0]),
            Err(ParseError::truncated(8, 7))
        );
    }

    #[test]
    fn test_firmware_versions_order() {
        let old = FirmwareVersion {
            major: 1,
            minor: 1,
            patch: 0,
            hardware_rev: 1,
        };
        let new = FirmwareVersion { minor: 5, ..old };
        assert!(new > old);
    }
}
