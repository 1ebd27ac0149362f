//! Bluetooth UUIDs for the Myo armband.
//!
//! Every vendor characteristic shares one 128-bit template,
//! `d506XXXX-a904-deb9-4748-2c7f4a124842`, where `XXXX` is a four hex digit
//! short code. [`CharacteristicCode`] holds that short code and expands it.

use core::fmt;
use core::str::FromStr;

use uuid::{Uuid, uuid};

use crate::error::{ParseError, ParseResult};

/// Vendor UUID template with the variable segment zeroed.
pub const VENDOR_TEMPLATE: Uuid = uuid!("d5060000-a904-deb9-4748-2c7f4a124842");

/// Bit offset of the short code inside the template.
const CODE_SHIFT: u32 = 96;

/// Mask covering everything in the template except the short code.
const TEMPLATE_MASK: u128 = !(0xFFFF_u128 << CODE_SHIFT);

/// A four hex digit short code identifying a vendor characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicCode(u16);

impl CharacteristicCode {
    /// Create a code from its numeric value.
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// The numeric value of the code.
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Expand the code into its full 128-bit characteristic UUID.
    pub const fn uuid(self) -> Uuid {
        Uuid::from_u128(VENDOR_TEMPLATE.as_u128() | ((self.0 as u128) << CODE_SHIFT))
    }

    /// Recover the short code from a UUID built on the vendor template.
    ///
    /// Returns `None` for UUIDs outside the template (standard GATT UUIDs).
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        let raw = uuid.as_u128();
        if raw & TEMPLATE_MASK != VENDOR_TEMPLATE.as_u128() {
            return None;
        }
        Some(Self((raw >> CODE_SHIFT) as u16))
    }
}

impl FromStr for CharacteristicCode {
    type Err = ParseError;

    fn from_str(s: &str) -> ParseResult<Self> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidCodeFormat(s.to_string()));
        }
        u16::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| ParseError::InvalidCodeFormat(s.to_string()))
    }
}

impl fmt::Display for CharacteristicCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl From<CharacteristicCode> for Uuid {
    fn from(code: CharacteristicCode) -> Self {
        code.uuid()
    }
}

/// Expand a textual short code (e.g. `"0105"`) into its characteristic UUID.
///
/// # Errors
///
/// Returns [`ParseError::InvalidCodeFormat`] unless `code` is exactly four
/// hex digits.
///
/// ```
/// use myo_types::uuid::expand_characteristic;
///
/// let uuid = expand_characteristic("0401").unwrap();
/// assert_eq!(uuid.to_string(), "d5060401-a904-deb9-4748-2c7f4a124842");
/// ```
pub fn expand_characteristic(code: &str) -> ParseResult<Uuid> {
    code.parse::<CharacteristicCode>().map(CharacteristicCode::uuid)
}

// --- Myo vendor characteristic codes ---

/// Basic device information (serial, unlock pose, classifier, SKU).
pub const BASIC_INFO: CharacteristicCode = CharacteristicCode::new(0x0101);

/// Firmware version (major, minor, patch, hardware revision).
pub const FIRMWARE_VERSION: CharacteristicCode = CharacteristicCode::new(0x0201);

/// Command characteristic; every command frame is written here.
pub const COMMAND: CharacteristicCode = CharacteristicCode::new(0x0401);

/// The four rotating EMG data characteristics, in channel-group order.
pub const EMG_DATA: [CharacteristicCode; 4] = [
    CharacteristicCode::new(0x0105),
    CharacteristicCode::new(0x0205),
    CharacteristicCode::new(0x0305),
    CharacteristicCode::new(0x0405),
];

// --- Standard GATT characteristic UUIDs ---

/// Device name characteristic.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

/// Battery level characteristic.
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_command_uuid() {
        assert_eq!(
            COMMAND.uuid().to_string(),
            "d5060401-a904-deb9-4748-2c7f4a124842"
        );
    }

    #[test]
    fn test_emg_data_uuids() {
        let expected = [
            "d5060105-a904-deb9-4748-2c7f4a124842",
            "d5060205-a904-deb9-4748-2c7f4a124842",
            "d5060305-a904-deb9-4748-2c7f4a124842",
            "d5060405-a904-deb9-4748-2c7f4a124842",
        ];
        for (code, expected) in EMG_DATA.iter().zip(expected) {
            assert_eq!(code.uuid().to_string(), expected);
        }
    }

    #[test]
    fn test_expand_matches_string_substitution() {
        for code in ["0101", "0201", "0401", "0105", "abcd", "ABCD", "ffff", "0000"] {
            let expected = format!("d506{}-a904-deb9-4748-2c7f4a124842", code.to_lowercase());
            assert_eq!(expand_characteristic(code).unwrap().to_string(), expected);
        }
    }

    #[test]
    fn test_expand_rejects_malformed_codes() {
        for code in ["", "010", "01050", "01g5", " 105", "0x05"] {
            assert!(
                matches!(
                    expand_characteristic(code),
                    Err(ParseError::InvalidCodeFormat(_))
                ),
                "code {:?} should be rejected",
                code
            );
        }
    }

    #[test]
    fn test_from_uuid_round_trip() {
        assert_eq!(CharacteristicCode::from_uuid(COMMAND.uuid()), Some(COMMAND));
        assert_eq!(CharacteristicCode::from_uuid(BATTERY_LEVEL), None);
        assert_eq!(CharacteristicCode::from_uuid(DEVICE_NAME), None);
    }

    #[test]
    fn test_display_is_zero_padded() {
        assert_eq!(EMG_DATA[0].to_string(), "0105");
        assert_eq!(CharacteristicCode::new(0xa).to_string(), "000a");
    }

    #[test]
    fn test_known_codes_are_distinct() {
        let mut seen = HashSet::new();
        for code in [BASIC_INFO, FIRMWARE_VERSION, COMMAND]
            .into_iter()
            .chain(EMG_DATA)
        {
            assert!(seen.insert(code.uuid()), "duplicate uuid for {}", code);
        }
    }

    proptest! {
        #[test]
        fn prop_expansion_is_deterministic(code in any::<u16>()) {
            let text = format!("{:04x}", code);
            prop_assert_eq!(expand_characteristic(&text).unwrap(), expand_characteristic(&text).unwrap());
        }

        #[test]
        fn prop_expansion_is_injective(a in any::<u16>(), b in any::<u16>()) {
            prop_assume!(a != b);
            prop_assert_ne!(CharacteristicCode::new(a).uuid(), CharacteristicCode::new(b).uuid());
        }

        #[test]
        fn prop_from_uuid_inverts_expansion(code in any::<u16>()) {
            let code = CharacteristicCode::new(code);
            prop_assert_eq!(CharacteristicCode::from_uuid(code.uuid()), Some(code));
        }
    }
}
