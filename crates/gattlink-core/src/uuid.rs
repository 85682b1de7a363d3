use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::UuidError;

/// Byte order used when materializing a 128-bit UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UuidByteOrder {
    /// Bytes reversed relative to the written string (on-air order).
    #[default]
    LittleEndian,
    /// Bytes kept in written order.
    BigEndian,
}

/// A GATT attribute UUID in one of the three sizes the host accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BleUuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128([u8; 16]),
}

impl BleUuid {
    /// Parses a hyphenated or unhyphenated hex UUID string.
    ///
    /// Hyphens are stripped and case is ignored. 4 hex digits yield a 16-bit
    /// UUID, 8 a 32-bit UUID and 32 a 128-bit UUID laid out per `order`.
    pub fn parse(input: &str, order: UuidByteOrder) -> Result<Self, UuidError> {
        if input.is_empty() {
            return Err(UuidError::Empty);
        }
        let normalized: String = input
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let digits = normalized.chars().count();
        if !matches!(digits, 4 | 8 | 32) {
            return Err(UuidError::InvalidLength(digits));
        }
        if !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(UuidError::InvalidHex);
        }

        match digits {
            4 => u16::from_str_radix(&normalized, 16)
                .map(BleUuid::Uuid16)
                .map_err(|_| UuidError::InvalidHex),
            8 => u32::from_str_radix(&normalized, 16)
                .map(BleUuid::Uuid32)
                .map_err(|_| UuidError::InvalidHex),
            _ => {
                let mut bytes = [0_u8; 16];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    let pair = &normalized[i * 2..i * 2 + 2];
                    *byte = u8::from_str_radix(pair, 16).map_err(|_| UuidError::InvalidHex)?;
                }
                if order == UuidByteOrder::LittleEndian {
                    bytes.reverse();
                }
                Ok(BleUuid::Uuid128(bytes))
            }
        }
    }

    /// Like [`BleUuid::parse`], but logs and returns `None` (a zero-length
    /// UUID) on failure.
    pub fn parse_lenient(input: &str, order: UuidByteOrder) -> Option<Self> {
        match Self::parse(input, order) {
            Ok(uuid) => Some(uuid),
            Err(err) => {
                warn!(uuid = input, %err, "rejecting uuid string");
                None
            }
        }
    }

    /// Length in bytes: 2, 4 or 16.
    pub fn byte_len(&self) -> usize {
        match self {
            BleUuid::Uuid16(_) => 2,
            BleUuid::Uuid32(_) => 4,
            BleUuid::Uuid128(_) => 16,
        }
    }

    /// Bytes as placed on the air: little-endian for the short forms, stored
    /// order for 128-bit UUIDs.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            BleUuid::Uuid16(v) => v.to_le_bytes().to_vec(),
            BleUuid::Uuid32(v) => v.to_le_bytes().to_vec(),
            BleUuid::Uuid128(b) => b.to_vec(),
        }
    }
}

impl fmt::Display for BleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleUuid::Uuid16(v) => write!(f, "0x{v:04x}"),
            BleUuid::Uuid32(v) => write!(f, "0x{v:08x}"),
            BleUuid::Uuid128(b) => {
                for (i, byte) in b.iter().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        f.write_str("-")?;
                    }
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NUS: &str = "6E400001-B5A3-F393-E0A9-E50E24DCCA9E";

    #[test]
    fn hyphens_do_not_change_128_bit_result() {
        for order in [UuidByteOrder::LittleEndian, UuidByteOrder::BigEndian] {
            let hyphenated = BleUuid::parse(NUS, order).expect("hyphenated");
            let plain = BleUuid::parse(&NUS.replace('-', ""), order).expect("plain");
            assert_eq!(hyphenated, plain);
        }
    }

    #[test]
    fn byte_order_flag_reverses_128_bit_bytes() {
        let BleUuid::Uuid128(be) = BleUuid::parse(NUS, UuidByteOrder::BigEndian).expect("be")
        else {
            panic!("expected 128-bit uuid");
        };
        let BleUuid::Uuid128(le) = BleUuid::parse(NUS, UuidByteOrder::LittleEndian).expect("le")
        else {
            panic!("expected 128-bit uuid");
        };
        assert_eq!(be[0], 0x6e);
        assert_eq!(be[15], 0x9e);
        let mut reversed = be;
        reversed.reverse();
        assert_eq!(le, reversed);
    }

    #[test]
    fn short_forms_parse_as_numbers() {
        assert_eq!(
            BleUuid::parse("1234", UuidByteOrder::default()),
            Ok(BleUuid::Uuid16(0x1234))
        );
        assert_eq!(
            BleUuid::parse("0000FEED", UuidByteOrder::default()),
            Ok(BleUuid::Uuid32(0xFEED))
        );
        assert_eq!(BleUuid::Uuid16(0x1234).to_bytes(), vec![0x34, 0x12]);
    }

    #[test]
    fn rejects_bad_lengths_and_digits() {
        assert_eq!(
            BleUuid::parse("xyz", UuidByteOrder::default()),
            Err(UuidError::InvalidLength(3))
        );
        assert_eq!(
            BleUuid::parse("12g4", UuidByteOrder::default()),
            Err(UuidError::InvalidHex)
        );
        assert_eq!(
            BleUuid::parse("", UuidByteOrder::default()),
            Err(UuidError::Empty)
        );
        assert_eq!(BleUuid::parse_lenient("xyz", UuidByteOrder::default()), None);
    }

    #[test]
    fn display_is_hyphenated_for_128_bit() {
        let uuid = BleUuid::parse(NUS, UuidByteOrder::BigEndian).expect("parse");
        assert_eq!(uuid.to_string(), "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
        assert_eq!(BleUuid::Uuid16(0x180d).to_string(), "0x180d");
    }
}
