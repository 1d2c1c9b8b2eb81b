//! Compact MAC address type for scale peripherals.
//!
//! Discovered scales are keyed by their Bluetooth address for the whole
//! lifetime of a scan or connection, so the address is stored as a plain
//! 6-byte array that hashes cheaply and is decoupled from any specific
//! Bluetooth library.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth MAC address stored as a compact 6-byte array.
///
/// This is the stable identity of a [`crate::device::ScaleDevice`]: no two
/// registry entries share an address within one scan. Its `Display` form is
/// the colon-separated uppercase spelling BlueZ uses, and is also how the
/// address is written to the remembered-device store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Reasons a scale address string failed to parse.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("malformed scale address: expected 6 octets, got {0}")]
    InvalidLength(usize),
    #[error("malformed scale address: octet {0} is not two digits")]
    InvalidPartLength(usize),
    #[error("malformed scale address: '{0}' is not valid hex")]
    InvalidHex(String),
}

impl FromStr for MacAddress {
    type Err = ParseMacError;

    /// Parse the colon-separated form, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let count = s.split(':').count();
        if count != 6 {
            return Err(ParseMacError::InvalidLength(count));
        }

        let mut octets = [0u8; 6];
        for (i, part) in s.split(':').enumerate() {
            if part.len() != 2 {
                return Err(ParseMacError::InvalidPartLength(i));
            }
            octets[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ParseMacError::InvalidHex(part.to_string()))?;
        }

        Ok(MacAddress(octets))
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<MacAddress> for bluer::Address {
    fn from(addr: MacAddress) -> Self {
        bluer::Address(addr.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WS300: MacAddress = MacAddress([0xC4, 0x7C, 0x8D, 0x6B, 0x42, 0x0F]);

    #[test]
    fn displays_in_bluez_uppercase_form() {
        assert_eq!(WS300.to_string(), "C4:7C:8D:6B:42:0F");
        assert_eq!(MacAddress([0; 6]).to_string(), "00:00:00:00:00:00");
    }

    #[test]
    fn parses_advertisement_addresses_in_either_case() {
        assert_eq!("C4:7C:8D:6B:42:0F".parse::<MacAddress>().unwrap(), WS300);
        assert_eq!("c4:7c:8d:6b:42:0f".parse::<MacAddress>().unwrap(), WS300);
    }

    #[test]
    fn round_trips_through_the_persisted_form() {
        let stored = WS300.to_string();
        assert_eq!(stored.parse::<MacAddress>().unwrap(), WS300);
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert_eq!(
            "C4:7C:8D".parse::<MacAddress>(),
            Err(ParseMacError::InvalidLength(3))
        );
        assert_eq!(
            "C4:7C:8D:6B:42:0F:11".parse::<MacAddress>(),
            Err(ParseMacError::InvalidLength(7))
        );
        assert_eq!(
            "C47:C8:D6:B4:20:0F".parse::<MacAddress>(),
            Err(ParseMacError::InvalidPartLength(0))
        );
        assert_eq!(
            "C4:7C:8D:6B:42:ZZ".parse::<MacAddress>(),
            Err(ParseMacError::InvalidHex("ZZ".into()))
        );
    }

    #[test]
    fn distinct_scales_key_separate_registry_slots() {
        use std::collections::HashMap;

        let sibling = MacAddress([0xC4, 0x7C, 0x8D, 0x6B, 0x42, 0x10]);
        let mut registry = HashMap::new();
        registry.insert(WS300, "WS-300");
        registry.insert(sibling, "LB-2000");
        assert_eq!(registry.get(&WS300), Some(&"WS-300"));
        assert_eq!(registry.len(), 2);
    }
}
