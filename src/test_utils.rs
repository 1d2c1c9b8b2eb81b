//! Shared helpers for the unit tests.

use crate::mac_address::MacAddress;

pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
