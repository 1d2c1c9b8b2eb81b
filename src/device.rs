//! Discovered scale peripheral.

use crate::mac_address::MacAddress;
use std::fmt;
use std::time::Instant;

/// Fallback display name for peripherals that do not advertise one.
pub const UNKNOWN_SCALE_NAME: &str = "Unknown Scale";

/// Signal quality bucket derived from the last observed RSSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl SignalQuality {
    /// Bucket an RSSI value (dBm). Thresholds follow the usual BLE rule of
    /// thumb: anything past -80 dBm is barely usable indoors.
    pub fn from_rssi(rssi: i16) -> Self {
        if rssi > -60 {
            SignalQuality::Excellent
        } else if rssi > -70 {
            SignalQuality::Good
        } else if rssi > -80 {
            SignalQuality::Fair
        } else {
            SignalQuality::Poor
        }
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalQuality::Excellent => "Excellent",
            SignalQuality::Good => "Good",
            SignalQuality::Fair => "Fair",
            SignalQuality::Poor => "Poor",
        };
        write!(f, "{s}")
    }
}

/// A weighing scale seen during discovery.
///
/// Created on the first advertisement that passes the scale heuristic and
/// updated in place (RSSI only) on repeat sightings. Identity is the address.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleDevice {
    pub address: MacAddress,
    pub name: Option<String>,
    pub rssi: i16,
    pub last_seen: Instant,
}

impl ScaleDevice {
    pub fn new(address: MacAddress, name: Option<String>, rssi: i16) -> Self {
        // Whitespace-only advertised names are as useless as no name
        let name = name.filter(|n| !n.trim().is_empty());
        ScaleDevice {
            address,
            name,
            rssi,
            last_seen: Instant::now(),
        }
    }

    /// Name to show a user: the advertised name or a fixed placeholder.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_SCALE_NAME)
    }

    pub fn signal_quality(&self) -> SignalQuality {
        SignalQuality::from_rssi(self.rssi)
    }

    pub fn update_rssi(&mut self, rssi: i16) {
        self.rssi = rssi;
        self.last_seen = Instant::now();
    }
}
