//! BLE discovery for weighing scales.
//!
//! The backend (BlueZ via `bluer`) streams raw advertisements over a channel;
//! this module holds the shared pieces: the [`ScaleFilter`] heuristic that
//! decides whether an advertisement plausibly comes from a scale, and the
//! [`DeviceRegistry`] that deduplicates sightings per address.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::config::Tunables;
use crate::device::ScaleDevice;
use crate::link::ADVERTISED_SCALE_SERVICES;
use crate::mac_address::MacAddress;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

#[cfg(feature = "bluer")]
impl From<::bluer::Error> for ScanError {
    fn from(err: ::bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Channel buffer size for advertisement events.
pub const SCAN_CHANNEL_BUFFER_SIZE: usize = 100;

/// One raw advertisement sighting. The backend sends these until the scan
/// window closes, then drops its sender; channel closure is the end-of-scan
/// signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub address: MacAddress,
    pub name: Option<String>,
    pub rssi: i16,
    pub service_uuids: Vec<Uuid>,
}

/// Name fragments that mark a peripheral as a scale. Vendor names cover the
/// models seen in the field; the generic words catch the rest.
const SCALE_NAME_TOKENS: [&str; 10] = [
    "scale",
    "weight",
    "balance",
    "kern",
    "mettler",
    "ohaus",
    "sartorius",
    "cas",
    "digi",
    "precision",
];

/// Model-number prefixes used by scales that do not spell out a vendor name
/// (e.g. "WS-300", "LB-2000").
const SCALE_NAME_PREFIXES: [&str; 2] = ["ws", "lb"];

/// Decides whether an advertisement plausibly belongs to a weighing scale.
///
/// A sighting passes when any of these holds:
/// 1. the advertised name contains a known scale token or model prefix,
/// 2. the advertised services intersect the known scale service UUIDs,
/// 3. the signal clears the RSSI floor.
///
/// The last rule keeps unbranded and nameless scales discoverable; the
/// floor keeps distant unrelated devices out of the list.
#[derive(Debug, Clone)]
pub struct ScaleFilter {
    rssi_floor: i16,
}

impl ScaleFilter {
    pub fn new(tunables: &Tunables) -> Self {
        ScaleFilter {
            rssi_floor: tunables.rssi_floor,
        }
    }

    pub fn matches(&self, event: &ScanEvent) -> bool {
        if let Some(name) = event.name.as_deref()
            && name_suggests_scale(name)
        {
            return true;
        }
        if event
            .service_uuids
            .iter()
            .any(|uuid| ADVERTISED_SCALE_SERVICES.contains(uuid))
        {
            return true;
        }
        event.rssi > self.rssi_floor
    }
}

fn name_suggests_scale(name: &str) -> bool {
    let lower = name.to_lowercase();
    SCALE_NAME_TOKENS.iter().any(|token| lower.contains(token))
        || SCALE_NAME_PREFIXES
            .iter()
            .any(|prefix| lower.starts_with(prefix))
}

/// Outcome of feeding one accepted sighting into the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryUpdate {
    /// First sighting of this address.
    New(ScaleDevice),
    /// Known address seen again with a stronger signal or a name it lacked.
    Updated(ScaleDevice),
    /// Known address, nothing worth re-announcing.
    Unchanged,
}

/// Deduplicates sightings per address across one scan window.
///
/// Cleared when a new scan starts so stale entries from a previous window
/// never resurface.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<MacAddress, ScaleDevice>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, address: &MacAddress) -> Option<&ScaleDevice> {
        self.devices.get(address)
    }

    /// Known devices, strongest signal first.
    pub fn devices(&self) -> Vec<ScaleDevice> {
        let mut list: Vec<ScaleDevice> = self.devices.values().cloned().collect();
        list.sort_by_key(|d| std::cmp::Reverse(d.rssi));
        list
    }

    /// Record one accepted sighting.
    pub fn upsert(&mut self, event: &ScanEvent) -> RegistryUpdate {
        match self.devices.get_mut(&event.address) {
            None => {
                let device = ScaleDevice::new(event.address, event.name.clone(), event.rssi);
                self.devices.insert(event.address, device.clone());
                RegistryUpdate::New(device)
            }
            Some(existing) => {
                let mut changed = false;
                if existing.name.is_none()
                    && let Some(name) = event.name.as_deref()
                    && !name.trim().is_empty()
                {
                    existing.name = Some(name.to_string());
                    changed = true;
                }
                // A weaker repeat sighting refreshes last_seen but keeps the
                // best signal reading seen so far.
                if event.rssi > existing.rssi {
                    existing.update_rssi(event.rssi);
                    changed = true;
                } else {
                    existing.last_seen = Instant::now();
                }
                if changed {
                    RegistryUpdate::Updated(existing.clone())
                } else {
                    RegistryUpdate::Unchanged
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ble_uuid16;
    use crate::test_utils::TEST_MAC;

    fn event(name: Option<&str>, rssi: i16) -> ScanEvent {
        ScanEvent {
            address: TEST_MAC,
            name: name.map(str::to_string),
            rssi,
            service_uuids: Vec::new(),
        }
    }

    fn filter() -> ScaleFilter {
        ScaleFilter::new(&Tunables::default())
    }

    #[test]
    fn name_tokens_match_case_insensitively() {
        for name in [
            "Kitchen Scale",
            "WEIGHT-PRO",
            "Balance 3000",
            "KERN EOB",
            "Mettler Toledo",
            "OHAUS Ranger",
            "Sartorius Entris",
            "CAS SW-1",
            "DIGI DS-781",
            "Precision PB",
        ] {
            assert!(filter().matches(&event(Some(name), -90)), "{name}");
        }
    }

    #[test]
    fn model_prefixes_match() {
        assert!(filter().matches(&event(Some("WS-300"), -90)));
        assert!(filter().matches(&event(Some("LB-2000"), -90)));
        // prefix, not substring
        assert!(!filter().matches(&event(Some("AWS Sensor"), -90)));
    }

    #[test]
    fn known_service_uuid_matches_without_a_name() {
        for short in [0xffc0u16, 0xff90, 0xffe0, 0x181d] {
            let mut ev = event(None, -90);
            ev.service_uuids = vec![ble_uuid16(short)];
            assert!(filter().matches(&ev), "{short:04x}");
        }
    }

    #[test]
    fn unrelated_service_uuid_does_not_match() {
        let mut ev = event(None, -90);
        ev.service_uuids = vec![ble_uuid16(0x180f)];
        assert!(!filter().matches(&ev));
    }

    #[test]
    fn strong_signal_clears_the_floor_with_or_without_a_name() {
        assert!(filter().matches(&event(Some("XY-9"), -65)));
        assert!(filter().matches(&event(None, -40)));
        // at or below the floor is out
        assert!(!filter().matches(&event(Some("XY-9"), -70)));
        assert!(!filter().matches(&event(None, -70)));
        assert!(!filter().matches(&event(None, -85)));
    }

    #[test]
    fn registry_reports_new_then_dedupes() {
        let mut registry = DeviceRegistry::new();
        let first = registry.upsert(&event(Some("WS-300"), -70));
        assert!(matches!(first, RegistryUpdate::New(ref d) if d.rssi == -70));
        assert_eq!(registry.len(), 1);

        // weaker repeat sighting refreshes last_seen but keeps the stored rssi
        let seen_before = registry.get(&TEST_MAC).unwrap().last_seen;
        assert_eq!(
            registry.upsert(&event(Some("WS-300"), -75)),
            RegistryUpdate::Unchanged
        );
        let after = registry.get(&TEST_MAC).unwrap();
        assert_eq!(after.rssi, -70);
        assert!(after.last_seen >= seen_before);

        // stronger sighting is announced
        let update = registry.upsert(&event(Some("WS-300"), -52));
        assert!(matches!(update, RegistryUpdate::Updated(ref d) if d.rssi == -52));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_backfills_a_late_name() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(&event(None, -60));
        assert!(registry.get(&TEST_MAC).unwrap().name.is_none());

        let update = registry.upsert(&event(Some("WS-300"), -60));
        assert!(
            matches!(update, RegistryUpdate::Updated(ref d) if d.name.as_deref() == Some("WS-300"))
        );
    }

    #[test]
    fn devices_are_sorted_strongest_first() {
        let mut registry = DeviceRegistry::new();
        let mut far = event(Some("Scale A"), -80);
        far.address = MacAddress([1, 2, 3, 4, 5, 6]);
        let near = event(Some("Scale B"), -50);
        registry.upsert(&far);
        registry.upsert(&near);

        let list = registry.devices();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name.as_deref(), Some("Scale B"));
        assert_eq!(list[1].name.as_deref(), Some("Scale A"));
    }

    #[test]
    fn clear_empties_the_registry() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(&event(Some("WS-300"), -60));
        assert!(!registry.is_empty());
        registry.clear();
        assert!(registry.is_empty());
    }
}
