//! GATT session wire layer.
//!
//! Vendors put the weight stream behind different service/characteristic
//! pairs, so the session walks one ordered candidate table instead of
//! hard-coding a layout. Everything stateful about a connection is expressed
//! as the [`LinkCommand`]/[`LinkEvent`] pair: a backend task owns the
//! physical link and translates its callbacks into `LinkEvent`s, the
//! supervisor answers with `LinkCommand`s. Resolution itself is a pure
//! function over a [`GattProfile`] snapshot so it is testable without a
//! radio.

#[cfg(feature = "bluer")]
pub mod bluer;

use thiserror::Error;
use uuid::Uuid;

/// Expand a 16-bit assigned number into a full UUID on the Bluetooth base.
pub const fn ble_uuid16(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_00805f9b34fb | ((short as u128) << 96))
}

/// One (service, weight characteristic) pair worth probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidatePair {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Ordered candidate table for locating the weight-notify characteristic.
///
/// The canonical vendor pair comes first, then the fallbacks observed on
/// other scale models, then the standard Weight Scale Service. This table is
/// the single source for characteristic resolution; nothing else in the
/// crate carries UUID lists.
pub const WEIGHT_CANDIDATES: [CandidatePair; 5] = [
    CandidatePair {
        service: ble_uuid16(0xffc0),
        characteristic: ble_uuid16(0xffc2),
    },
    CandidatePair {
        service: ble_uuid16(0xffc0),
        characteristic: ble_uuid16(0xffc1),
    },
    CandidatePair {
        service: ble_uuid16(0xff90),
        characteristic: ble_uuid16(0xff91),
    },
    CandidatePair {
        service: ble_uuid16(0xffe0),
        characteristic: ble_uuid16(0xffe4),
    },
    CandidatePair {
        service: ble_uuid16(0x181d),
        characteristic: ble_uuid16(0x2a9d),
    },
];

/// Scale service UUIDs accepted from advertisements (scan heuristic (b)).
pub const ADVERTISED_SCALE_SERVICES: [Uuid; 4] = [
    ble_uuid16(0xffc0),
    ble_uuid16(0xff90),
    ble_uuid16(0xffe0),
    ble_uuid16(0x181d),
];

/// Wake-up commands written after subscribing: start, then request weight.
pub const ACTIVATION_COMMANDS: [&[u8]; 2] = [&[0x05], &[0x04]];

/// Tare (zero) command byte, ASCII 'T'.
pub const TARE_COMMAND: [u8; 1] = [0x54];

/// One characteristic as discovered, with the properties the session cares
/// about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub notify: bool,
    pub write: bool,
    pub write_without_response: bool,
}

impl CharacteristicInfo {
    pub fn writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// One discovered service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// Plain-data snapshot of a peripheral's GATT layout, taken once service
/// discovery completes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GattProfile {
    pub services: Vec<ServiceInfo>,
}

impl GattProfile {
    fn characteristic(&self, service: Uuid, characteristic: Uuid) -> Option<&CharacteristicInfo> {
        self.services
            .iter()
            .find(|s| s.uuid == service)?
            .characteristics
            .iter()
            .find(|c| c.uuid == characteristic)
    }
}

/// A characteristic addressed by its owning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicTarget {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Outcome of candidate resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCharacteristics {
    /// Where weight notifications come from.
    pub weight: CharacteristicTarget,
    /// Where commands (activation, tare) go, when the scale accepts any.
    pub write: Option<CharacteristicTarget>,
}

/// Walk [`WEIGHT_CANDIDATES`] in order and settle on the first pair whose
/// characteristic exists and advertises NOTIFY.
///
/// The write target is the notify characteristic itself when writable,
/// otherwise the first writable characteristic in the matched service,
/// otherwise the first writable characteristic in any candidate service.
pub fn resolve_weight_characteristic(profile: &GattProfile) -> Option<ResolvedCharacteristics> {
    let (pair, info) = WEIGHT_CANDIDATES.iter().find_map(|pair| {
        let info = profile.characteristic(pair.service, pair.characteristic)?;
        info.notify.then_some((pair, *info))
    })?;

    let weight = CharacteristicTarget {
        service: pair.service,
        characteristic: pair.characteristic,
    };

    let write = if info.writable() {
        Some(weight)
    } else {
        let in_service = |service_uuid: Uuid| {
            let service = profile.services.iter().find(|s| s.uuid == service_uuid)?;
            service
                .characteristics
                .iter()
                .find(|c| c.writable())
                .map(|c| CharacteristicTarget {
                    service: service_uuid,
                    characteristic: c.uuid,
                })
        };
        in_service(pair.service).or_else(|| {
            WEIGHT_CANDIDATES
                .iter()
                .filter(|p| p.service != pair.service)
                .find_map(|p| in_service(p.service))
        })
    };

    Some(ResolvedCharacteristics { weight, write })
}

/// Commands the supervisor sends to the link task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Enable notifications on the resolved weight characteristic.
    Subscribe(CharacteristicTarget),
    /// Write command bytes to a characteristic. `acknowledged` writes report
    /// a rejection via [`LinkEvent::WriteFailed`]; the rest are best-effort.
    Write {
        target: CharacteristicTarget,
        payload: Vec<u8>,
        acknowledged: bool,
    },
    /// Tear the link down; the task acknowledges with [`LinkEvent::Down`].
    Close,
}

/// Everything a link task reports back, in the order the platform emits it:
/// up, name, services, subscribe ack, notifications, down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Physical link established.
    Up,
    /// Peripheral name became readable post-connect.
    NameResolved(String),
    /// Service discovery finished.
    Services(GattProfile),
    /// Notification descriptor written; weight stream is live.
    Subscribed,
    SubscribeFailed(String),
    /// An acknowledged characteristic write was rejected by the peripheral.
    WriteFailed(String),
    /// Raw notification payload for the frame decoder.
    Notification(Vec<u8>),
    /// Link is gone, whatever the cause; always the final event.
    Down { reason: String },
}

/// Channel buffer size for link commands and events.
pub const LINK_CHANNEL_BUFFER_SIZE: usize = 32;

/// Failures starting a link or scan task.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("bluetooth error: {0}")]
    Bluetooth(String),
    #[error("no bluetooth adapter available")]
    NoAdapter,
}

#[cfg(feature = "bluer")]
impl From<::bluer::Error> for LinkError {
    fn from(err: ::bluer::Error) -> Self {
        LinkError::Bluetooth(err.to_string())
    }
}
