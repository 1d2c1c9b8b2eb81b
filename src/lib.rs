//! `scale-link` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit codes.
//! The core “business logic” lives in [`crate::app`] where it can be tested
//! deterministically with an injected radio backend and injected listeners.

pub mod app;
pub mod config;
pub mod decoder;
pub mod device;
pub mod events;
pub mod link;
pub mod mac_address;
pub mod persist;
pub mod scanner;
pub mod stability;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at the crate root
pub use app::{Command, Radio, ScaleLink};
pub use config::Tunables;
pub use decoder::{FrameError, decode_frame};
pub use device::{ScaleDevice, SignalQuality};
pub use events::{EventBus, ListenerId, ScaleEvent, ScaleEventListener};
pub use link::{GattProfile, LinkCommand, LinkEvent, ResolvedCharacteristics};
pub use mac_address::MacAddress;
pub use scanner::{DeviceRegistry, ScaleFilter, ScanError, ScanEvent};
pub use stability::{StabilityFilter, WeightSample};
pub use supervisor::{ConnectionState, Effect, SessionEvent, Supervisor};
