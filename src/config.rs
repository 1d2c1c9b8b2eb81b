//! Tunable constants for the scale pipeline.
//!
//! The decode bounds, stability windows and retry timings below were tuned
//! against the scales this crate was developed with. None of them come from
//! a published protocol document, so they are exposed as defaults here
//! rather than hard-coded at their call sites; an untested scale model may
//! need different values.

use std::time::Duration;

/// Runtime tunables shared by the scanner, supervisor and weight pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Tunables {
    /// Smallest weight accepted by the frame decoder, exclusive (kg).
    pub min_weight_kg: f64,
    /// Largest weight accepted by the frame decoder, exclusive (kg).
    pub max_weight_kg: f64,
    /// Resolution of the 16-bit binary weight layout (kg per count).
    pub binary_resolution_kg: f64,
    /// Weight change below this is treated as scale noise (kg).
    pub noise_threshold_kg: f64,
    /// Quiet time without a qualifying change before a reading is stable.
    pub quiet_window: Duration,
    /// How long a scan runs before it is force-stopped.
    pub scan_window: Duration,
    /// RSSI floor for the last-resort scan heuristic (dBm).
    pub rssi_floor: i16,
    /// How long a connect attempt may take before it is failed.
    pub connect_timeout: Duration,
    /// Base delay between reconnection attempts; grows linearly per attempt.
    pub retry_base_delay: Duration,
    /// Reconnection attempts before giving up until the user reconnects.
    pub max_retry_attempts: u32,
    /// Pause between the activation command writes after subscribing.
    pub activation_write_delay: Duration,
    /// Consecutive unparseable notifications before an error is surfaced.
    pub decode_error_threshold: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            min_weight_kg: 0.01,
            max_weight_kg: 1000.0,
            binary_resolution_kg: 0.005,
            noise_threshold_kg: 0.1,
            quiet_window: Duration::from_secs(2),
            scan_window: Duration::from_secs(15),
            rssi_floor: -70,
            connect_timeout: Duration::from_secs(15),
            retry_base_delay: Duration::from_secs(3),
            max_retry_attempts: 5,
            activation_write_delay: Duration::from_secs(1),
            decode_error_threshold: 3,
        }
    }
}
