//! Stability debouncing for decoded weight readings.
//!
//! A scale's reading jitters while material is being placed. This filter
//! turns the raw stream of decoded weights into "settling" samples plus a
//! single "stable" sample once the reading has stopped moving for a quiet
//! window. It is deliberately decoupled from the connection machinery: time
//! is injected as an [`Instant`] argument so the whole thing is testable with
//! synthetic timestamps.

use crate::config::Tunables;
use std::time::{Duration, Instant};

/// A validated weight reading.
///
/// Never mutated after creation; `stable` is true only for the one sample
/// emitted after the quiet window elapses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightSample {
    pub weight_kg: f64,
    pub stable: bool,
    pub taken_at: Instant,
}

/// Debounces decoded weights into settling/stable samples.
#[derive(Debug)]
pub struct StabilityFilter {
    noise_threshold_kg: f64,
    quiet_window: Duration,
    current: Option<f64>,
    last_stable: Option<f64>,
    /// Pending quiet deadline; `None` once stability has been asserted.
    quiet_deadline: Option<Instant>,
}

impl StabilityFilter {
    pub fn new(tunables: &Tunables) -> Self {
        StabilityFilter {
            noise_threshold_kg: tunables.noise_threshold_kg,
            quiet_window: tunables.quiet_window,
            current: None,
            last_stable: None,
            quiet_deadline: None,
        }
    }

    /// Feed a decoded weight. Returns a settling (`stable == false`) sample
    /// when the value is accepted as the new current weight, or `None` when
    /// the change is within the noise threshold.
    ///
    /// A within-threshold repeat does not restart the quiet timer; a
    /// constant stream therefore stabilizes no matter how often the scale
    /// notifies.
    pub fn on_weight(&mut self, weight_kg: f64, now: Instant) -> Option<WeightSample> {
        match self.current {
            Some(current) if (weight_kg - current).abs() <= self.noise_threshold_kg => None,
            _ => {
                self.current = Some(weight_kg);
                self.quiet_deadline = Some(now + self.quiet_window);
                Some(WeightSample {
                    weight_kg,
                    stable: false,
                    taken_at: now,
                })
            }
        }
    }

    /// Check whether the quiet window has elapsed. Emits the stable sample
    /// at most once per accepted update and latches the last stable weight.
    pub fn poll_stable(&mut self, now: Instant) -> Option<WeightSample> {
        let deadline = self.quiet_deadline?;
        if now < deadline {
            return None;
        }
        self.quiet_deadline = None;
        let weight_kg = self.current?;
        self.last_stable = Some(weight_kg);
        Some(WeightSample {
            weight_kg,
            stable: true,
            taken_at: now,
        })
    }

    /// The pending quiet deadline, for the owner loop's timer. `None` when
    /// stability has already been asserted (or nothing was ever weighed).
    pub fn deadline(&self) -> Option<Instant> {
        self.quiet_deadline
    }

    /// Current (possibly still settling) weight.
    pub fn current_weight(&self) -> Option<f64> {
        self.current
    }

    /// Last weight that survived a full quiet window.
    pub fn last_stable_weight(&self) -> Option<f64> {
        self.last_stable
    }

    /// Forget everything; used when a session ends or the scale is tared.
    pub fn reset(&mut self) {
        self.current = None;
        self.last_stable = None;
        self.quiet_deadline = None;
    }
}
