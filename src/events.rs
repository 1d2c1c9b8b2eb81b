//! Event fan-out to registered collaborators.
//!
//! UI layers, persistence, diagnostics — whoever cares about the scale —
//! register listeners here and receive every event in registration order,
//! synchronously from the owner task. Listeners come and go with collaborator
//! lifecycles, including from inside a callback, so dispatch iterates over a
//! snapshot taken under the lock rather than the live list.

use crate::device::ScaleDevice;
use crate::supervisor::ConnectionState;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

/// Everything the core reports to the outside world.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleEvent {
    ScanStarted,
    ScanStopped,
    /// A new scale passed the identification heuristic.
    DeviceFound(ScaleDevice),
    /// A known scale was sighted again with a stronger signal.
    DeviceUpdated(ScaleDevice),
    ConnectionStateChanged {
        state: ConnectionState,
        device_name: String,
    },
    /// Some platforms only expose the peripheral name post-connect.
    DeviceNameResolved(String),
    WeightReceived {
        weight_kg: f64,
        stable: bool,
    },
    Error(String),
}

/// Receives broadcast [`ScaleEvent`]s.
pub trait ScaleEventListener: Send + Sync {
    fn on_event(&self, event: &ScaleEvent);
}

impl<F> ScaleEventListener for F
where
    F: Fn(&ScaleEvent) + Send + Sync,
{
    fn on_event(&self, event: &ScaleEvent) {
        self(event)
    }
}

/// Handle for unregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<dyn ScaleEventListener>)>,
}

/// Multi-listener broadcast of scale events.
///
/// Cheap to clone; clones share the listener registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it receives every subsequent event, after all
    /// listeners registered before it.
    pub fn register(&self, listener: Arc<dyn ScaleEventListener>) -> ListenerId {
        let mut registry = self.registry.lock().expect("listener registry poisoned");
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry.listeners.push((id, listener));
        id
    }

    /// Remove a listener. Unknown ids are ignored, so unregistering twice
    /// (or from inside a callback) is harmless.
    pub fn unregister(&self, id: ListenerId) {
        let mut registry = self.registry.lock().expect("listener registry poisoned");
        registry.listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn listener_count(&self) -> usize {
        self.registry
            .lock()
            .expect("listener registry poisoned")
            .listeners
            .len()
    }

    /// Deliver an event to every currently registered listener, in
    /// registration order. A panicking listener is isolated and does not
    /// stop delivery to the rest.
    pub fn broadcast(&self, event: &ScaleEvent) {
        let snapshot: Vec<Arc<dyn ScaleEventListener>> = {
            let registry = self.registry.lock().expect("listener registry poisoned");
            registry.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                tracing::warn!("scale event listener panicked; continuing with remaining listeners");
            }
        }
    }
}
