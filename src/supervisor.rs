//! Connection supervisor: the state machine on top of a GATT link.
//!
//! The supervisor is a pure state machine: [`Supervisor::handle`] consumes
//! one [`SessionEvent`] and returns the [`Effect`]s the owner loop must
//! perform (open or close a link, arm timers, emit events, persist the
//! device). No I/O happens here, which is what makes every transition —
//! including the retry/backoff and timeout paths — testable without a radio.
//!
//! Each connect attempt gets a fresh session id. Link events are tagged with
//! the id they belong to, so a callback from a superseded link is detected
//! and discarded instead of corrupting the current attempt.

use crate::config::Tunables;
use crate::device::UNKNOWN_SCALE_NAME;
use crate::events::ScaleEvent;
use crate::link::{
    CharacteristicTarget, GattProfile, ResolvedCharacteristics, TARE_COMMAND,
    resolve_weight_characteristic,
};
use crate::mac_address::MacAddress;
use crate::persist::KnownDevice;
use std::fmt;
use std::time::{Duration, Instant};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none wanted.
    Idle,
    /// Physical link being established; connect timeout armed.
    Connecting,
    /// Link up, waiting for service discovery.
    Discovering,
    /// Weight characteristic found, enabling notifications.
    Subscribing,
    /// Notifications live; weight samples flow.
    Ready,
    /// No connection; reached by user intent or retry exhaustion.
    Disconnected,
    /// A failure occurred and a reconnection attempt is pending.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Ready => "ready",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// One attempt to use a physical link. Replaced wholesale on every connect.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSession {
    pub id: u64,
    pub address: MacAddress,
    pub name: Option<String>,
    pub connect_requested_at: Instant,
    pub connected_at: Option<Instant>,
    pub resolved: Option<ResolvedCharacteristics>,
}

/// Inputs to the state machine: user commands plus link-task callbacks.
/// Link-originated events carry the session id they belong to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connect {
        address: MacAddress,
        name: Option<String>,
    },
    Disconnect,
    Tare,
    LinkUp {
        session: u64,
    },
    LinkDown {
        session: u64,
        reason: String,
    },
    ConnectTimeout {
        session: u64,
    },
    Services {
        session: u64,
        profile: GattProfile,
    },
    Subscribed {
        session: u64,
    },
    SubscribeFailed {
        session: u64,
        reason: String,
    },
    NameResolved {
        session: u64,
        name: String,
    },
    /// The scheduled retry delay elapsed.
    RetryDue,
}

/// What the owner loop must do in response to a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenLink { session: u64, address: MacAddress },
    CloseLink,
    Subscribe(CharacteristicTarget),
    /// Run the wake-up command sequence on its own task.
    RunActivation(CharacteristicTarget),
    Write {
        target: CharacteristicTarget,
        payload: Vec<u8>,
    },
    ArmConnectTimeout(Duration),
    DisarmConnectTimeout,
    ScheduleRetry(Duration),
    CancelRetry,
    PersistDevice(KnownDevice),
    ClearPersisted,
    Emit(ScaleEvent),
}

/// The connection state machine. Owns the single source of truth for
/// "are we connected".
#[derive(Debug)]
pub struct Supervisor {
    tunables: Tunables,
    state: ConnectionState,
    session: Option<ConnectionSession>,
    next_session_id: u64,
    /// Reconnect target, kept across failed sessions for the retry path.
    target: Option<(MacAddress, Option<String>)>,
    attempts: u32,
    maintain_connection: bool,
}

impl Supervisor {
    pub fn new(tunables: Tunables) -> Self {
        Supervisor {
            tunables,
            state: ConnectionState::Idle,
            session: None,
            next_session_id: 0,
            target: None,
            attempts: 0,
            maintain_connection: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> Option<&ConnectionSession> {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    fn device_name(&self) -> String {
        self.session
            .as_ref()
            .and_then(|s| s.name.clone())
            .or_else(|| self.target.as_ref().and_then(|(_, name)| name.clone()))
            .unwrap_or_else(|| UNKNOWN_SCALE_NAME.to_string())
    }

    fn set_state(&mut self, state: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "connection state change");
            self.state = state;
            effects.push(Effect::Emit(ScaleEvent::ConnectionStateChanged {
                state,
                device_name: self.device_name(),
            }));
        }
    }

    fn open_session(
        &mut self,
        address: MacAddress,
        name: Option<String>,
        now: Instant,
        effects: &mut Vec<Effect>,
    ) {
        self.next_session_id += 1;
        let id = self.next_session_id;
        self.session = Some(ConnectionSession {
            id,
            address,
            name,
            connect_requested_at: now,
            connected_at: None,
            resolved: None,
        });
        effects.push(Effect::OpenLink { session: id, address });
        effects.push(Effect::ArmConnectTimeout(self.tunables.connect_timeout));
        self.set_state(ConnectionState::Connecting, effects);
    }

    /// Common failure path: report the reason, then either schedule a retry
    /// (linear backoff, capped attempts) or settle in `Disconnected`.
    fn fail(&mut self, reason: &str, effects: &mut Vec<Effect>) {
        self.session = None;
        effects.push(Effect::Emit(ScaleEvent::Error(reason.to_string())));

        if !self.maintain_connection {
            self.set_state(ConnectionState::Disconnected, effects);
            return;
        }

        self.attempts += 1;
        if self.attempts <= self.tunables.max_retry_attempts {
            let delay = self.tunables.retry_base_delay * self.attempts;
            tracing::info!(
                attempt = self.attempts,
                max = self.tunables.max_retry_attempts,
                ?delay,
                "scheduling reconnection"
            );
            self.set_state(ConnectionState::Error, effects);
            effects.push(Effect::ScheduleRetry(delay));
        } else {
            self.maintain_connection = false;
            effects.push(Effect::Emit(ScaleEvent::Error(
                "max reconnection attempts reached".to_string(),
            )));
            self.set_state(ConnectionState::Disconnected, effects);
        }
    }

    /// True when a link-originated event belongs to the current session.
    fn current(&self, session: u64) -> bool {
        match &self.session {
            Some(s) if s.id == session => true,
            _ => {
                tracing::debug!(session, "discarding event from superseded session");
                false
            }
        }
    }

    /// Feed one event through the state machine.
    pub fn handle(&mut self, event: SessionEvent, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            SessionEvent::Connect { address, name } => {
                if !matches!(
                    self.state,
                    ConnectionState::Idle | ConnectionState::Disconnected
                ) {
                    tracing::warn!(state = %self.state, "connect ignored: attempt already in progress");
                    return effects;
                }
                self.maintain_connection = true;
                self.attempts = 0;
                self.target = Some((address, name.clone()));
                effects.push(Effect::PersistDevice(KnownDevice::new(address, name.clone())));
                self.open_session(address, name, now, &mut effects);
            }

            SessionEvent::Disconnect => {
                if self.state == ConnectionState::Idle {
                    return effects;
                }
                self.maintain_connection = false;
                self.attempts = 0;
                self.target = None;
                let had_link = self.session.take().is_some();
                effects.push(Effect::CancelRetry);
                effects.push(Effect::DisarmConnectTimeout);
                if had_link {
                    effects.push(Effect::CloseLink);
                }
                effects.push(Effect::ClearPersisted);
                self.set_state(ConnectionState::Idle, &mut effects);
            }

            SessionEvent::Tare => {
                if self.state != ConnectionState::Ready {
                    effects.push(Effect::Emit(ScaleEvent::Error(
                        "not connected to a scale".to_string(),
                    )));
                    return effects;
                }
                let write = self.session.as_ref().and_then(|s| s.resolved).and_then(|r| r.write);
                match write {
                    Some(target) => effects.push(Effect::Write {
                        target,
                        payload: TARE_COMMAND.to_vec(),
                    }),
                    None => effects.push(Effect::Emit(ScaleEvent::Error(
                        "tare not supported by this scale".to_string(),
                    ))),
                }
            }

            SessionEvent::LinkUp { session } => {
                if !self.current(session) || self.state != ConnectionState::Connecting {
                    return effects;
                }
                effects.push(Effect::DisarmConnectTimeout);
                self.set_state(ConnectionState::Discovering, &mut effects);
            }

            SessionEvent::ConnectTimeout { session } => {
                if !self.current(session) || self.state != ConnectionState::Connecting {
                    return effects;
                }
                effects.push(Effect::CloseLink);
                self.fail("connection timed out", &mut effects);
            }

            SessionEvent::Services { session, profile } => {
                if !self.current(session) || self.state != ConnectionState::Discovering {
                    return effects;
                }
                match resolve_weight_characteristic(&profile) {
                    Some(resolved) => {
                        if let Some(s) = self.session.as_mut() {
                            s.resolved = Some(resolved);
                        }
                        effects.push(Effect::Subscribe(resolved.weight));
                        self.set_state(ConnectionState::Subscribing, &mut effects);
                    }
                    None => {
                        effects.push(Effect::CloseLink);
                        self.fail("no compatible weight characteristic", &mut effects);
                    }
                }
            }

            SessionEvent::Subscribed { session } => {
                if !self.current(session) || self.state != ConnectionState::Subscribing {
                    return effects;
                }
                self.attempts = 0;
                let (address, name, write) = match self.session.as_mut() {
                    Some(s) => {
                        s.connected_at = Some(now);
                        (s.address, s.name.clone(), s.resolved.and_then(|r| r.write))
                    }
                    None => return effects,
                };
                effects.push(Effect::PersistDevice(KnownDevice::new(address, name)));
                self.set_state(ConnectionState::Ready, &mut effects);
                // Wake-up commands are best effort; failure does not block Ready
                if let Some(target) = write {
                    effects.push(Effect::RunActivation(target));
                }
            }

            SessionEvent::SubscribeFailed { session, reason } => {
                if !self.current(session) || self.state != ConnectionState::Subscribing {
                    return effects;
                }
                effects.push(Effect::CloseLink);
                self.fail(&format!("failed to enable notifications: {reason}"), &mut effects);
            }

            SessionEvent::LinkDown { session, reason } => {
                if !self.current(session) {
                    return effects;
                }
                effects.push(Effect::DisarmConnectTimeout);
                self.fail(&format!("connection lost: {reason}"), &mut effects);
            }

            SessionEvent::NameResolved { session, name } => {
                if !self.current(session) {
                    return effects;
                }
                if let Some(s) = self.session.as_mut() {
                    s.name = Some(name.clone());
                }
                if let Some((_, target_name)) = self.target.as_mut() {
                    *target_name = Some(name.clone());
                }
                effects.push(Effect::Emit(ScaleEvent::DeviceNameResolved(name)));
            }

            SessionEvent::RetryDue => {
                if self.state != ConnectionState::Error || !self.maintain_connection {
                    return effects;
                }
                let Some((address, name)) = self.target.clone() else {
                    return effects;
                };
                tracing::info!(
                    attempt = self.attempts,
                    max = self.tunables.max_retry_attempts,
                    %address,
                    "reconnection attempt"
                );
                self.open_session(address, name, now, &mut effects);
            }
        }
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{CharacteristicInfo, ServiceInfo, ble_uuid16};
    use crate::test_utils::TEST_MAC;

    fn supervisor() -> Supervisor {
        Supervisor::new(Tunables::default())
    }

    fn now() -> Instant {
        Instant::now()
    }

    fn scale_profile() -> GattProfile {
        GattProfile {
            services: vec![ServiceInfo {
                uuid: ble_uuid16(0xffc0),
                characteristics: vec![CharacteristicInfo {
                    uuid: ble_uuid16(0xffc2),
                    notify: true,
                    write: true,
                    write_without_response: false,
                }],
            }],
        }
    }

    /// Profile whose notify characteristic cannot be written.
    fn notify_only_profile() -> GattProfile {
        GattProfile {
            services: vec![ServiceInfo {
                uuid: ble_uuid16(0xffe0),
                characteristics: vec![CharacteristicInfo {
                    uuid: ble_uuid16(0xffe4),
                    notify: true,
                    write: false,
                    write_without_response: false,
                }],
            }],
        }
    }

    fn connect(sup: &mut Supervisor) -> Vec<Effect> {
        sup.handle(
            SessionEvent::Connect {
                address: TEST_MAC,
                name: Some("WS-300".into()),
            },
            now(),
        )
    }

    fn session_id(sup: &Supervisor) -> u64 {
        sup.session().unwrap().id
    }

    /// Drive a supervisor to Ready, returning the live session id.
    fn bring_to_ready(sup: &mut Supervisor) -> u64 {
        connect(sup);
        let id = session_id(sup);
        sup.handle(SessionEvent::LinkUp { session: id }, now());
        sup.handle(
            SessionEvent::Services {
                session: id,
                profile: scale_profile(),
            },
            now(),
        );
        sup.handle(SessionEvent::Subscribed { session: id }, now());
        assert_eq!(sup.state(), ConnectionState::Ready);
        id
    }

    fn retry_delays(effects: &[Effect]) -> Vec<Duration> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::ScheduleRetry(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    fn errors(effects: &[Effect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Emit(ScaleEvent::Error(msg)) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_from_idle_opens_link_and_arms_timeout() {
        let mut sup = supervisor();
        let effects = connect(&mut sup);

        assert_eq!(sup.state(), ConnectionState::Connecting);
        let id = session_id(&sup);
        assert!(effects.contains(&Effect::OpenLink {
            session: id,
            address: TEST_MAC
        }));
        assert!(effects.contains(&Effect::ArmConnectTimeout(Duration::from_secs(15))));
        assert!(effects.iter().any(|e| matches!(e, Effect::PersistDevice(_))));
        assert!(effects.contains(&Effect::Emit(ScaleEvent::ConnectionStateChanged {
            state: ConnectionState::Connecting,
            device_name: "WS-300".into(),
        })));
    }

    #[test]
    fn connect_while_busy_is_a_no_op() {
        let mut sup = supervisor();
        connect(&mut sup);
        let id = session_id(&sup);

        for _ in 0..2 {
            let effects = connect(&mut sup);
            assert!(effects.is_empty());
        }
        // still the same session
        assert_eq!(session_id(&sup), id);

        sup.handle(SessionEvent::LinkUp { session: id }, now());
        assert!(connect(&mut sup).is_empty());
    }

    #[test]
    fn happy_path_reaches_ready_with_activation() {
        let mut sup = supervisor();
        connect(&mut sup);
        let id = session_id(&sup);

        let effects = sup.handle(SessionEvent::LinkUp { session: id }, now());
        assert_eq!(sup.state(), ConnectionState::Discovering);
        assert!(effects.contains(&Effect::DisarmConnectTimeout));

        let effects = sup.handle(
            SessionEvent::Services {
                session: id,
                profile: scale_profile(),
            },
            now(),
        );
        assert_eq!(sup.state(), ConnectionState::Subscribing);
        let weight = CharacteristicTarget {
            service: ble_uuid16(0xffc0),
            characteristic: ble_uuid16(0xffc2),
        };
        assert!(effects.contains(&Effect::Subscribe(weight)));

        let effects = sup.handle(SessionEvent::Subscribed { session: id }, now());
        assert_eq!(sup.state(), ConnectionState::Ready);
        assert!(sup.is_connected());
        assert!(effects.contains(&Effect::RunActivation(weight)));
        assert!(sup.session().unwrap().connected_at.is_some());
    }

    #[test]
    fn connect_timeout_fails_and_schedules_retry() {
        let mut sup = supervisor();
        connect(&mut sup);
        let id = session_id(&sup);

        let effects = sup.handle(SessionEvent::ConnectTimeout { session: id }, now());
        assert_eq!(sup.state(), ConnectionState::Error);
        assert!(effects.contains(&Effect::CloseLink));
        assert_eq!(errors(&effects), vec!["connection timed out".to_string()]);
        assert_eq!(retry_delays(&effects), vec![Duration::from_secs(3)]);
    }

    #[test]
    fn stale_timeout_after_success_is_ignored() {
        let mut sup = supervisor();
        connect(&mut sup);
        let id = session_id(&sup);
        sup.handle(SessionEvent::LinkUp { session: id }, now());

        // timer fired after the link came up: state is no longer Connecting
        let effects = sup.handle(SessionEvent::ConnectTimeout { session: id }, now());
        assert!(effects.is_empty());
        assert_eq!(sup.state(), ConnectionState::Discovering);
    }

    #[test]
    fn no_compatible_characteristic_is_a_failure() {
        let mut sup = supervisor();
        connect(&mut sup);
        let id = session_id(&sup);
        sup.handle(SessionEvent::LinkUp { session: id }, now());

        let effects = sup.handle(
            SessionEvent::Services {
                session: id,
                profile: GattProfile::default(),
            },
            now(),
        );
        assert_eq!(sup.state(), ConnectionState::Error);
        assert!(effects.contains(&Effect::CloseLink));
        assert!(errors(&effects)
            .iter()
            .any(|m| m.contains("no compatible weight characteristic")));
    }

    #[test]
    fn subscribe_failure_takes_the_retry_path() {
        let mut sup = supervisor();
        connect(&mut sup);
        let id = session_id(&sup);
        sup.handle(SessionEvent::LinkUp { session: id }, now());
        sup.handle(
            SessionEvent::Services {
                session: id,
                profile: scale_profile(),
            },
            now(),
        );

        let effects = sup.handle(
            SessionEvent::SubscribeFailed {
                session: id,
                reason: "descriptor write rejected".into(),
            },
            now(),
        );
        assert_eq!(sup.state(), ConnectionState::Error);
        assert_eq!(retry_delays(&effects).len(), 1);
    }

    #[test]
    fn unexpected_disconnect_from_ready_retries() {
        let mut sup = supervisor();
        let id = bring_to_ready(&mut sup);

        let effects = sup.handle(
            SessionEvent::LinkDown {
                session: id,
                reason: "peripheral went away".into(),
            },
            now(),
        );
        assert_eq!(sup.state(), ConnectionState::Error);
        assert_eq!(retry_delays(&effects), vec![Duration::from_secs(3)]);
    }

    #[test]
    fn retry_due_opens_a_fresh_session() {
        let mut sup = supervisor();
        connect(&mut sup);
        let first = session_id(&sup);
        sup.handle(SessionEvent::ConnectTimeout { session: first }, now());

        let effects = sup.handle(SessionEvent::RetryDue, now());
        assert_eq!(sup.state(), ConnectionState::Connecting);
        let second = session_id(&sup);
        assert_ne!(first, second);
        assert!(effects.contains(&Effect::OpenLink {
            session: second,
            address: TEST_MAC
        }));

        // events from the superseded session are discarded
        let stale = sup.handle(
            SessionEvent::LinkDown {
                session: first,
                reason: "late callback".into(),
            },
            now(),
        );
        assert!(stale.is_empty());
        assert_eq!(sup.state(), ConnectionState::Connecting);
    }

    #[test]
    fn linear_backoff_with_terminal_error_after_max() {
        let mut sup = supervisor();
        connect(&mut sup);

        let mut delays = Vec::new();
        for _ in 0..5 {
            let id = session_id(&sup);
            let effects = sup.handle(SessionEvent::ConnectTimeout { session: id }, now());
            delays.extend(retry_delays(&effects));
            sup.handle(SessionEvent::RetryDue, now());
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(3),
                Duration::from_secs(6),
                Duration::from_secs(9),
                Duration::from_secs(12),
                Duration::from_secs(15),
            ]
        );

        // the failure beyond the cap is terminal
        let id = session_id(&sup);
        let effects = sup.handle(SessionEvent::ConnectTimeout { session: id }, now());
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert!(retry_delays(&effects).is_empty());
        assert!(errors(&effects)
            .iter()
            .any(|m| m.contains("max reconnection attempts reached")));

        // and no further attempt is ever scheduled
        assert!(sup.handle(SessionEvent::RetryDue, now()).is_empty());
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn success_resets_the_attempt_counter() {
        let mut sup = supervisor();
        connect(&mut sup);
        let id = session_id(&sup);
        sup.handle(SessionEvent::ConnectTimeout { session: id }, now());
        sup.handle(SessionEvent::RetryDue, now());

        let id = session_id(&sup);
        sup.handle(SessionEvent::LinkUp { session: id }, now());
        sup.handle(
            SessionEvent::Services {
                session: id,
                profile: scale_profile(),
            },
            now(),
        );
        sup.handle(SessionEvent::Subscribed { session: id }, now());
        assert_eq!(sup.state(), ConnectionState::Ready);

        // next failure starts the backoff ladder from the bottom again
        let effects = sup.handle(
            SessionEvent::LinkDown {
                session: id,
                reason: "gone".into(),
            },
            now(),
        );
        assert_eq!(retry_delays(&effects), vec![Duration::from_secs(3)]);
    }

    #[test]
    fn disconnect_from_any_state_lands_in_idle() {
        // from Ready
        let mut sup = supervisor();
        let id = bring_to_ready(&mut sup);
        let effects = sup.handle(SessionEvent::Disconnect, now());
        assert_eq!(sup.state(), ConnectionState::Idle);
        assert!(effects.contains(&Effect::CancelRetry));
        assert!(effects.contains(&Effect::DisarmConnectTimeout));
        assert!(effects.contains(&Effect::CloseLink));
        assert!(effects.contains(&Effect::ClearPersisted));

        // the link-down caused by our own close is a stale event now
        let effects = sup.handle(
            SessionEvent::LinkDown {
                session: id,
                reason: "local close".into(),
            },
            now(),
        );
        assert!(effects.is_empty());
        assert_eq!(sup.state(), ConnectionState::Idle);

        // from Error (retry pending): disconnect cancels the retry
        let mut sup = supervisor();
        connect(&mut sup);
        let id = session_id(&sup);
        sup.handle(SessionEvent::ConnectTimeout { session: id }, now());
        assert_eq!(sup.state(), ConnectionState::Error);
        let effects = sup.handle(SessionEvent::Disconnect, now());
        assert_eq!(sup.state(), ConnectionState::Idle);
        assert!(effects.contains(&Effect::CancelRetry));
        assert!(sup.handle(SessionEvent::RetryDue, now()).is_empty());

        // disconnect when already Idle is a no-op
        assert!(sup.handle(SessionEvent::Disconnect, now()).is_empty());
    }

    #[test]
    fn user_disconnect_clears_persisted_device_but_failure_does_not() {
        let mut sup = supervisor();
        let id = bring_to_ready(&mut sup);

        let effects = sup.handle(
            SessionEvent::LinkDown {
                session: id,
                reason: "gone".into(),
            },
            now(),
        );
        assert!(!effects.contains(&Effect::ClearPersisted));

        let effects = sup.handle(SessionEvent::Disconnect, now());
        assert!(effects.contains(&Effect::ClearPersisted));
    }

    #[test]
    fn tare_writes_the_command_when_supported() {
        let mut sup = supervisor();
        bring_to_ready(&mut sup);

        let effects = sup.handle(SessionEvent::Tare, now());
        assert_eq!(
            effects,
            vec![Effect::Write {
                target: CharacteristicTarget {
                    service: ble_uuid16(0xffc0),
                    characteristic: ble_uuid16(0xffc2),
                },
                payload: vec![0x54],
            }]
        );
    }

    #[test]
    fn tare_without_write_characteristic_reports_unsupported() {
        let mut sup = supervisor();
        connect(&mut sup);
        let id = session_id(&sup);
        sup.handle(SessionEvent::LinkUp { session: id }, now());
        sup.handle(
            SessionEvent::Services {
                session: id,
                profile: notify_only_profile(),
            },
            now(),
        );
        sup.handle(SessionEvent::Subscribed { session: id }, now());
        assert_eq!(sup.state(), ConnectionState::Ready);

        let effects = sup.handle(SessionEvent::Tare, now());
        assert!(errors(&effects).iter().any(|m| m.contains("tare not supported")));
    }

    #[test]
    fn tare_while_disconnected_reports_not_connected() {
        let mut sup = supervisor();
        let effects = sup.handle(SessionEvent::Tare, now());
        assert!(errors(&effects).iter().any(|m| m.contains("not connected")));
    }

    #[test]
    fn name_resolution_updates_session_and_emits() {
        let mut sup = supervisor();
        let mut effects = sup.handle(
            SessionEvent::Connect {
                address: TEST_MAC,
                name: None,
            },
            now(),
        );
        // without a name, state changes carry the placeholder
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Emit(ScaleEvent::ConnectionStateChanged { device_name, .. })
                if device_name == UNKNOWN_SCALE_NAME
        )));

        let id = session_id(&sup);
        sup.handle(SessionEvent::LinkUp { session: id }, now());
        effects = sup.handle(
            SessionEvent::NameResolved {
                session: id,
                name: "Kern EOB".into(),
            },
            now(),
        );
        assert!(effects.contains(&Effect::Emit(ScaleEvent::DeviceNameResolved(
            "Kern EOB".into()
        ))));
        assert_eq!(sup.session().unwrap().name.as_deref(), Some("Kern EOB"));

        // later transitions use the resolved name
        effects = sup.handle(
            SessionEvent::Services {
                session: id,
                profile: scale_profile(),
            },
            now(),
        );
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Emit(ScaleEvent::ConnectionStateChanged { device_name, .. })
                if device_name == "Kern EOB"
        )));
    }
}
