//! Core application runner for `scale-link`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit
//! codes so it can be tested deterministically. The [`Supervisor`] decides
//! what should happen; the loop here owns the radio backends, the timers and
//! the decode pipeline, and carries out the supervisor's effects.

use crate::config::Tunables;
use crate::decoder::{FrameError, decode_frame_with};
use crate::events::{EventBus, ScaleEvent};
use crate::link::{ACTIVATION_COMMANDS, CharacteristicTarget, LinkCommand, LinkEvent};
use crate::mac_address::MacAddress;
use crate::persist::DeviceStore;
use crate::scanner::{DeviceRegistry, RegistryUpdate, ScaleFilter, ScanError, ScanEvent};
use crate::stability::StabilityFilter;
use crate::supervisor::{Effect, SessionEvent, Supervisor};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

/// Command-line configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Connect directly to a scale, skipping discovery.
    /// Format: AA:BB:CC:DD:EE:FF
    #[arg(long, value_name = "ADDRESS")]
    pub connect: Option<MacAddress>,

    /// Discovery window in seconds.
    #[arg(long, default_value_t = 15, value_name = "SECONDS")]
    pub scan_window: u64,

    /// Where the last connected scale is remembered for auto-reconnect.
    #[arg(long, default_value = "scale-devices.json", value_name = "PATH")]
    pub device_store: PathBuf,

    /// Forget the last scale and do not auto-reconnect on startup.
    #[arg(long)]
    pub no_reconnect: bool,
}

/// Commands accepted by the run loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartScan,
    StopScan,
    Connect {
        address: MacAddress,
        name: Option<String>,
    },
    Disconnect,
    Tare,
}

/// The run loop has shut down and no longer accepts commands.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("scale link task has shut down")]
pub struct Closed;

/// Radio abstraction to enable deterministic unit tests without Bluetooth
/// hardware.
pub trait Radio: Send + Sync {
    /// Start one discovery window; sightings arrive until the channel closes.
    fn start_scan(
        &self,
        window: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ScanEvent>, ScanError>> + Send + '_>>;

    /// Open a connection; the attempt itself runs behind the returned
    /// channels and ends with [`LinkEvent::Down`].
    fn open_link(
        &self,
        address: MacAddress,
    ) -> (mpsc::Sender<LinkCommand>, mpsc::Receiver<LinkEvent>);
}

/// Real radio implementation backed by BlueZ.
#[cfg(feature = "bluer")]
#[derive(Debug, Default, Clone, Copy)]
pub struct BluerRadio;

#[cfg(feature = "bluer")]
impl Radio for BluerRadio {
    fn start_scan(
        &self,
        window: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<ScanEvent>, ScanError>> + Send + '_>>
    {
        Box::pin(async move { crate::scanner::bluer::start_scan(window).await })
    }

    fn open_link(
        &self,
        address: MacAddress,
    ) -> (mpsc::Sender<LinkCommand>, mpsc::Receiver<LinkEvent>) {
        crate::link::bluer::open_link(address)
    }
}

const COMMAND_CHANNEL_BUFFER_SIZE: usize = 16;

/// Handle to a running scale link.
///
/// Owns the command channel to the spawned run loop and the event bus that
/// fans observations out to listeners. Dropping the handle shuts the loop
/// down.
pub struct ScaleLink {
    commands: mpsc::Sender<Command>,
    bus: EventBus,
}

impl ScaleLink {
    /// Spawn the run loop on the current runtime.
    pub fn new(radio: Arc<dyn Radio>, tunables: Tunables, store: Option<DeviceStore>) -> Self {
        let bus = EventBus::new();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER_SIZE);
        let app = App {
            radio,
            supervisor: Supervisor::new(tunables.clone()),
            stability: StabilityFilter::new(&tunables),
            filter: ScaleFilter::new(&tunables),
            registry: DeviceRegistry::new(),
            tunables,
            bus: bus.clone(),
            store,
            commands: commands_rx,
            scan_rx: None,
            link: None,
            connect_deadline: None,
            retry_deadline: None,
            decode_errors: 0,
        };
        tokio::spawn(app.run());
        ScaleLink {
            commands: commands_tx,
            bus,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub async fn send(&self, command: Command) -> Result<(), Closed> {
        self.commands.send(command).await.map_err(|_| Closed)
    }

    pub async fn start_scan(&self) -> Result<(), Closed> {
        self.send(Command::StartScan).await
    }

    pub async fn stop_scan(&self) -> Result<(), Closed> {
        self.send(Command::StopScan).await
    }

    pub async fn connect(&self, address: MacAddress, name: Option<String>) -> Result<(), Closed> {
        self.send(Command::Connect { address, name }).await
    }

    pub async fn disconnect(&self) -> Result<(), Closed> {
        self.send(Command::Disconnect).await
    }

    pub async fn tare(&self) -> Result<(), Closed> {
        self.send(Command::Tare).await
    }
}

/// An open link: the session id the supervisor knows it by, plus its
/// channel pair.
struct ActiveLink {
    session: u64,
    commands: mpsc::Sender<LinkCommand>,
    events: mpsc::Receiver<LinkEvent>,
}

/// One wakeup of the run loop.
enum Turn {
    Command(Option<Command>),
    Scan(Option<ScanEvent>),
    Link(Option<LinkEvent>),
    ConnectTimeout,
    RetryDue,
    QuietElapsed,
}

struct App {
    radio: Arc<dyn Radio>,
    tunables: Tunables,
    supervisor: Supervisor,
    stability: StabilityFilter,
    filter: ScaleFilter,
    registry: DeviceRegistry,
    bus: EventBus,
    store: Option<DeviceStore>,
    commands: mpsc::Receiver<Command>,
    scan_rx: Option<mpsc::Receiver<ScanEvent>>,
    link: Option<ActiveLink>,
    connect_deadline: Option<Instant>,
    retry_deadline: Option<Instant>,
    decode_errors: u32,
}

/// Runtime clock. Everything time-related in the loop goes through this so
/// tests with a paused clock stay consistent.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn recv_scan(rx: &mut Option<mpsc::Receiver<ScanEvent>>) -> Option<ScanEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn recv_link(link: &mut Option<ActiveLink>) -> Option<LinkEvent> {
    match link {
        Some(link) => link.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

fn spawn_activation(
    commands: mpsc::Sender<LinkCommand>,
    target: CharacteristicTarget,
    delay: Duration,
) {
    tokio::spawn(async move {
        for (i, payload) in ACTIVATION_COMMANDS.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(delay).await;
            }
            let command = LinkCommand::Write {
                target,
                payload: payload.to_vec(),
                acknowledged: false,
            };
            if commands.send(command).await.is_err() {
                return;
            }
        }
    });
}

impl App {
    async fn run(mut self) {
        self.reconnect_remembered().await;

        loop {
            let turn = tokio::select! {
                cmd = self.commands.recv() => Turn::Command(cmd),
                ev = recv_scan(&mut self.scan_rx) => Turn::Scan(ev),
                ev = recv_link(&mut self.link) => Turn::Link(ev),
                _ = sleep_opt(self.connect_deadline) => Turn::ConnectTimeout,
                _ = sleep_opt(self.retry_deadline) => Turn::RetryDue,
                _ = sleep_opt(self.stability.deadline()) => Turn::QuietElapsed,
            };

            match turn {
                Turn::Command(None) => {
                    // handle dropped: tear the link down and stop
                    if let Some(link) = self.link.take() {
                        let _ = link.commands.try_send(LinkCommand::Close);
                    }
                    return;
                }
                Turn::Command(Some(command)) => self.on_command(command).await,
                Turn::Scan(Some(sighting)) => self.on_sighting(sighting),
                Turn::Scan(None) => {
                    self.scan_rx = None;
                    self.bus.broadcast(&ScaleEvent::ScanStopped);
                }
                Turn::Link(event) => self.on_link_event(event).await,
                Turn::ConnectTimeout => {
                    self.connect_deadline = None;
                    if let Some(session) = self.link.as_ref().map(|l| l.session) {
                        self.dispatch(SessionEvent::ConnectTimeout { session }).await;
                    }
                }
                Turn::RetryDue => {
                    self.retry_deadline = None;
                    self.dispatch(SessionEvent::RetryDue).await;
                }
                Turn::QuietElapsed => {
                    if let Some(sample) = self.stability.poll_stable(now()) {
                        self.bus.broadcast(&ScaleEvent::WeightReceived {
                            weight_kg: sample.weight_kg,
                            stable: true,
                        });
                    }
                }
            }
        }
    }

    /// Reconnect to the remembered scale, when there is one.
    async fn reconnect_remembered(&mut self) {
        let Some(store) = &self.store else { return };
        match store.load() {
            Ok(Some(device)) if device.auto_reconnect => match device.mac() {
                Ok(address) => {
                    tracing::info!(%address, "reconnecting to remembered scale");
                    let name = device.name.clone();
                    self.dispatch(SessionEvent::Connect { address, name }).await;
                }
                Err(e) => tracing::warn!(error = %e, "stored device has an invalid address"),
            },
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not load device store"),
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::StartScan => {
                if self.scan_rx.is_some() {
                    tracing::warn!("scan already running");
                    return;
                }
                self.registry.clear();
                match self.radio.start_scan(self.tunables.scan_window).await {
                    Ok(rx) => {
                        self.scan_rx = Some(rx);
                        self.bus.broadcast(&ScaleEvent::ScanStarted);
                    }
                    Err(e) => self.bus.broadcast(&ScaleEvent::Error(e.to_string())),
                }
            }
            Command::StopScan => {
                if self.scan_rx.take().is_some() {
                    self.bus.broadcast(&ScaleEvent::ScanStopped);
                }
            }
            Command::Connect { address, name } => {
                self.dispatch(SessionEvent::Connect { address, name }).await;
            }
            Command::Disconnect => self.dispatch(SessionEvent::Disconnect).await,
            Command::Tare => self.dispatch(SessionEvent::Tare).await,
        }
    }

    fn on_sighting(&mut self, sighting: ScanEvent) {
        if !self.filter.matches(&sighting) {
            return;
        }
        match self.registry.upsert(&sighting) {
            RegistryUpdate::New(device) => self.bus.broadcast(&ScaleEvent::DeviceFound(device)),
            RegistryUpdate::Updated(device) => {
                self.bus.broadcast(&ScaleEvent::DeviceUpdated(device));
            }
            RegistryUpdate::Unchanged => {}
        }
    }

    async fn on_link_event(&mut self, event: Option<LinkEvent>) {
        let Some(session) = self.link.as_ref().map(|l| l.session) else {
            return;
        };
        match event {
            Some(LinkEvent::Up) => self.dispatch(SessionEvent::LinkUp { session }).await,
            Some(LinkEvent::NameResolved(name)) => {
                self.dispatch(SessionEvent::NameResolved { session, name }).await;
            }
            Some(LinkEvent::Services(profile)) => {
                self.dispatch(SessionEvent::Services { session, profile }).await;
            }
            Some(LinkEvent::Subscribed) => {
                self.dispatch(SessionEvent::Subscribed { session }).await;
            }
            Some(LinkEvent::SubscribeFailed(reason)) => {
                self.dispatch(SessionEvent::SubscribeFailed { session, reason }).await;
            }
            Some(LinkEvent::WriteFailed(reason)) => {
                tracing::warn!(%reason, "scale rejected a command write");
                self.bus
                    .broadcast(&ScaleEvent::Error(format!("command write failed: {reason}")));
            }
            Some(LinkEvent::Notification(data)) => self.on_notification(&data),
            Some(LinkEvent::Down { reason }) => self.on_link_down(session, reason).await,
            None => self.on_link_down(session, "link task ended".to_string()).await,
        }
    }

    async fn on_link_down(&mut self, session: u64, reason: String) {
        self.link = None;
        self.stability.reset();
        self.decode_errors = 0;
        self.dispatch(SessionEvent::LinkDown { session, reason }).await;
    }

    /// Decode pipeline: frame bytes in, weight events out.
    fn on_notification(&mut self, data: &[u8]) {
        match decode_frame_with(data, &self.tunables) {
            Ok(weight_kg) => {
                self.decode_errors = 0;
                if let Some(sample) = self.stability.on_weight(weight_kg, now()) {
                    self.bus.broadcast(&ScaleEvent::WeightReceived {
                        weight_kg: sample.weight_kg,
                        stable: false,
                    });
                }
            }
            // keepalives carry no weight and are not errors
            Err(FrameError::ControlFrame) => {}
            Err(e) => {
                self.decode_errors += 1;
                tracing::debug!(error = %e, count = self.decode_errors, "undecodable frame");
                if self.decode_errors == self.tunables.decode_error_threshold {
                    self.bus.broadcast(&ScaleEvent::Error(
                        "unable to decode weight data from this scale".to_string(),
                    ));
                }
            }
        }
    }

    async fn dispatch(&mut self, event: SessionEvent) {
        let effects = self.supervisor.handle(event, now());
        self.apply(effects).await;
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::OpenLink { session, address } => {
                    let (commands, events) = self.radio.open_link(address);
                    self.link = Some(ActiveLink {
                        session,
                        commands,
                        events,
                    });
                }
                Effect::CloseLink => {
                    if let Some(link) = self.link.take() {
                        let _ = link.commands.try_send(LinkCommand::Close);
                    }
                    self.stability.reset();
                    self.decode_errors = 0;
                }
                Effect::Subscribe(target) => {
                    self.link_command(LinkCommand::Subscribe(target)).await;
                }
                Effect::RunActivation(target) => {
                    if let Some(link) = &self.link {
                        spawn_activation(
                            link.commands.clone(),
                            target,
                            self.tunables.activation_write_delay,
                        );
                    }
                }
                Effect::Write { target, payload } => {
                    self.link_command(LinkCommand::Write {
                        target,
                        payload,
                        acknowledged: true,
                    })
                    .await;
                }
                Effect::ArmConnectTimeout(delay) => {
                    self.connect_deadline = Some(now() + delay);
                }
                Effect::DisarmConnectTimeout => self.connect_deadline = None,
                Effect::ScheduleRetry(delay) => self.retry_deadline = Some(now() + delay),
                Effect::CancelRetry => self.retry_deadline = None,
                Effect::PersistDevice(device) => {
                    if let Some(store) = &self.store
                        && let Err(e) = store.save(&device)
                    {
                        tracing::warn!(error = %e, "could not persist device");
                    }
                }
                Effect::ClearPersisted => {
                    if let Some(store) = &self.store
                        && let Err(e) = store.clear()
                    {
                        tracing::warn!(error = %e, "could not clear device store");
                    }
                }
                Effect::Emit(event) => self.bus.broadcast(&event),
            }
        }
    }

    async fn link_command(&mut self, command: LinkCommand) {
        if let Some(link) = &self.link
            && link.commands.send(command).await.is_err()
        {
            tracing::warn!("link task is gone");
        }
    }
}
