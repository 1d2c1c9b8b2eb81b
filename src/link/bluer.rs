//! BlueZ D-Bus GATT backend.
//!
//! [`open_link`] spawns a task that owns the whole Bluetooth session for one
//! connection and translates between the platform API and the plain
//! [`LinkCommand`]/[`LinkEvent`] protocol. Every exit path, including
//! connect failures and unexpected peripheral disconnects, ends with exactly
//! one [`LinkEvent::Down`].

use super::{
    CharacteristicInfo, GattProfile, LINK_CHANNEL_BUFFER_SIZE, LinkCommand, LinkError, LinkEvent,
    ServiceInfo,
};
use crate::mac_address::MacAddress;
use bluer::gatt::remote::Characteristic;
use bluer::{Device, DeviceEvent, DeviceProperty, Session};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use tokio::sync::mpsc;
use uuid::Uuid;

type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Open a connection to a peripheral.
///
/// Returns immediately with the command/event channel pair; the connection
/// attempt runs on the spawned task. Dropping the command sender closes the
/// link.
pub fn open_link(address: MacAddress) -> (mpsc::Sender<LinkCommand>, mpsc::Receiver<LinkEvent>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(LINK_CHANNEL_BUFFER_SIZE);
    let (event_tx, event_rx) = mpsc::channel(LINK_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        let reason = match run_link(address, cmd_rx, &event_tx).await {
            Ok(reason) => reason,
            Err(e) => e.to_string(),
        };
        let _ = event_tx.send(LinkEvent::Down { reason }).await;
    });

    (cmd_tx, event_rx)
}

/// Connect, discover, then serve commands until the link ends. Returns the
/// human-readable reason the link went down.
async fn run_link(
    address: MacAddress,
    mut commands: mpsc::Receiver<LinkCommand>,
    events: &mpsc::Sender<LinkEvent>,
) -> Result<String, LinkError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    let device = adapter.device(address.into())?;

    device.connect().await?;
    if events.send(LinkEvent::Up).await.is_err() {
        let _ = device.disconnect().await;
        return Ok("link owner went away".into());
    }

    if let Ok(Some(name)) = device.name().await {
        let _ = events.send(LinkEvent::NameResolved(name)).await;
    }

    let (profile, characteristics) = snapshot_services(&device).await?;
    let _ = events.send(LinkEvent::Services(profile)).await;

    let mut device_events = device.events().await?;
    let mut notifications: Option<NotificationStream> = None;

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                None | Some(LinkCommand::Close) => {
                    let _ = device.disconnect().await;
                    return Ok("closed".into());
                }
                Some(LinkCommand::Subscribe(target)) => {
                    let key = (target.service, target.characteristic);
                    match characteristics.get(&key) {
                        Some(characteristic) => match characteristic.notify().await {
                            Ok(stream) => {
                                notifications = Some(Box::pin(stream));
                                let _ = events.send(LinkEvent::Subscribed).await;
                            }
                            Err(e) => {
                                let _ = events
                                    .send(LinkEvent::SubscribeFailed(e.to_string()))
                                    .await;
                            }
                        },
                        None => {
                            let _ = events
                                .send(LinkEvent::SubscribeFailed(
                                    "characteristic no longer present".into(),
                                ))
                                .await;
                        }
                    }
                }
                Some(LinkCommand::Write {
                    target,
                    payload,
                    acknowledged,
                }) => {
                    let key = (target.service, target.characteristic);
                    if let Some(characteristic) = characteristics.get(&key) {
                        if let Err(e) = characteristic.write(&payload).await {
                            tracing::warn!(
                                characteristic = %target.characteristic,
                                error = %e,
                                "characteristic write failed"
                            );
                            if acknowledged {
                                let _ =
                                    events.send(LinkEvent::WriteFailed(e.to_string())).await;
                            }
                        }
                    } else if acknowledged {
                        let _ = events
                            .send(LinkEvent::WriteFailed(
                                "characteristic not available".to_string(),
                            ))
                            .await;
                    }
                }
            },

            frame = next_notification(&mut notifications) => match frame {
                Some(data) => {
                    if events.send(LinkEvent::Notification(data)).await.is_err() {
                        let _ = device.disconnect().await;
                        return Ok("link owner went away".into());
                    }
                }
                // notify session ended without a disconnect event
                None => notifications = None,
            },

            ev = device_events.next() => match ev {
                Some(DeviceEvent::PropertyChanged(DeviceProperty::Connected(false))) => {
                    return Ok("peripheral disconnected".into());
                }
                Some(_) => {}
                None => return Ok("device event stream ended".into()),
            },
        }
    }
}

/// Walk the discovered services into a plain [`GattProfile`], keeping the
/// live characteristic handles for later subscribe/write commands.
async fn snapshot_services(
    device: &Device,
) -> Result<(GattProfile, HashMap<(Uuid, Uuid), Characteristic>), LinkError> {
    let mut profile = GattProfile::default();
    let mut handles = HashMap::new();

    for service in device.services().await? {
        let service_uuid = service.uuid().await?;
        let mut info = ServiceInfo {
            uuid: service_uuid,
            characteristics: Vec::new(),
        };
        for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid().await?;
            let flags = characteristic.flags().await?;
            info.characteristics.push(CharacteristicInfo {
                uuid,
                notify: flags.notify,
                write: flags.write,
                write_without_response: flags.write_without_response,
            });
            handles.insert((service_uuid, uuid), characteristic);
        }
        profile.services.push(info);
    }

    Ok((profile, handles))
}

/// Await the next notification frame, or forever when not subscribed.
async fn next_notification(stream: &mut Option<NotificationStream>) -> Option<Vec<u8>> {
    match stream {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}
