//! BlueZ D-Bus discovery backend.
//!
//! Uses the `bluer` crate to talk to the BlueZ daemon via D-Bus. Requires a
//! running `bluetoothd`. Discovery runs for a fixed window and stops on its
//! own; the receiver sees the channel close when the window ends.

use super::{SCAN_CHANNEL_BUFFER_SIZE, ScanError, ScanEvent};
use bluer::{Adapter, AdapterEvent, Address, Session};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;

/// Start one discovery window.
///
/// Returns a receiver for raw sightings. A task owning all Bluetooth state
/// forwards advertisements until the window elapses, the receiver is dropped,
/// or the adapter stream ends; discovery stops when the task exits.
pub async fn start_scan(window: Duration) -> Result<mpsc::Receiver<ScanEvent>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;

    let discover = adapter.discover_devices().await?;
    let (tx, rx) = mpsc::channel(SCAN_CHANNEL_BUFFER_SIZE);

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        let _session = session;
        let mut discover = discover;
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = discover.next() => match event {
                    Some(AdapterEvent::DeviceAdded(address)) => {
                        match sight_device(&adapter, address).await {
                            Ok(sighting) => {
                                if tx.send(sighting).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::debug!(%address, error = %e, "could not read advertisement properties");
                            }
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
        tracing::debug!("discovery window closed");
    });

    Ok(rx)
}

/// Read the properties the filter and registry care about from a newly
/// discovered device.
async fn sight_device(adapter: &Adapter, address: Address) -> Result<ScanEvent, ScanError> {
    let device = adapter.device(address)?;
    let name = device.name().await?;
    // An advertisement without RSSI can never clear the signal floor
    let rssi = device.rssi().await?.unwrap_or(i16::MIN);
    let service_uuids = device
        .uuids()
        .await?
        .map(|set| set.into_iter().collect())
        .unwrap_or_default();

    Ok(ScanEvent {
        address: address.into(),
        name,
        rssi,
        service_uuids,
    })
}

#[cfg(test)]
mod tests {
    use crate::mac_address::MacAddress;
    use bluer::Address;

    #[test]
    fn address_round_trips_through_mac_address() {
        let addr = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let mac: MacAddress = addr.into();
        assert_eq!(mac, MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
        assert_eq!(Address::from(mac), addr);
    }
}
