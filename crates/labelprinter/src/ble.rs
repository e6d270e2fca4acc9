//! BLE backend using btleplug.
//!
//! Scans for label printers, connects by MAC, platform UUID or advertised
//! name, resolves the GATT profile and hands the transport a [`BleLink`]
//! plus a bounded notification queue.

use std::collections::HashSet;

use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::ble_init::open_with_retry;
use crate::cache::PrinterCache;
use crate::config::{DriverConfig, device_matches_target};
use crate::link::{self, Link};
use crate::transport::{MAX_NOTIFICATION_BYTES, NOTIFICATION_QUEUE, PeripheralHandle};
use crate::{LabelPrinterError, Result, Stage};

/// Advertised-name fragments of supported printers.
pub const PRINTER_NAME_PATTERNS: &[&str] = &["P31", "POLONO", "MAKEID", "NIIMBOT", "LABEL"];

/// Whether an advertised name looks like a supported printer.
pub fn is_printer_name(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    PRINTER_NAME_PATTERNS.iter().any(|p| upper.contains(p))
}

/// Discovered BLE device information.
#[derive(Debug, Clone)]
pub struct DiscoveredPrinter {
    /// Advertised name (may be empty).
    pub name: String,
    /// Platform-specific peripheral identifier.
    pub id: String,
    /// MAC address, or `id` where the platform hides it (macOS).
    pub address: String,
    pub rssi: Option<i16>,
    /// The underlying btleplug peripheral handle.
    pub peripheral: Peripheral,
}

/// Owns the BLE adapter and opens printer connections.
pub struct BleCentral {
    adapter: Adapter,
    config: DriverConfig,
}

impl BleCentral {
    /// Open the first BLE adapter.
    pub async fn new(config: DriverConfig) -> Result<Self> {
        let adapter = open_with_retry(first_adapter).await?;
        Ok(Self { adapter, config })
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Scan for printers during the configured window, strongest signal first.
    pub async fn scan(&self) -> Result<Vec<DiscoveredPrinter>> {
        tracing::info!(timeout = ?self.config.scan_timeout, "Starting BLE scan");
        let mut found = self.discover(None).await?;
        found.sort_by(|a, b| b.rssi.unwrap_or(i16::MIN).cmp(&a.rssi.unwrap_or(i16::MIN)));
        tracing::info!(count = found.len(), "BLE scan complete");
        Ok(found)
    }

    /// Locate `target` within the discovery window and connect to it.
    pub async fn connect(&self, target: &str) -> Result<PeripheralHandle<BleLink>> {
        let device = self
            .discover(Some(target))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LabelPrinterError::NotFound(target.to_string()))?;
        self.connect_device(&device).await
    }

    /// Connect to the configured address, falling back to the cached printer.
    /// A successful connection refreshes the cache.
    pub async fn connect_preferred(&self, cache: &PrinterCache) -> Result<PeripheralHandle<BleLink>> {
        let target = if self.config.printer_address.is_empty() {
            cache
                .load()
                .map(|cached| cached.address)
                .ok_or_else(|| LabelPrinterError::NotFound("no address configured or cached".into()))?
        } else {
            self.config.printer_address.clone()
        };

        let device = self
            .discover(Some(&target))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LabelPrinterError::NotFound(target.clone()))?;
        let handle = self.connect_device(&device).await?;
        if let Err(e) = cache.save(&device.address, &device.name) {
            tracing::warn!(error = %e, "Failed to update printer cache");
        }
        Ok(handle)
    }

    /// Connect to an already discovered printer.
    pub async fn connect_device(&self, device: &DiscoveredPrinter) -> Result<PeripheralHandle<BleLink>> {
        let peripheral = &device.peripheral;
        let after = self.config.connect_timeout;
        tracing::info!(id = %device.id, name = %device.name, "Connecting to printer");

        match tokio::time::timeout(after, peripheral.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(LabelPrinterError::LinkRefused(e.to_string())),
            Err(_) => {
                return Err(LabelPrinterError::Timeout {
                    stage: Stage::Connect,
                    after,
                });
            }
        }

        match self.open_link(device).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                if let Err(de) = peripheral.disconnect().await {
                    tracing::debug!(error = %de, "Disconnect after failed setup");
                }
                Err(e)
            }
        }
    }

    async fn open_link(&self, device: &DiscoveredPrinter) -> Result<PeripheralHandle<BleLink>> {
        let peripheral = &device.peripheral;
        let after = self.config.connect_timeout;

        match tokio::time::timeout(after, peripheral.discover_services()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(LabelPrinterError::LinkRefused(e.to_string())),
            Err(_) => {
                return Err(LabelPrinterError::Timeout {
                    stage: Stage::Discovery,
                    after,
                });
            }
        }

        let characteristics = peripheral.characteristics();
        let available: Vec<(Uuid, Uuid)> = characteristics
            .iter()
            .map(|c| (c.service_uuid, c.uuid))
            .collect();
        let profile = link::resolve_profile(&available).ok_or_else(|| {
            LabelPrinterError::NotFound(format!("{}: no known printer service", device.id))
        })?;
        let find = |uuid: Uuid| -> Result<Characteristic> {
            characteristics
                .iter()
                .find(|c| c.service_uuid == profile.service && c.uuid == uuid)
                .cloned()
                .ok_or_else(|| LabelPrinterError::NotFound(format!("characteristic {uuid}")))
        };
        let write_char = find(profile.write)?;
        let notify_char = find(profile.notify)?;

        peripheral
            .subscribe(&notify_char)
            .await
            .map_err(|e| LabelPrinterError::LinkRefused(e.to_string()))?;
        let stream = peripheral
            .notifications()
            .await
            .map_err(|e| LabelPrinterError::LinkRefused(e.to_string()))?;

        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE);
        tokio::spawn(forward_notifications(stream, notify_char.uuid, tx));

        let write_type = if write_char
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        let link = BleLink {
            peripheral: peripheral.clone(),
            write_char,
            write_type,
            address: device.address.clone(),
            mtu: self.config.link_mtu,
        };

        let handle = PeripheralHandle::new(link, rx, self.config.transport_config());
        handle.negotiate_mtu().await?;
        tracing::info!(
            address = %device.address,
            profile = profile.name,
            write_type = ?write_type,
            "Connected to printer"
        );
        Ok(handle)
    }

    /// Scan until the window closes, or until `target` shows up.
    async fn discover(&self, target: Option<&str>) -> Result<Vec<DiscoveredPrinter>> {
        let mut events = self.adapter.events().await.map_err(ble_error)?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(ble_error)?;

        let mut found = Vec::new();
        let mut seen = HashSet::new();

        // Peripherals the adapter already knows about (bonded or cached).
        for peripheral in self.adapter.peripherals().await.map_err(ble_error)? {
            if let Some(device) = inspect(peripheral, target, &mut seen).await {
                found.push(device);
            }
        }

        if target.is_none() || found.is_empty() {
            let deadline = tokio::time::sleep(self.config.scan_timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    event = events.next() => match event {
                        Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                            let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                                continue;
                            };
                            if let Some(device) = inspect(peripheral, target, &mut seen).await {
                                found.push(device);
                                if target.is_some() {
                                    break;
                                }
                            }
                        }
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }

        if let Err(e) = self.adapter.stop_scan().await {
            tracing::warn!(error = %e, "Failed to stop BLE scan");
        }
        Ok(found)
    }
}

async fn first_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(ble_error)?;
    manager
        .adapters()
        .await
        .map_err(ble_error)?
        .into_iter()
        .next()
        .ok_or_else(|| LabelPrinterError::Ble("No BLE adapter found".into()))
}

/// Turn a peripheral into a `DiscoveredPrinter` if it is wanted.
///
/// With a target, only that device matches; without one, anything that
/// looks like a printer by name or advertised service.
async fn inspect(
    peripheral: Peripheral,
    target: Option<&str>,
    seen: &mut HashSet<String>,
) -> Option<DiscoveredPrinter> {
    let id = peripheral.id().to_string();
    if seen.contains(&id) {
        return None;
    }
    let props = peripheral.properties().await.ok().flatten()?;
    let name = props.local_name.unwrap_or_default();
    let address = if props.address == BDAddr::default() {
        id.clone()
    } else {
        props.address.to_string()
    };

    let wanted = match target {
        Some(t) => device_matches_target(&id, &name, t) || device_matches_target(&address, &name, t),
        None => is_printer_name(&name) || link::advertises_known_service(&props.services),
    };
    if !wanted {
        return None;
    }

    seen.insert(id.clone());
    tracing::info!(name = %name, id = %id, rssi = ?props.rssi, "Found printer");
    Some(DiscoveredPrinter {
        name,
        id,
        address,
        rssi: props.rssi,
        peripheral,
    })
}

/// Copy notifications from `uuid` into the handle's queue.
///
/// Oversized notifications and anything beyond the queue capacity are
/// dropped. Ends when the stream ends or the handle goes away; dropping the
/// sender is what the transport sees as link loss.
async fn forward_notifications<S>(mut stream: S, uuid: Uuid, tx: mpsc::Sender<Vec<u8>>)
where
    S: Stream<Item = ValueNotification> + Unpin,
{
    while let Some(notification) = stream.next().await {
        if notification.uuid != uuid {
            continue;
        }
        let len = notification.value.len();
        if len > MAX_NOTIFICATION_BYTES {
            tracing::warn!(len, "Dropping oversized notification");
            continue;
        }
        match tx.try_send(notification.value) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(len, "Notification queue full, dropping");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
    tracing::debug!("Notification stream ended");
}

fn ble_error(err: btleplug::Error) -> LabelPrinterError {
    LabelPrinterError::Ble(err.to_string())
}

/// [`Link`] over a connected btleplug peripheral.
pub struct BleLink {
    peripheral: Peripheral,
    write_char: Characteristic,
    write_type: WriteType,
    address: String,
    mtu: u16,
}

impl Link for BleLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn request_mtu(&self, requested: u16) -> Result<u16> {
        // btleplug negotiates the ATT MTU itself and does not report it.
        Ok(requested.min(self.mtu))
    }

    async fn write_chunk(&self, chunk: &[u8]) -> Result<()> {
        let Err(e) = self
            .peripheral
            .write(&self.write_char, chunk, self.write_type)
            .await
        else {
            return Ok(());
        };

        let connected = match e {
            btleplug::Error::NotConnected => false,
            _ => self.peripheral.is_connected().await.unwrap_or(false),
        };
        if connected {
            Err(LabelPrinterError::Ble(e.to_string()))
        } else {
            Err(LabelPrinterError::LinkLost(e.to_string()))
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await.map_err(ble_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(uuid: Uuid, len: usize) -> ValueNotification {
        ValueNotification {
            uuid,
            value: vec![0x42; len],
        }
    }

    #[test]
    fn test_printer_name_patterns() {
        assert!(is_printer_name("P31S-1A2B"));
        assert!(is_printer_name("Polono P31"));
        assert!(is_printer_name("niimbot d11"));
        assert!(is_printer_name("MyLabelMaker"));
        assert!(!is_printer_name("Headphones"));
        assert!(!is_printer_name(""));
    }

    #[tokio::test]
    async fn test_forwarding_filters_and_bounds() {
        let notify = link::PRIMARY_PROFILE.notify;
        let other = link::PRIMARY_PROFILE.read.unwrap();
        let items = vec![
            notification(notify, 12),
            notification(other, 12),
            notification(notify, MAX_NOTIFICATION_BYTES + 1),
            notification(notify, MAX_NOTIFICATION_BYTES),
        ];
        let (tx, mut rx) = mpsc::channel(NOTIFICATION_QUEUE);
        forward_notifications(futures::stream::iter(items), notify, tx).await;

        assert_eq!(rx.recv().await.unwrap().len(), 12);
        assert_eq!(rx.recv().await.unwrap().len(), MAX_NOTIFICATION_BYTES);
        // Sender dropped when the stream ended.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forwarding_drops_when_queue_full() {
        let notify = link::PRIMARY_PROFILE.notify;
        let items: Vec<_> = (0..NOTIFICATION_QUEUE + 20)
            .map(|_| notification(notify, 4))
            .collect();
        let (tx, mut rx) = mpsc::channel(NOTIFICATION_QUEUE);
        forward_notifications(futures::stream::iter(items), notify, tx).await;

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, NOTIFICATION_QUEUE);
    }
}
