//! Host radio backed by btleplug.
//!
//! [`BtleplugRadio`] implements [`Radio`] on desktop Bluetooth stacks
//! (BlueZ, CoreBluetooth, WinRT). Two kinds of background task feed the
//! shared [`RadioEvents`] stream: one adapter pump translating
//! `CentralEvent`s into advertisements and disconnects, and one
//! notification pump per subscribed link.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::discovered::DiscoveredPeripherals;
use crate::ble::radio::{
    event_channel, Advertisement, CharacteristicHandle, ConnectionHandle, PeripheralAddress,
    Radio, RadioEvent, RadioEventSender, RadioEvents, ServiceHandle, SubscribeOutcome,
};
use crate::config::ScanParams;
use crate::error::{Error, Result};

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// One established link.
struct Link {
    peripheral: Peripheral,
    /// Notification pump, once subscribed.
    listener: Option<JoinHandle<()>>,
}

impl Link {
    fn stop_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// Radio implementation over the first btleplug adapter.
pub struct BtleplugRadio {
    /// The BLE adapter.
    adapter: Adapter,
    /// Where radio events go.
    events: RadioEventSender,
    /// Whether advertisements are forwarded.
    is_scanning: Arc<AtomicBool>,
    /// Peripherals seen during the current pass, by address.
    discovered: Arc<RwLock<DiscoveredPeripherals<Peripheral>>>,
    /// Established links.
    links: Arc<RwLock<HashMap<ConnectionHandle, Link>>>,
    /// Source of connection handles. Never reused.
    next_connection: AtomicU64,
    /// Incremented on every scan start/stop so stale timers do nothing.
    scan_epoch: Arc<AtomicU64>,
    /// Timer ending the current bounded pass.
    scan_timer: RwLock<Option<JoinHandle<()>>>,
    /// Adapter event pump.
    pump: JoinHandle<()>,
}

impl BtleplugRadio {
    /// Open the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<(Self, RadioEvents)> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter).await
    }

    /// Wrap a specific adapter.
    pub async fn with_adapter(adapter: Adapter) -> Result<(Self, RadioEvents)> {
        let (events, rx) = event_channel();
        let central_events = adapter.events().await.map_err(Error::Bluetooth)?;

        let is_scanning = Arc::new(AtomicBool::new(false));
        let discovered = Arc::new(RwLock::new(DiscoveredPeripherals::default()));
        let links = Arc::new(RwLock::new(HashMap::new()));

        let pump = tokio::spawn(Self::pump_adapter_events(
            central_events,
            adapter.clone(),
            is_scanning.clone(),
            discovered.clone(),
            links.clone(),
            events.clone(),
        ));

        let radio = Self {
            adapter,
            events,
            is_scanning,
            discovered,
            links,
            next_connection: AtomicU64::new(1),
            scan_epoch: Arc::new(AtomicU64::new(0)),
            scan_timer: RwLock::new(None),
            pump,
        };

        Ok((radio, rx))
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    fn link_peripheral(&self, connection: ConnectionHandle) -> Result<Peripheral> {
        self.links
            .read()
            .get(&connection)
            .map(|link| link.peripheral.clone())
            .ok_or(Error::NotConnected {
                connection: connection.0,
            })
    }

    fn find_characteristic(
        peripheral: &Peripheral,
        handle: &CharacteristicHandle,
    ) -> Option<Characteristic> {
        peripheral
            .services()
            .into_iter()
            .filter(|service| service.uuid == handle.service)
            .flat_map(|service| service.characteristics)
            .find(|characteristic| characteristic.uuid == handle.uuid)
    }

    fn cancel_scan_timer(&self) {
        if let Some(timer) = self.scan_timer.write().take() {
            timer.abort();
        }
    }

    async fn pump_adapter_events(
        mut central_events: CentralEvents,
        adapter: Adapter,
        is_scanning: Arc<AtomicBool>,
        discovered: Arc<RwLock<DiscoveredPeripherals<Peripheral>>>,
        links: Arc<RwLock<HashMap<ConnectionHandle, Link>>>,
        events: RadioEventSender,
    ) {
        while let Some(event) = central_events.next().await {
            let forwarded = match event {
                CentralEvent::DeviceDiscovered(id)
                | CentralEvent::DeviceUpdated(id)
                | CentralEvent::ServicesAdvertisement { id, .. } => {
                    if !is_scanning.load(Ordering::SeqCst) {
                        continue;
                    }
                    match Self::advertisement(&adapter, &id, &discovered).await {
                        Some(advertisement) => {
                            events.unbounded_send(RadioEvent::Advertisement(advertisement))
                        }
                        None => continue,
                    }
                }
                CentralEvent::DeviceDisconnected(id) => {
                    match Self::drop_link(&links, &id) {
                        Some(connection) => {
                            debug!("Link {} dropped by peer", connection);
                            events.unbounded_send(RadioEvent::Disconnected { connection })
                        }
                        None => continue,
                    }
                }
                other => {
                    trace!("Unhandled central event: {:?}", other);
                    continue;
                }
            };

            if forwarded.is_err() {
                debug!("Radio event receiver dropped");
                break;
            }
        }

        debug!("Adapter event pump ended");
    }

    async fn advertisement(
        adapter: &Adapter,
        id: &PeripheralId,
        discovered: &Arc<RwLock<DiscoveredPeripherals<Peripheral>>>,
    ) -> Option<Advertisement> {
        let peripheral = match adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        let address = id.to_string();
        discovered.write().insert(address.clone(), peripheral);

        Some(Advertisement {
            address: PeripheralAddress::new(address),
            local_name: properties.local_name,
            rssi: properties.rssi,
            services: properties.services,
        })
    }

    /// Forget the link to `id`, returning its handle if there was one.
    fn drop_link(
        links: &Arc<RwLock<HashMap<ConnectionHandle, Link>>>,
        id: &PeripheralId,
    ) -> Option<ConnectionHandle> {
        let mut links = links.write();
        let connection = links
            .iter()
            .find(|(_, link)| link.peripheral.id() == *id)
            .map(|(connection, _)| *connection)?;

        if let Some(mut link) = links.remove(&connection) {
            link.stop_listener();
        }
        Some(connection)
    }
}

#[async_trait]
impl Radio for BtleplugRadio {
    async fn start_scan(&self, params: ScanParams) -> Result<()> {
        debug!(
            "Scan requested: interval {} / window {}, active {} (timing left to the platform)",
            params.interval, params.window, params.active
        );

        self.cancel_scan_timer();
        let epoch = self.scan_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.discovered.write().clear();

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;
        self.is_scanning.store(true, Ordering::SeqCst);

        if let Some(duration) = params.duration {
            let adapter = self.adapter.clone();
            let scan_epoch = self.scan_epoch.clone();
            let is_scanning = self.is_scanning.clone();
            let events = self.events.clone();

            let timer = tokio::spawn(async move {
                tokio::time::sleep(duration).await;

                if scan_epoch.load(Ordering::SeqCst) != epoch {
                    return;
                }

                is_scanning.store(false, Ordering::SeqCst);
                if let Err(e) = adapter.stop_scan().await {
                    warn!("Failed to stop timed scan: {}", e);
                }
                let _ = events.unbounded_send(RadioEvent::ScanComplete);
            });

            *self.scan_timer.write() = Some(timer);
        }

        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scan_epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_scan_timer();

        if !self.is_scanning.swap(false, Ordering::SeqCst) {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    async fn connect(&self, address: PeripheralAddress) -> Result<ConnectionHandle> {
        let peripheral = self
            .discovered
            .read()
            .get(address.as_str())
            .ok_or_else(|| Error::ConnectFailed {
                address: address.to_string(),
                reason: "peripheral was never discovered".to_string(),
            })?;

        peripheral
            .connect()
            .await
            .map_err(|e| Error::ConnectFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = peripheral.discover_services().await {
            error!("Failed to discover services: {}", e);
            if let Err(e) = peripheral.disconnect().await {
                warn!("Error disconnecting after failed discovery: {}", e);
            }
            return Err(Error::Bluetooth(e));
        }

        let connection = ConnectionHandle(self.next_connection.fetch_add(1, Ordering::SeqCst));
        self.links.write().insert(
            connection,
            Link {
                peripheral,
                listener: None,
            },
        );

        Ok(connection)
    }

    async fn request_mtu(&self, connection: ConnectionHandle, _mtu: u16) -> Result<u16> {
        self.link_peripheral(connection)?;
        Err(Error::NotSupported {
            operation: "MTU exchange (negotiated by the host stack)".to_string(),
        })
    }

    async fn discover_service(
        &self,
        connection: ConnectionHandle,
        service: Uuid,
    ) -> Result<Option<ServiceHandle>> {
        let peripheral = self.link_peripheral(connection)?;

        let found = peripheral.services().iter().any(|s| s.uuid == service);
        if !found {
            for s in peripheral.services() {
                debug!("  Available service: {}", s.uuid);
            }
        }

        Ok(found.then_some(ServiceHandle {
            connection,
            uuid: service,
        }))
    }

    async fn discover_characteristic(
        &self,
        service: ServiceHandle,
        characteristic: Uuid,
    ) -> Result<Option<CharacteristicHandle>> {
        let peripheral = self.link_peripheral(service.connection)?;
        let handle = CharacteristicHandle {
            connection: service.connection,
            service: service.uuid,
            uuid: characteristic,
        };

        Ok(Self::find_characteristic(&peripheral, &handle).map(|_| handle))
    }

    async fn subscribe(&self, handle: CharacteristicHandle) -> Result<SubscribeOutcome> {
        let peripheral = self.link_peripheral(handle.connection)?;

        let characteristic = Self::find_characteristic(&peripheral, &handle).ok_or_else(|| {
            Error::CharacteristicNotFound {
                uuid: handle.uuid.to_string(),
            }
        })?;

        debug!(
            "Found characteristic {}, properties: {:?}",
            handle.uuid, characteristic.properties
        );

        if !characteristic.properties.contains(CharPropFlags::NOTIFY) {
            return Ok(SubscribeOutcome::NotifyUnsupported);
        }

        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;
        let events = self.events.clone();

        let listener = tokio::spawn(async move {
            debug!("Notification listener started for {}", handle.connection);

            while let Some(notification) = notifications.next().await {
                if notification.uuid != handle.uuid {
                    continue;
                }

                trace!(
                    "Notification received: {} bytes, data: {:02X?}",
                    notification.value.len(),
                    &notification.value[..std::cmp::min(notification.value.len(), 20)]
                );

                let event = RadioEvent::Notification {
                    characteristic: handle,
                    data: notification.value,
                };
                if events.unbounded_send(event).is_err() {
                    break;
                }
            }

            debug!("Notification listener stopped");
        });

        match self.links.write().get_mut(&handle.connection) {
            Some(link) => {
                link.stop_listener();
                link.listener = Some(listener);
            }
            // The link dropped while we were subscribing.
            None => listener.abort(),
        }

        Ok(SubscribeOutcome::Subscribed)
    }

    async fn disconnect(&self, connection: ConnectionHandle) -> Result<()> {
        let link = self.links.write().remove(&connection);

        let Some(mut link) = link else {
            debug!("Connection {} already gone", connection);
            return Ok(());
        };

        link.stop_listener();
        link.peripheral.disconnect().await.map_err(Error::Bluetooth)
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        self.is_scanning.store(false, Ordering::SeqCst);
        self.cancel_scan_timer();
        self.pump.abort();
        for link in self.links.write().values_mut() {
            link.stop_listener();
        }
    }
}
