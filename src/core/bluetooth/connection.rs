//! Bluetooth connection handling for the lock
//! `BluestTransport` implements the transport capability on top of the platform
//! adapter exposed by `bluest`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result, anyhow};
use bluest::{Adapter, Characteristic, Device, Service};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::{mpsc, oneshot};

use crate::core::bluetooth::error::TransportError;
use crate::core::bluetooth::transport::{
    AdvertisementStream, ByteStream, RetryPolicy, Transport, TransportResult,
};
use crate::core::bluetooth::types::{
    Advertisement, CharacteristicBinding, CharacteristicHandle, ServiceLayout, WriteMode,
};

/// Transport backed by the default system adapter
#[derive(Clone)]
pub struct BluestTransport {
    adapter: Adapter,
    /// Devices seen while scanning, keyed by address
    devices: Arc<Mutex<HashMap<String, Device>>>,
    /// Characteristics bound by `resolve_service`
    characteristics: Arc<Mutex<HashMap<CharacteristicHandle, Characteristic>>>,
    /// Addresses whose cached service description must not be reused
    stale_services: Arc<Mutex<HashSet<String>>>,
}

impl BluestTransport {
    /// Opens the default adapter and waits until it is powered on.
    pub async fn new() -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!(TransportError::AdapterUnavailable))?;
        adapter
            .wait_available()
            .await
            .context("Bluetooth adapter did not become available")?;
        info!("Bluetooth adapter is available.");

        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            characteristics: Arc::new(Mutex::new(HashMap::new())),
            stale_services: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    fn device(&self, address: &str) -> TransportResult<Device> {
        self.devices
            .lock()
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::UnknownDevice(address.to_string()))
    }

    fn characteristic(&self, handle: &CharacteristicHandle) -> TransportResult<Characteristic> {
        self.characteristics
            .lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| TransportError::UnknownCharacteristic {
                device: handle.device.clone(),
                uuid: handle.uuid,
            })
    }

    /// Forwards scan results into `tx` until the receiving side is dropped
    async fn forward_scan(
        adapter: Adapter,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        tx: mpsc::UnboundedSender<Advertisement>,
    ) -> Result<()> {
        info!("Starting bluetooth scan");
        let mut scan_stream = adapter.scan(&[]).await?;

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    let Some(discovered) = result else {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    };
                    let Some(rssi) = discovered.rssi else {
                        continue;
                    };

                    let id = discovered.device.id().to_string();
                    let address = extract_mac_address(&id).unwrap_or(id);
                    debug!(
                        "Found device - Address: {}, Name: {:?}, RSSI: {}",
                        address, discovered.adv_data.local_name, rssi
                    );

                    devices.lock().insert(address.clone(), discovered.device);
                    let advertisement = Advertisement {
                        address,
                        name: discovered.adv_data.local_name,
                        rssi,
                    };
                    if tx.send(advertisement).is_err() {
                        break;
                    }
                }
                _ = tx.closed() => {
                    break;
                }
            }
        }

        info!("Bluetooth scan stopped.");
        Ok(())
    }

    async fn try_connect(&self, device: &Device) -> TransportResult<()> {
        if !device.is_connected().await {
            info!("Initiating connection to {}...", device.id());
            self.adapter.connect_device(device).await?;
        }
        Ok(())
    }

    async fn lock_services(
        &self,
        address: &str,
        device: &Device,
        layout: ServiceLayout,
    ) -> TransportResult<Vec<Service>> {
        let fresh = self.stale_services.lock().remove(address);
        if fresh {
            info!("Rediscovering services on {}", address);
            Ok(device.discover_services_with_uuid(layout.service).await?)
        } else {
            let services = device.services().await?;
            Ok(services
                .into_iter()
                .filter(|service| service.uuid() == layout.service)
                .collect())
        }
    }

    /// Forwards notifications from `characteristic` until the link drops or the
    /// receiver is dropped. The subscription result is reported through `ready`.
    async fn forward_notifications(
        characteristic: Characteristic,
        tx: mpsc::UnboundedSender<Vec<u8>>,
        ready: oneshot::Sender<TransportResult<()>>,
    ) {
        let mut stream = match characteristic.notify().await {
            Ok(stream) => {
                let _ = ready.send(Ok(()));
                stream
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                let _ = ready.send(Err(e.into()));
                return;
            }
        };

        info!("Listening for lock notifications...");
        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(value)) => {
                        debug!("Received lock data: {:02X?}", value);
                        if tx.send(value).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        break;
                    }
                    None => break,
                },
                _ = tx.closed() => break,
            }
        }

        info!("Notification stream ended");
    }
}

/// Turns the receiving half of a forwarding channel into an owned stream
fn receiver_stream<T: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<T>,
) -> futures_util::stream::BoxStream<'static, T> {
    futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
}

/// Forgets devices from earlier scans unless they still have bound characteristics
fn prune_devices<T>(devices: &mut HashMap<String, T>, bound: &HashSet<String>) {
    devices.retain(|address, _| bound.contains(address));
}

/// Pulls the MAC address out of a platform device id, if it carries one.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    static MAC_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = MAC_RE
        .get_or_init(|| Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok())
        .as_ref()?;
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}

#[async_trait::async_trait]
impl Transport for BluestTransport {
    async fn start_scan(&self) -> TransportResult<AdvertisementStream> {
        let bound: HashSet<String> = self
            .characteristics
            .lock()
            .keys()
            .map(|handle| handle.device.clone())
            .collect();
        prune_devices(&mut *self.devices.lock(), &bound);

        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = self.adapter.clone();
        let devices = self.devices.clone();

        tokio::spawn(async move {
            if let Err(e) = Self::forward_scan(adapter, devices, tx).await {
                error!("Bluetooth scan failed: {:?}", e);
            }
        });

        Ok(receiver_stream(rx))
    }

    /// Connect to the lock with retry mechanism
    async fn connect(&self, address: &str, policy: RetryPolicy) -> TransportResult<()> {
        let device = self.device(address)?;
        let mut last_error = None;

        for attempt in 1..=policy.attempts {
            match self.try_connect(&device).await {
                Ok(()) => {
                    info!("Successfully connected to {}", address);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    last_error = Some(e);

                    if attempt < policy.attempts {
                        info!("Retrying connection in {} ms...", policy.delay.as_millis());
                        tokio::time::sleep(policy.delay).await;
                    }
                }
            }
        }

        Err(TransportError::ConnectFailed {
            address: address.to_string(),
            attempts: policy.attempts,
            reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn disconnect(&self, address: &str) -> TransportResult<()> {
        let device = self.device(address)?;
        self.characteristics
            .lock()
            .retain(|handle, _| handle.device != address);

        if device.is_connected().await {
            info!("Disconnecting from device {}", address);
            self.adapter.disconnect_device(&device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", address);
        }
        Ok(())
    }

    async fn resolve_service(
        &self,
        address: &str,
        layout: ServiceLayout,
    ) -> TransportResult<Option<CharacteristicBinding>> {
        let device = self.device(address)?;
        let services = self.lock_services(address, &device, layout).await?;
        let Some(service) = services.into_iter().next() else {
            warn!("Lock service {} not found on {}", layout.service, address);
            return Ok(None);
        };
        info!("Found lock service: {}", service.uuid());

        let mut notify_char = None;
        let mut write_char = None;
        for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid();
            if uuid == layout.notify {
                info!("Found notification characteristic: {}", uuid);
                notify_char = Some(characteristic);
            } else if uuid == layout.write {
                info!("Found write characteristic: {}", uuid);
                write_char = Some(characteristic);
            }
        }

        let (Some(notify_char), Some(write_char)) = (notify_char, write_char) else {
            warn!("Lock characteristics missing on {}", address);
            return Ok(None);
        };

        let binding = CharacteristicBinding {
            notify: CharacteristicHandle::new(address, layout.notify),
            write: CharacteristicHandle::new(address, layout.write),
        };
        let mut characteristics = self.characteristics.lock();
        characteristics.insert(binding.notify.clone(), notify_char);
        characteristics.insert(binding.write.clone(), write_char);
        Ok(Some(binding))
    }

    async fn read_characteristic(&self, handle: &CharacteristicHandle) -> TransportResult<Vec<u8>> {
        let characteristic = self.characteristic(handle)?;
        Ok(characteristic.read().await?)
    }

    async fn write_characteristic(
        &self,
        handle: &CharacteristicHandle,
        bytes: &[u8],
        mode: WriteMode,
    ) -> TransportResult<()> {
        let characteristic = self.characteristic(handle)?;
        match mode {
            WriteMode::WithResponse => characteristic.write(bytes).await?,
            WriteMode::WithoutResponse => characteristic.write_without_response(bytes).await?,
        }
        Ok(())
    }

    async fn enable_notifications(
        &self,
        handle: &CharacteristicHandle,
    ) -> TransportResult<ByteStream> {
        let characteristic = self.characteristic(handle)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        info!("Subscribing to notifications...");
        tokio::spawn(Self::forward_notifications(characteristic, tx, ready_tx));

        ready_rx
            .await
            .map_err(|_| TransportError::Backend("notification task ended".to_string()))??;
        Ok(receiver_stream(rx))
    }

    async fn purge_service_cache(&self, address: &str) -> TransportResult<()> {
        info!("Purging cached services for {}", address);
        self.characteristics
            .lock()
            .retain(|handle, _| handle.device != address);
        self.stale_services.lock().insert(address.to_string());
        Ok(())
    }
}
