//! Bluetooth manager for the lock bridge
//! This module provides the main interface for bluetooth operations

use std::sync::Arc;

use anyhow::Result;
use log::info;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::AppConfig;
use crate::core::bluetooth::error::SessionError;
use crate::core::bluetooth::registry::{DeviceFilter, DeviceRegistry, FilteredView};
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::session::ConnectionSession;
use crate::core::bluetooth::transport::{RetryPolicy, Transport};
use crate::core::bluetooth::types::DiscoveredDevice;

/// Manages Bluetooth operations
pub struct BluetoothManager {
    /// Discovered devices and the filtered view
    registry: Arc<DeviceRegistry>,
    /// Bluetooth scanner
    scanner: BluetoothScanner,
    /// Session for the single connected lock
    session: ConnectionSession,
}

impl BluetoothManager {
    pub fn new(transport: Arc<dyn Transport>, filter: DeviceFilter, policy: RetryPolicy) -> Self {
        let registry = Arc::new(DeviceRegistry::new(filter));
        let scanner = BluetoothScanner::new(transport.clone(), registry.clone());
        let session = ConnectionSession::create(transport, policy);

        Self {
            registry,
            scanner,
            session,
        }
    }

    pub fn from_config(transport: Arc<dyn Transport>, config: &AppConfig) -> Self {
        Self::new(
            transport,
            config.scan.device_filter(),
            config.connection.retry_policy(),
        )
    }

    pub async fn start_scan(&mut self) -> Result<()> {
        self.scanner.start_scan().await
    }

    pub async fn stop_scan(&mut self) -> Result<()> {
        self.scanner.stop_scan().await
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    pub fn set_name_filter(&self, required: bool) -> bool {
        self.registry.set_name_filter(required)
    }

    pub fn set_proximity_filter(&self, required: bool) -> bool {
        self.registry.set_proximity_filter(required)
    }

    /// The radio went away: stop scanning and drop everything discovered so far.
    pub async fn transport_disabled(&mut self) -> Result<()> {
        info!("Bluetooth transport disabled.");
        self.scanner.stop_scan().await?;
        self.registry.clear();
        Ok(())
    }

    pub fn filtered_devices(&self) -> FilteredView {
        self.registry.filtered()
    }

    pub fn subscribe_devices(&self) -> (FilteredView, UnboundedReceiver<FilteredView>) {
        self.registry.subscribe()
    }

    /// Filtered device with the strongest signal seen so far
    pub fn strongest_candidate(&self) -> Option<DiscoveredDevice> {
        self.registry.strongest_candidate()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn session(&self) -> &ConnectionSession {
        &self.session
    }

    /// Connects to the device with the given address
    pub fn connect_device(&self, address: &str) -> Result<(), SessionError> {
        info!("Connecting to device {}", address);
        self.session.connect(address)
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.session.disconnect()
    }

    pub fn try_unlock(&self) -> Result<(), SessionError> {
        self.session.try_unlock()
    }

    pub fn set_led(&self, on: bool) -> Result<(), SessionError> {
        self.session.set_led(on)
    }

    /// Stops scanning and shuts the session down.
    pub async fn dispose(mut self) -> Result<()> {
        self.scanner.stop_scan().await?;
        self.session.dispose().await;
        Ok(())
    }
}
