use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use log::{error, info, trace};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::transport::{AdvertisementStream, Transport};

/// Feeds advertisements from the transport into the device registry
pub struct BluetoothScanner {
    transport: Arc<dyn Transport>,
    registry: Arc<DeviceRegistry>,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<Result<()>>>,
}

impl BluetoothScanner {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            transport,
            registry,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    /// Stops any running scan, clears the registry and starts a new scan.
    pub async fn start_scan(&mut self) -> Result<()> {
        if self.scan_task_handle.is_some() {
            self.stop_scan().await?;
        }
        self.registry.clear();

        let scan_stream = self.transport.start_scan().await?;
        self.cancel_token = CancellationToken::new();
        let cancel_token_for_task = self.cancel_token.clone();
        let registry_for_task = self.registry.clone();

        let handle = tokio::spawn(async move {
            Self::internal_scan_task(scan_stream, registry_for_task, cancel_token_for_task).await
        });
        self.scan_task_handle = Some(handle);

        info!("Device scan task started.");
        Ok(())
    }

    async fn internal_scan_task(
        mut scan_stream: AdvertisementStream,
        registry: Arc<DeviceRegistry>,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    let Some(advertisement) = result else {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    };
                    trace!("Advertisement: {:?}", advertisement);
                    if registry.observe(&advertisement) {
                        registry.refresh();
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        Ok(())
    }

    pub async fn stop_scan(&mut self) -> Result<()> {
        info!("Stopping Bluetooth scan.");
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task_handle.take() {
            match handle.await {
                Ok(Ok(())) => info!("Scan task finished."),
                Ok(Err(e)) => error!("Scan task finished with an error: {:?}", e),
                Err(e) if e.is_cancelled() => info!("Scan task was cancelled."),
                Err(e) => error!("Scan task finished with an unexpected join error: {:?}", e),
            }
        } else {
            info!("No active scan task handle found to wait for.");
        }
        Ok(())
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
