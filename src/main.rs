use std::sync::Arc;

use anyhow::{Result, anyhow};
use ble_lock_bridge_lib::config::AppConfig;
use ble_lock_bridge_lib::core::bluetooth::{
    BluestTransport, BluetoothManager, ConnectionState, DisconnectReason, Transport, signal_level,
};
use ble_lock_bridge_lib::logging;
use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{sleep, timeout};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = AppConfig::default_path()?;
    let config = AppConfig::load(&config_path).await?;
    logging::init(config.level_filter(), None);
    info!("Starting BLE lock bridge.");

    let transport: Arc<dyn Transport> = Arc::new(BluestTransport::new().await?);
    let mut manager = BluetoothManager::from_config(transport, &config);

    let result = run(&mut manager, &config).await;
    manager.dispose().await?;
    result
}

async fn run(manager: &mut BluetoothManager, config: &AppConfig) -> Result<()> {
    let (_, mut devices_rx) = manager.subscribe_devices();
    manager.start_scan().await?;

    let scan_window = sleep(config.scan.scan_duration());
    tokio::pin!(scan_window);
    loop {
        tokio::select! {
            _ = &mut scan_window => break,
            Some(view) = devices_rx.recv() => {
                if let Some(devices) = view {
                    debug!("{} matching device(s) in range", devices.len());
                }
            }
        }
    }
    manager.stop_scan().await?;

    let device = manager
        .strongest_candidate()
        .ok_or_else(|| anyhow!("No lock found within {:?}", config.scan.scan_duration()))?;
    info!(
        "Selected {} ({:?}), highest RSSI {} dBm, signal level {}",
        device.address,
        device.name,
        device.highest_rssi,
        signal_level(device.rssi)
    );

    let session = manager.session();
    let (_, mut state_rx) = session.subscribe_state();
    let (_, mut long_connect_rx) = session.subscribe_long_connect();
    manager.connect_device(&device.address)?;

    let handshake_timeout = config.connection.handshake_timeout();
    match timeout(
        handshake_timeout,
        wait_for_long_connect(&mut state_rx, &mut long_connect_rx),
    )
    .await
    {
        Ok(Ok(())) => info!("Handshake complete."),
        Ok(Err(reason)) => return Err(anyhow!("Lock disconnected: {:?}", reason)),
        Err(_) => return Err(anyhow!("Handshake did not complete within {:?}", handshake_timeout)),
    }

    let (_, mut unlock_rx) = session.subscribe_unlock_result();
    manager.try_unlock()?;
    match timeout(handshake_timeout, unlock_rx.recv()).await {
        Ok(Some(Some(true))) => info!("Lock opened."),
        Ok(Some(Some(false))) => warn!("Lock rejected the unlock request."),
        Ok(_) => warn!("Session closed before the lock answered."),
        Err(_) => warn!("No unlock result within {:?}", handshake_timeout),
    }
    Ok(())
}

/// Resolves once the long connection is up, or with the reason the session dropped.
async fn wait_for_long_connect(
    state_rx: &mut UnboundedReceiver<ConnectionState>,
    long_connect_rx: &mut UnboundedReceiver<bool>,
) -> Result<(), DisconnectReason> {
    loop {
        tokio::select! {
            Some(achieved) = long_connect_rx.recv() => {
                if achieved {
                    return Ok(());
                }
            }
            Some(state) = state_rx.recv() => {
                debug!("Connection state: {:?}", state);
                if let ConnectionState::Disconnected { reason } = state {
                    return Err(reason);
                }
            }
            else => return Err(DisconnectReason::Unspecified),
        }
    }
}
