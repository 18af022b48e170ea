mod common;

use std::sync::Arc;

use ble_lock_bridge_lib::config::AppConfig;
use ble_lock_bridge_lib::core::bluetooth::{
    BluetoothManager, ConnectionState, DeviceFilter, DisconnectReason, Transport,
};
use common::{Call, FakeTransport, addresses, fast_policy, wait_for_state, wait_for_view};

fn manager(filter: DeviceFilter) -> (Arc<FakeTransport>, BluetoothManager) {
    let (fake, _writes) = FakeTransport::new();
    let fake = Arc::new(fake);
    let transport: Arc<dyn Transport> = fake.clone();
    (fake, BluetoothManager::new(transport, filter, fast_policy()))
}

#[tokio::test]
async fn test_scan_publishes_filtered_view() {
    let (fake, mut manager) = manager(DeviceFilter::default());
    let (_, mut views) = manager.subscribe_devices();

    manager.start_scan().await.unwrap();
    assert!(manager.is_scanning());
    assert!(fake.advertise("AA", Some("YX_Lock1"), -60));
    assert!(fake.advertise("BB", Some("Other"), -40));
    assert!(fake.advertise("CC", Some("YX_Lock2"), -75));

    let view = wait_for_view(&mut views, |view| addresses(view).len() == 2).await;
    assert_eq!(addresses(&view), vec!["AA".to_string(), "CC".to_string()]);
    assert_eq!(manager.registry().devices().len(), 3);
    assert_eq!(manager.strongest_candidate().unwrap().address, "AA");

    manager.stop_scan().await.unwrap();
    assert!(!manager.is_scanning());
    assert!(!fake.advertise("DD", Some("YX_Lock3"), -30));
}

#[tokio::test]
async fn test_proximity_filter_follows_highest_rssi() {
    let (fake, mut manager) = manager(DeviceFilter {
        name_required: true,
        nearby_only: true,
    });
    let (_, mut views) = manager.subscribe_devices();

    manager.start_scan().await.unwrap();
    assert!(fake.advertise("AA", Some("YX_Lock1"), -55));
    assert!(fake.advertise("AA", Some("YX_Lock1"), -45));
    let view = wait_for_view(&mut views, |view| !addresses(view).is_empty()).await;
    assert_eq!(addresses(&view), vec!["AA".to_string()]);

    // A weaker advertisement does not drop a device that has been close.
    assert!(fake.advertise("AA", Some("YX_Lock1"), -90));
    let view = wait_for_view(&mut views, |view| {
        view.as_ref()
            .is_some_and(|devices| devices.iter().any(|d| d.rssi == -90))
    })
    .await;
    assert_eq!(addresses(&view), vec!["AA".to_string()]);

    assert!(manager.set_proximity_filter(false));
    assert!(manager.set_name_filter(false));
    assert_eq!(manager.registry().filter(), DeviceFilter {
        name_required: false,
        nearby_only: false,
    });
    manager.dispose().await.unwrap();
}

#[tokio::test]
async fn test_restart_and_transport_disabled_clear_registry() {
    let (fake, mut manager) = manager(DeviceFilter::default());
    let (_, mut views) = manager.subscribe_devices();

    manager.start_scan().await.unwrap();
    assert!(fake.advertise("AA", Some("YX_Lock1"), -60));
    wait_for_view(&mut views, |view| !addresses(view).is_empty()).await;

    manager.start_scan().await.unwrap();
    assert!(manager.registry().devices().is_empty());
    let starts = fake
        .calls()
        .iter()
        .filter(|call| **call == Call::StartScan)
        .count();
    assert_eq!(starts, 2);

    assert!(fake.advertise("BB", Some("YX_Lock2"), -50));
    wait_for_view(&mut views, |view| addresses(view) == vec!["BB".to_string()]).await;

    manager.transport_disabled().await.unwrap();
    assert_eq!(manager.filtered_devices(), None);
    assert!(manager.registry().devices().is_empty());
    assert!(manager.strongest_candidate().is_none());
}

#[tokio::test]
async fn test_connect_to_strongest_candidate() {
    let (fake, mut manager) = manager(DeviceFilter::default());
    let (_, mut views) = manager.subscribe_devices();
    let (_, mut states) = manager.session().subscribe_state();

    manager.start_scan().await.unwrap();
    assert!(fake.advertise("AA", Some("YX_Lock1"), -70));
    assert!(fake.advertise("BB", Some("YX_Lock2"), -48));
    wait_for_view(&mut views, |view| addresses(view).len() == 2).await;
    manager.stop_scan().await.unwrap();

    let candidate = manager.strongest_candidate().unwrap();
    assert_eq!(candidate.address, "BB");
    manager.connect_device(&candidate.address).unwrap();
    wait_for_state(&mut states, ConnectionState::Ready).await;
    let attempts: Vec<Call> = fake
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::ConnectAttempt(_)))
        .collect();
    assert_eq!(attempts, vec![Call::ConnectAttempt("BB".to_string())]);

    manager.dispose().await.unwrap();
    assert!(fake.position(&Call::Disconnect("BB".to_string())).is_some());
}

#[tokio::test]
async fn test_manager_from_default_config() {
    let (fake, _writes) = FakeTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(fake);
    let manager = BluetoothManager::from_config(transport, &AppConfig::default());

    let filter = manager.registry().filter();
    assert!(filter.name_required);
    assert!(!filter.nearby_only);
    assert_eq!(
        manager.session().state(),
        ConnectionState::Disconnected {
            reason: DisconnectReason::Unspecified
        }
    );
}
