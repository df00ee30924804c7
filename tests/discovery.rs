//! Valve discovery and the persisted directory

mod common;

use std::sync::Arc;

use common::{MockHub, PASSWORD, RecordingGateway, USER, VALVE_TYPE, client, config, store};
use heatpilot::directory::{self, DirectoryStore};
use heatpilot::{ControlLoop, Error};

async fn three_room_hub() -> Arc<MockHub> {
    let hub = MockHub::new();
    hub.add_valve(1001, "000A1", Some("Living Room"), Some(80.0)).await;
    hub.add_device(1003, "HmIP-SWO-B", "000W1").await;
    hub.add_valve(1005, "000A2", Some("Kitchen"), Some(40.0)).await;
    hub.add_valve(1009, "000A3", Some("Bedroom"), None).await;
    hub
}

#[tokio::test]
async fn discovers_matching_valves_in_hub_order() {
    let hub = three_room_hub().await;
    let client = client(&hub);
    let mut session = client.login("ccu.test", Some(USER), Some(PASSWORD)).await.unwrap();

    let dir = directory::discover(&client, &mut session, VALVE_TYPE).await.unwrap();

    let found: Vec<_> = dir
        .devices()
        .iter()
        .map(|d| (d.address.as_str(), d.room_name.as_deref()))
        .collect();
    assert_eq!(
        found,
        [
            ("000A1", Some("Living Room")),
            ("000A2", Some("Kitchen")),
            ("000A3", Some("Bedroom")),
        ]
    );
    assert!(dir.devices().iter().all(|d| d.interface == "HmIP-RF"));
    assert_eq!(dir.device_type, VALVE_TYPE);
}

#[tokio::test]
async fn hub_internal_ids_are_not_queried() {
    let hub = three_room_hub().await;
    hub.add_device(42, "HmIP-eTRV-2", "HUB0042").await;
    let client = client(&hub);
    let mut session = client.login("ccu.test", Some(USER), Some(PASSWORD)).await.unwrap();

    let dir = directory::discover(&client, &mut session, VALVE_TYPE).await.unwrap();

    assert_eq!(dir.len(), 3);
    assert_eq!(hub.count("Device.get").await, 4);
}

#[tokio::test]
async fn unavailable_room_list_fails_discovery() {
    let hub = three_room_hub().await;
    hub.set_broken_rooms(true).await;
    let client = client(&hub);
    let mut session = client.login("ccu.test", Some(USER), Some(PASSWORD)).await.unwrap();

    let result = directory::discover(&client, &mut session, VALVE_TYPE).await;

    assert!(matches!(result, Err(Error::Rpc { code: 500, .. })));
    assert_eq!(hub.count("Device.get").await, 0);
}

#[tokio::test]
async fn single_room_miss_leaves_that_valve_unassigned() {
    let hub = three_room_hub().await;
    hub.add_valve(1013, "000A4", None, Some(10.0)).await;
    let client = client(&hub);
    let mut session = client.login("ccu.test", Some(USER), Some(PASSWORD)).await.unwrap();

    let dir = directory::discover(&client, &mut session, VALVE_TYPE).await.unwrap();

    let rooms: Vec<_> = dir.devices().iter().map(|d| d.room_name.as_deref()).collect();
    assert_eq!(rooms, [Some("Living Room"), Some("Kitchen"), Some("Bedroom"), None]);
}

#[tokio::test]
async fn room_outage_is_retried_instead_of_persisted() {
    let hub = three_room_hub().await;
    hub.set_broken_rooms(true).await;
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path());
    let gateway = RecordingGateway::default();
    let mut control =
        ControlLoop::new(store(cfg.clone()), client(&hub), Arc::new(gateway.clone())).await;

    let result = control.run_cycle().await;
    assert!(matches!(result, Err(Error::Rpc { .. })));
    assert!(control.directory().is_none());
    assert!(DirectoryStore::new(cfg.directory_path()).load().unwrap().is_none());
    assert!(gateway.delivered().await.is_empty());

    hub.set_broken_rooms(false).await;
    control.run_cycle().await.unwrap();

    let persisted = DirectoryStore::new(cfg.directory_path()).load().unwrap().unwrap();
    assert!(persisted.devices().iter().all(|d| d.room_name.is_some()));
    assert_eq!(hub.count("Room.listAll").await, 2);
}

#[tokio::test]
async fn network_failure_aborts_discovery() {
    let hub = three_room_hub().await;
    let client = client(&hub);
    let mut session = client.login("ccu.test", Some(USER), Some(PASSWORD)).await.unwrap();

    hub.fail_network(1).await;
    let result = directory::discover(&client, &mut session, VALVE_TYPE).await;
    assert!(matches!(result, Err(Error::Network(_))));
}

#[tokio::test]
async fn first_cycle_persists_and_restart_reuses_directory() {
    let hub = three_room_hub().await;
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path());
    let path = cfg.directory_path();

    let mut control = ControlLoop::new(
        store(cfg.clone()),
        client(&hub),
        Arc::new(RecordingGateway::default()),
    )
    .await;
    control.run_cycle().await.unwrap();
    control.shutdown().await;

    let persisted = DirectoryStore::new(&path).load().unwrap().unwrap();
    let addresses: Vec<_> = persisted.devices().iter().map(|d| d.address.as_str()).collect();
    assert_eq!(addresses, ["000A1", "000A2", "000A3"]);

    hub.clear_calls().await;
    let mut restarted = ControlLoop::new(
        store(cfg),
        client(&hub),
        Arc::new(RecordingGateway::default()),
    )
    .await;
    restarted.run_cycle().await.unwrap();

    assert_eq!(hub.count("Device.listAll").await, 0);
    assert_eq!(hub.count("Device.get").await, 0);
    assert_eq!(restarted.directory(), Some(&persisted));
}

#[tokio::test]
async fn persisted_directory_for_other_type_is_replaced() {
    let hub = three_room_hub().await;
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path());

    let stale = heatpilot::DeviceDirectory::new("HmIP-WTH", Vec::new());
    DirectoryStore::new(cfg.directory_path()).save(&stale).unwrap();

    let mut control = ControlLoop::new(
        store(cfg.clone()),
        client(&hub),
        Arc::new(RecordingGateway::default()),
    )
    .await;
    control.run_cycle().await.unwrap();

    assert_eq!(hub.count("Device.listAll").await, 1);
    let persisted = DirectoryStore::new(cfg.directory_path()).load().unwrap().unwrap();
    assert_eq!(persisted.device_type, VALVE_TYPE);
    assert_eq!(persisted.len(), 3);
}

#[tokio::test]
async fn corrupt_directory_triggers_rediscovery() {
    let hub = three_room_hub().await;
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path());
    std::fs::write(cfg.directory_path(), "{ not json").unwrap();

    let mut control = ControlLoop::new(
        store(cfg),
        client(&hub),
        Arc::new(RecordingGateway::default()),
    )
    .await;
    control.run_cycle().await.unwrap();

    assert_eq!(hub.count("Device.listAll").await, 1);
    assert_eq!(control.directory().map(heatpilot::DeviceDirectory::len), Some(3));
}
