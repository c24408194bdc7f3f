//! End-to-end reconciler behavior against in-memory fakes.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use common::{FakeApi, RecordingPublisher};
use sensorlink_adapter::{AdapterContext, DeviceDescriptor, DeviceState, PilotConfig};
use sensorlink_catalog::{LocalResourceCatalog, RemoteEntityCatalog};
use sensorlink_core::{EntityId, EntityKind, Error};

fn context(
    api: Arc<FakeApi>,
    publisher: Arc<RecordingPublisher>,
    catalog_path: &std::path::Path,
) -> AdapterContext {
    let local = LocalResourceCatalog::load(catalog_path).unwrap();
    AdapterContext::new(
        RemoteEntityCatalog::new(api),
        local,
        publisher,
        PilotConfig::new("pilot/"),
    )
}

#[tokio::test]
async fn test_register_then_observe_publishes_to_registered_topic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    let api = FakeApi::new();
    let publisher = RecordingPublisher::new();
    let ctx = context(api.clone(), publisher.clone(), &path);

    let descriptor = DeviceDescriptor::new("gps-42").with_property("position");
    ctx.register(&descriptor).await.unwrap();
    assert_eq!(ctx.device_state("gps-42").await, DeviceState::Registered);

    let datastream_id = api
        .id_of(EntityKind::Datastream, "gps-42/position")
        .unwrap();

    // The persisted file carries the committed mapping.
    let raw = std::fs::read_to_string(&path).unwrap();
    let persisted: HashMap<String, HashMap<String, EntityId>> =
        serde_json::from_str(&raw).unwrap();
    assert_eq!(persisted["gps-42"]["position"], datastream_id);

    let accepted = ctx
        .observe("gps-42", "position", json!({ "lat": 45.07, "lon": 7.68 }))
        .await
        .unwrap();
    assert!(accepted);

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    let (topic, payload) = &published[0];
    assert_eq!(
        topic,
        &format!("pilot/Datastreams({})/Observations", datastream_id)
    );
    assert_eq!(payload["result"]["lat"], 45.07);
    assert_eq!(payload["result"]["lon"], 7.68);
    assert_eq!(payload["Datastream"]["@iot.id"], datastream_id);
}

#[tokio::test]
async fn test_observe_unregistered_device_publishes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::new();
    let publisher = RecordingPublisher::new();
    let ctx = context(api, publisher.clone(), &dir.path().join("catalog.json"));

    let err = ctx
        .observe("unknown", "position", json!({ "lat": 0.0 }))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeviceNotRegistered(_)));
    assert!(publisher.published().is_empty());
    assert!(ctx.activity_snapshot().await.is_empty());
}

#[tokio::test]
async fn test_registering_twice_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::new();
    let publisher = RecordingPublisher::new();
    let ctx = context(api, publisher, &dir.path().join("catalog.json"));

    let descriptor = DeviceDescriptor::new("gps-42").with_property("position");
    ctx.register(&descriptor).await.unwrap();
    let err = ctx.register(&descriptor).await.unwrap_err();

    assert!(matches!(err, Error::DuplicateDevice(_)));
}

#[tokio::test]
async fn test_force_update_reregisters_through_override() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::new();
    let publisher = RecordingPublisher::new();
    let ctx = context(api.clone(), publisher, &dir.path().join("catalog.json"));

    let descriptor = DeviceDescriptor::new("gps-42").with_property("position");
    ctx.register(&descriptor).await.unwrap();
    let first_id = api.id_of(EntityKind::Datastream, "gps-42/position");

    ctx.register(&descriptor.clone().with_force_update(true))
        .await
        .unwrap();

    // Existing entities were patched, not recreated.
    assert!(api.update_count() > 0);
    assert_eq!(api.create_count("gps-42/position"), 1);
    assert_eq!(api.id_of(EntityKind::Datastream, "gps-42/position"), first_id);
}

#[tokio::test]
async fn test_cascade_delete_removes_local_entry_despite_remote_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    let api = FakeApi::new();
    let publisher = RecordingPublisher::new();
    let ctx = context(api.clone(), publisher, &path);

    let descriptor = DeviceDescriptor::new("gps-42")
        .with_property("position")
        .with_property("speed");
    ctx.register(&descriptor).await.unwrap();

    let speed_id = api.id_of(EntityKind::Datastream, "gps-42/speed").unwrap();
    api.fail_delete(speed_id);

    ctx.delete("gps-42", true).await.unwrap();

    assert_eq!(ctx.device_state("gps-42").await, DeviceState::Unregistered);
    assert!(ctx.registered_devices().await.is_empty());
    let persisted: HashMap<String, HashMap<String, EntityId>> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(persisted.is_empty());
}

#[tokio::test]
async fn test_delete_unknown_device_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::new();
    let publisher = RecordingPublisher::new();
    let ctx = context(api, publisher, &dir.path().join("catalog.json"));

    let err = ctx.delete("unknown", false).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_partial_failure_keeps_committed_properties_and_converges_on_retry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    let api = FakeApi::new();
    let publisher = RecordingPublisher::new();
    let ctx = context(api.clone(), publisher, &path);

    api.fail_create("gps-42/speed");
    let descriptor = DeviceDescriptor::new("gps-42")
        .with_property("position")
        .with_property("speed");
    ctx.register(&descriptor).await.unwrap_err();

    // The first property stayed committed, locally and on disk.
    assert_ne!(ctx.device_state("gps-42").await, DeviceState::Registered);
    let persisted: HashMap<String, HashMap<String, EntityId>> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(persisted["gps-42"].contains_key("position"));
    assert!(!persisted["gps-42"].contains_key("speed"));

    // Retry after the server recovers: no duplicate creates for entities
    // that already exist.
    api.clear_create_failures();
    ctx.register(&descriptor).await.unwrap();
    assert_eq!(ctx.device_state("gps-42").await, DeviceState::Registered);
    assert_eq!(api.create_count("gps-42/position"), 1);
    assert_eq!(api.create_count("gps-42-sensor"), 1);
}

#[tokio::test]
async fn test_concurrent_registration_of_same_device_serializes() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::new();
    let publisher = RecordingPublisher::new();
    let ctx = Arc::new(context(api, publisher, &dir.path().join("catalog.json")));

    let descriptor = DeviceDescriptor::new("gps-42").with_property("position");
    let first = {
        let ctx = ctx.clone();
        let descriptor = descriptor.clone();
        tokio::spawn(async move { ctx.register(&descriptor).await })
    };
    let second = {
        let ctx = ctx.clone();
        let descriptor = descriptor.clone();
        tokio::spawn(async move { ctx.register(&descriptor).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(Error::DuplicateDevice(_))))
        .count();

    // The per-device lock turns the race into one winner and one refusal.
    assert_eq!(successes, 1);
    assert_eq!(duplicates, 1);
}

#[tokio::test]
async fn test_activity_counter_increments_even_when_publish_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let api = FakeApi::new();
    let publisher = RecordingPublisher::new();
    let ctx = context(api, publisher.clone(), &dir.path().join("catalog.json"));

    let descriptor = DeviceDescriptor::new("gps-42").with_property("position");
    ctx.register(&descriptor).await.unwrap();

    publisher.reject();
    let accepted = ctx
        .observe("gps-42", "position", json!({ "lat": 1.0 }))
        .await
        .unwrap();

    assert!(!accepted);
    assert_eq!(ctx.activity_snapshot().await.get("gps-42"), Some(&1));
}

#[tokio::test]
async fn test_catalog_reload_restores_registered_devices() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    let api = FakeApi::new();
    let publisher = RecordingPublisher::new();

    {
        let ctx = context(api.clone(), publisher.clone(), &path);
        ctx.register(&DeviceDescriptor::new("gps-42").with_property("position"))
            .await
            .unwrap();
    }

    // A fresh process loading the same file sees the device as registered.
    let ctx = context(api, publisher.clone(), &path);
    assert_eq!(ctx.device_state("gps-42").await, DeviceState::Registered);
    let accepted = ctx
        .observe("gps-42", "position", json!({ "lat": 45.07 }))
        .await
        .unwrap();
    assert!(accepted);
    assert_eq!(publisher.published().len(), 1);
}
