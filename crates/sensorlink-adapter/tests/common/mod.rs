//! Shared fakes for reconciler integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use sensorlink_adapter::ObservationPublisher;
use sensorlink_catalog::SensorThingsApi;
use sensorlink_core::{EntityId, EntityKind, Error, Observation, Result};
use sensorlink_mqtt::Qos;

/// In-memory metadata server with per-name create counting.
#[derive(Default)]
pub struct FakeApi {
    entities: Mutex<Vec<(EntityKind, String, Value)>>,
    create_log: Mutex<Vec<(EntityKind, String)>>,
    update_log: Mutex<Vec<(EntityKind, EntityId)>>,
    delete_failures: Mutex<Vec<EntityId>>,
    create_failures: Mutex<Vec<String>>,
    next_id: Mutex<EntityId>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: Mutex::new(1001),
            ..Self::default()
        })
    }

    /// Fail remote deletes for this id.
    pub fn fail_delete(&self, id: EntityId) {
        self.delete_failures.lock().unwrap().push(id);
    }

    /// Fail creates for entities with this name.
    pub fn fail_create(&self, name: &str) {
        self.create_failures.lock().unwrap().push(name.to_string());
    }

    /// Stop failing creates.
    pub fn clear_create_failures(&self) {
        self.create_failures.lock().unwrap().clear();
    }

    pub fn create_count(&self, name: &str) -> usize {
        self.create_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, n)| n == name)
            .count()
    }

    pub fn update_count(&self) -> usize {
        self.update_log.lock().unwrap().len()
    }

    pub fn id_of(&self, kind: EntityKind, name: &str) -> Option<EntityId> {
        self.entities
            .lock()
            .unwrap()
            .iter()
            .find(|(k, n, _)| *k == kind && n == name)
            .and_then(|(_, _, body)| body.get("@iot.id").and_then(Value::as_i64))
    }
}

#[async_trait]
impl SensorThingsApi for FakeApi {
    async fn query_by_name(&self, kind: EntityKind, name: &str) -> Result<Vec<Value>> {
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, n, _)| *k == kind && n == name)
            .map(|(_, _, body)| body.clone())
            .collect())
    }

    async fn create(&self, kind: EntityKind, body: &Value) -> Result<Value> {
        // Widen race windows for the concurrency tests.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let name = body["name"].as_str().unwrap_or_default().to_string();
        self.create_log.lock().unwrap().push((kind, name.clone()));
        if self.create_failures.lock().unwrap().contains(&name) {
            return Err(Error::Http(format!("create of '{}' answered 500", name)));
        }
        let id = {
            let mut next = self.next_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        let mut stored = body.clone();
        stored["@iot.id"] = json!(id);
        self.entities
            .lock()
            .unwrap()
            .push((kind, name, stored.clone()));
        Ok(stored)
    }

    async fn update(&self, kind: EntityKind, id: EntityId, _body: &Value) -> Result<Value> {
        self.update_log.lock().unwrap().push((kind, id));
        Ok(json!({ "@iot.id": id }))
    }

    async fn delete(&self, _kind: EntityKind, id: EntityId) -> Result<()> {
        if self.delete_failures.lock().unwrap().contains(&id) {
            return Err(Error::Http("delete answered 500".into()));
        }
        Ok(())
    }
}

/// Publisher that records observations instead of touching a broker.
pub struct RecordingPublisher {
    accept: AtomicBool,
    published: Mutex<Vec<(String, Value)>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            accept: AtomicBool::new(true),
            published: Mutex::new(Vec::new()),
        })
    }

    /// Make subsequent publishes report rejection.
    pub fn reject(&self) {
        self.accept.store(false, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObservationPublisher for RecordingPublisher {
    async fn publish_observation(
        &self,
        topic: &str,
        observation: &Observation,
        _qos: Qos,
    ) -> bool {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), observation.to_payload()));
        self.accept.load(Ordering::SeqCst)
    }
}
