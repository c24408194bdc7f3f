//! The reconciliation orchestrator.
//!
//! [`AdapterContext`] is the explicit context object every adapter
//! operation runs through: it owns the remote entity catalog, the local
//! resource catalog, and the observation publisher, and is constructed
//! once at startup; there are no ambient globals. Compound operations on
//! one device serialize on a per-device mutex; distinct devices proceed
//! concurrently.
//!
//! Registration is not transactional: a failure partway through leaves the
//! properties registered so far committed locally and remotely. Retrying
//! converges because entity resolution is idempotent by name.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use sensorlink_catalog::{LocalResourceCatalog, RemoteEntityCatalog};
use sensorlink_core::entity::observation_topic;
use sensorlink_core::{Datastream, EntityId, EntityKind, Error, Observation, RemoteEntity, Result};
use sensorlink_mqtt::Qos;

use crate::device::{DeviceDescriptor, DeviceState};
use crate::publish::ObservationPublisher;

/// Deployment-specific delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PilotConfig {
    /// Topic namespace prefix selecting the target broker tenant,
    /// e.g. `"pilot-a/v1.0/"`.
    #[serde(default)]
    pub topic_prefix: String,

    /// QoS observations are published at.
    #[serde(default)]
    pub qos: Qos,
}

impl PilotConfig {
    /// Create a pilot configuration with the default QoS.
    pub fn new(topic_prefix: impl Into<String>) -> Self {
        Self {
            topic_prefix: topic_prefix.into(),
            qos: Qos::default(),
        }
    }

    /// Set the publish QoS.
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Per-device observation rate counter.
///
/// Incremented on every observe call for a known device regardless of the
/// publish outcome; feeds a stats surface, not correctness.
#[derive(Debug, Default)]
pub struct ActivityCounter {
    counts: RwLock<HashMap<String, u64>>,
}

impl ActivityCounter {
    /// Count one observation for a device.
    pub async fn record(&self, device_id: &str) {
        let mut counts = self.counts.write().await;
        *counts.entry(device_id.to_string()).or_insert(0) += 1;
    }

    /// Snapshot of all per-device counts.
    pub async fn snapshot(&self) -> HashMap<String, u64> {
        self.counts.read().await.clone()
    }
}

/// Shared services and state for one adapter process.
pub struct AdapterContext {
    remote: RemoteEntityCatalog,
    local: Mutex<LocalResourceCatalog>,
    publisher: Arc<dyn ObservationPublisher>,
    pilot: PilotConfig,
    states: RwLock<HashMap<String, DeviceState>>,
    device_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    activity: ActivityCounter,
}

impl AdapterContext {
    /// Build the context from its services.
    ///
    /// Devices already present in the loaded catalog are considered
    /// registered.
    pub fn new(
        remote: RemoteEntityCatalog,
        local: LocalResourceCatalog,
        publisher: Arc<dyn ObservationPublisher>,
        pilot: PilotConfig,
    ) -> Self {
        let states = local
            .devices()
            .into_iter()
            .map(|device_id| (device_id, DeviceState::Registered))
            .collect();
        Self {
            remote,
            local: Mutex::new(local),
            publisher,
            pilot,
            states: RwLock::new(states),
            device_locks: Mutex::new(HashMap::new()),
            activity: ActivityCounter::default(),
        }
    }

    /// The remote entity catalog.
    pub fn remote(&self) -> &RemoteEntityCatalog {
        &self.remote
    }

    /// The pilot configuration.
    pub fn pilot(&self) -> &PilotConfig {
        &self.pilot
    }

    /// Lifecycle state of a device.
    pub async fn device_state(&self, device_id: &str) -> DeviceState {
        self.states
            .read()
            .await
            .get(device_id)
            .copied()
            .unwrap_or(DeviceState::Unregistered)
    }

    /// Ids of all registered devices.
    pub async fn registered_devices(&self) -> Vec<String> {
        self.local.lock().await.devices()
    }

    /// Per-device observation counts.
    pub async fn activity_snapshot(&self) -> HashMap<String, u64> {
        self.activity.snapshot().await
    }

    /// Register a device: resolve its entities on the metadata server and
    /// commit the per-property datastream ids to the local catalog.
    ///
    /// Refused with [`Error::DuplicateDevice`] when the device is already
    /// registered, unless the descriptor requests the override flow.
    pub async fn register(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        let lock = self.lock_for(&descriptor.device_id).await;
        let _guard = lock.lock().await;

        if !descriptor.force_update
            && self.device_state(&descriptor.device_id).await == DeviceState::Registered
        {
            return Err(Error::DuplicateDevice(descriptor.device_id.clone()));
        }

        self.set_state(&descriptor.device_id, DeviceState::Registering)
            .await;
        info!(
            device_id = %descriptor.device_id,
            properties = descriptor.properties.len(),
            force_update = descriptor.force_update,
            "registering device"
        );

        match self.register_entities(descriptor).await {
            Ok(()) => {
                self.set_state(&descriptor.device_id, DeviceState::Registered)
                    .await;
                info!(device_id = %descriptor.device_id, "device registered");
                Ok(())
            }
            Err(e) => {
                // Properties resolved before the failure stay committed;
                // a retry converges on the same ids.
                self.clear_state(&descriptor.device_id).await;
                error!(device_id = %descriptor.device_id, error = %e, "registration failed");
                Err(e)
            }
        }
    }

    /// Publish one observation for a registered device property.
    ///
    /// Returns whether the transport accepted the message; delivery beyond
    /// local acceptance is the QoS level's concern, not retried here.
    pub async fn observe(&self, device_id: &str, property: &str, result: Value) -> Result<bool> {
        let datastream_id = {
            let local = self.local.lock().await;
            if !local.contains(device_id) {
                return Err(Error::DeviceNotRegistered(device_id.to_string()));
            }
            local.datastream_id(device_id, property)?
        };

        self.activity.record(device_id).await;

        let observation = Observation::new(datastream_id, result);
        let topic = observation_topic(&self.pilot.topic_prefix, datastream_id);
        let accepted = self
            .publisher
            .publish_observation(&topic, &observation, self.pilot.qos)
            .await;
        if !accepted {
            warn!(device_id, property, topic = %topic, "observation publish rejected");
        }
        Ok(accepted)
    }

    /// Remove a device from the catalog.
    ///
    /// With `cascade`, every datastream registered for the device is
    /// deleted on the metadata server first; remote failures are logged
    /// and the local entry is removed regardless, accepting the documented
    /// inconsistency risk.
    pub async fn delete(&self, device_id: &str, cascade: bool) -> Result<()> {
        let lock = self.lock_for(device_id).await;
        let _guard = lock.lock().await;

        let properties = {
            let local = self.local.lock().await;
            local.get(device_id)?.clone()
        };
        self.set_state(device_id, DeviceState::Deleting).await;

        if cascade {
            for (property, datastream_id) in &properties {
                if !self
                    .remote
                    .delete(EntityKind::Datastream, *datastream_id)
                    .await
                {
                    warn!(
                        device_id,
                        property = %property,
                        datastream_id = *datastream_id,
                        "remote datastream delete failed, removing local entry anyway"
                    );
                }
            }
        }

        {
            let mut local = self.local.lock().await;
            local.remove(device_id);
            local.persist()?;
        }
        self.clear_state(device_id).await;
        info!(device_id, cascade, "device deleted");
        Ok(())
    }

    async fn register_entities(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        let force = descriptor.force_update;

        let thing = RemoteEntity::new(EntityKind::Thing, descriptor.thing_name())
            .with_payload(descriptor.thing_payload.clone());
        let thing = match &descriptor.description {
            Some(description) => thing.with_description(description.clone()),
            None => thing,
        };
        let thing_id = self.resolve(&thing, force).await?;

        if let Some(location) = &descriptor.location {
            let location = RemoteEntity::new(EntityKind::Location, descriptor.location_name())
                .with_payload(location.clone());
            self.resolve(&location, force).await?;
        }

        let sensor = RemoteEntity::new(EntityKind::Sensor, descriptor.sensor_name())
            .with_payload(descriptor.sensor_payload.clone());
        let sensor_id = self.resolve(&sensor, force).await?;

        for property in &descriptor.properties {
            let observed = RemoteEntity::new(EntityKind::ObservedProperty, &property.name)
                .with_payload(property.definition.clone());
            let observed_id = self.resolve(&observed, force).await?;

            let datastream = Datastream::new(
                descriptor.datastream_name(&property.name),
                thing_id,
                sensor_id,
                observed_id,
            )
            .with_payload(property.datastream_payload.clone());
            let resolved = self
                .remote
                .register_datastream(&datastream, &self.pilot.topic_prefix, force)
                .await?;
            let datastream_id = resolved.entity.id.ok_or_else(|| {
                Error::Inconsistent(format!(
                    "datastream '{}' resolved without an id",
                    resolved.entity.name
                ))
            })?;

            {
                let mut local = self.local.lock().await;
                local.put(&descriptor.device_id, &property.name, datastream_id);
                local.persist()?;
            }
            info!(
                device_id = %descriptor.device_id,
                property = %property.name,
                datastream_id,
                "property registered"
            );
        }
        Ok(())
    }

    async fn resolve(&self, entity: &RemoteEntity, force: bool) -> Result<EntityId> {
        if force {
            self.remote.override_or_register(entity).await
        } else {
            self.remote.discover_or_register(entity).await
        }
    }

    async fn lock_for(&self, device_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.device_locks.lock().await;
        locks
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn set_state(&self, device_id: &str, state: DeviceState) {
        self.states
            .write()
            .await
            .insert(device_id.to_string(), state);
    }

    async fn clear_state(&self, device_id: &str) {
        self.states.write().await.remove(device_id);
    }
}
