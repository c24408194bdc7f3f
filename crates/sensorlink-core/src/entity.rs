//! Entity model for the SensorThings-style metadata server.
//!
//! Entities are identified by a name that is unique per kind on the server;
//! the numeric id is assigned by the server on creation (the `@iot.id`
//! field) and is immutable once set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Server-assigned entity identifier (`@iot.id`).
pub type EntityId = i64;

/// The entity kinds the reconciliation engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Location,
    Thing,
    Sensor,
    ObservedProperty,
    Datastream,
}

impl EntityKind {
    /// Collection path on the metadata server.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Location => "Locations",
            Self::Thing => "Things",
            Self::Sensor => "Sensors",
            Self::ObservedProperty => "ObservedProperties",
            Self::Datastream => "Datastreams",
        }
    }

    /// Addressable path of a single entity, e.g. `Things(42)`.
    pub fn item_path(&self, id: EntityId) -> String {
        format!("{}({})", self.collection(), id)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Location => write!(f, "Location"),
            Self::Thing => write!(f, "Thing"),
            Self::Sensor => write!(f, "Sensor"),
            Self::ObservedProperty => write!(f, "ObservedProperty"),
            Self::Datastream => write!(f, "Datastream"),
        }
    }
}

/// A named entity on the metadata server.
///
/// `payload` carries the kind-specific body (description, properties,
/// encoding types); the engine itself only interprets `name` and `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntity {
    /// Server-assigned id, present once the entity has been resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    /// Unique name within the kind.
    pub name: String,
    /// Entity kind.
    pub kind: EntityKind,
    /// Kind-specific body merged into the request payload.
    #[serde(default)]
    pub payload: Value,
}

impl RemoteEntity {
    /// Create a new unresolved entity.
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            kind,
            payload: Value::Null,
        }
    }

    /// Set the kind-specific body.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Insert a description into the body.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.ensure_object();
        if let Some(obj) = self.payload.as_object_mut() {
            obj.insert("description".to_string(), json!(description.into()));
        }
        self
    }

    /// Request body sent on create/update: the payload with the entity
    /// name folded in.
    pub fn body(&self) -> Value {
        let mut body = if self.payload.is_object() {
            self.payload.clone()
        } else {
            json!({})
        };
        if let Some(obj) = body.as_object_mut() {
            obj.insert("name".to_string(), json!(self.name));
        }
        body
    }

    fn ensure_object(&mut self) {
        if !self.payload.is_object() {
            self.payload = json!({});
        }
    }
}

/// A Datastream entity: the binding of a Thing, a Sensor and an
/// ObservedProperty, the unit observations are published against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datastream {
    /// The underlying named entity (kind is always `Datastream`).
    pub entity: RemoteEntity,
    /// Referenced Thing id.
    pub thing_id: EntityId,
    /// Referenced Sensor id.
    pub sensor_id: EntityId,
    /// Referenced ObservedProperty id.
    pub observed_property_id: EntityId,
    /// MQTT topic derived after registration, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl Datastream {
    /// Create a new unresolved datastream referencing already-resolved
    /// Thing/Sensor/ObservedProperty ids.
    pub fn new(
        name: impl Into<String>,
        thing_id: EntityId,
        sensor_id: EntityId,
        observed_property_id: EntityId,
    ) -> Self {
        Self {
            entity: RemoteEntity::new(EntityKind::Datastream, name),
            thing_id,
            sensor_id,
            observed_property_id,
            topic: None,
        }
    }

    /// Set the kind-specific body.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.entity.payload = payload;
        self
    }

    /// Record the derived MQTT topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Request body with the navigation references folded in.
    pub fn body(&self) -> Value {
        let mut body = self.entity.body();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("Thing".to_string(), json!({ "@iot.id": self.thing_id }));
            obj.insert("Sensor".to_string(), json!({ "@iot.id": self.sensor_id }));
            obj.insert(
                "ObservedProperty".to_string(),
                json!({ "@iot.id": self.observed_property_id }),
            );
        }
        body
    }
}

/// MQTT topic observations for a datastream are published on.
///
/// `prefix` is the deployment's pilot namespace, e.g. `"pilot-a/v1.0/"`.
pub fn observation_topic(prefix: &str, datastream_id: EntityId) -> String {
    format!("{}Datastreams({})/Observations", prefix, datastream_id)
}

/// A single measurement bound to a datastream.
///
/// Observations are ephemeral: built once per publish call, never stored
/// locally, never retried by this layer.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Target datastream id.
    pub datastream_id: EntityId,
    /// When the phenomenon happened.
    pub phenomenon_time: DateTime<Utc>,
    /// When the result was produced.
    pub result_time: DateTime<Utc>,
    /// Measurement result.
    pub result: Value,
}

impl Observation {
    /// Create an observation stamped with the current time.
    pub fn new(datastream_id: EntityId, result: Value) -> Self {
        let now = Utc::now();
        Self {
            datastream_id,
            phenomenon_time: now,
            result_time: now,
            result,
        }
    }

    /// Override both timestamps.
    pub fn with_times(
        mut self,
        phenomenon_time: DateTime<Utc>,
        result_time: DateTime<Utc>,
    ) -> Self {
        self.phenomenon_time = phenomenon_time;
        self.result_time = result_time;
        self
    }

    /// Wire payload published to the broker.
    pub fn to_payload(&self) -> Value {
        json!({
            "phenomenonTime": self.phenomenon_time.to_rfc3339(),
            "resultTime": self.result_time.to_rfc3339(),
            "result": self.result,
            "Datastream": { "@iot.id": self.datastream_id },
        })
    }
}
