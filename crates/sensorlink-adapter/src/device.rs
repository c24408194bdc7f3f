//! Device descriptors, lifecycle states, and the adapter capability trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sensorlink_core::Result;

/// Per-device lifecycle state tracked by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    /// Unknown to the catalog.
    Unregistered,
    /// Registration in progress.
    Registering,
    /// All properties resolved and committed.
    Registered,
    /// Deletion in progress.
    Deleting,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unregistered => write!(f, "unregistered"),
            Self::Registering => write!(f, "registering"),
            Self::Registered => write!(f, "registered"),
            Self::Deleting => write!(f, "deleting"),
        }
    }
}

/// An observed property a device reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Property name, unique within the device.
    pub name: String,

    /// ObservedProperty body on the metadata server.
    #[serde(default)]
    pub definition: Value,

    /// Extra Datastream body fields (unit of measurement, observation type).
    #[serde(default)]
    pub datastream_payload: Value,
}

impl PropertySpec {
    /// Create a property with an empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition: Value::Null,
            datastream_payload: Value::Null,
        }
    }

    /// Set the ObservedProperty body.
    pub fn with_definition(mut self, definition: Value) -> Self {
        self.definition = definition;
        self
    }

    /// Set the extra Datastream body fields.
    pub fn with_datastream_payload(mut self, payload: Value) -> Self {
        self.datastream_payload = payload;
        self
    }
}

/// Everything the reconciler needs to register a device.
///
/// The out-of-scope REST layer deserializes this from registration
/// requests; adapters for specific device families fill in the payload
/// shapes for their hardware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Device identifier, unique per adapter deployment.
    pub device_id: String,

    /// Thing name on the server; defaults to the device id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Observed properties to register datastreams for.
    #[serde(default)]
    pub properties: Vec<PropertySpec>,

    /// Thing body on the metadata server.
    #[serde(default)]
    pub thing_payload: Value,

    /// Sensor body on the metadata server.
    #[serde(default)]
    pub sensor_payload: Value,

    /// Location body; registered as a Location entity when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,

    /// Re-registration flow: patch existing entities instead of refusing
    /// an already-registered device.
    #[serde(default)]
    pub force_update: bool,
}

impl DeviceDescriptor {
    /// Create a descriptor for a device id.
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: None,
            description: None,
            properties: Vec::new(),
            thing_payload: Value::Null,
            sensor_payload: Value::Null,
            location: None,
            force_update: false,
        }
    }

    /// Set the Thing name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add an observed property by name.
    pub fn with_property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(PropertySpec::new(name));
        self
    }

    /// Add a fully specified observed property.
    pub fn with_property_spec(mut self, property: PropertySpec) -> Self {
        self.properties.push(property);
        self
    }

    /// Set the Location body.
    pub fn with_location(mut self, location: Value) -> Self {
        self.location = Some(location);
        self
    }

    /// Route registration through the override flow.
    pub fn with_force_update(mut self, force_update: bool) -> Self {
        self.force_update = force_update;
        self
    }

    /// Thing name on the server.
    pub fn thing_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.device_id)
    }

    /// Sensor name derived from the device id.
    pub fn sensor_name(&self) -> String {
        format!("{}-sensor", self.device_id)
    }

    /// Location name derived from the device id.
    pub fn location_name(&self) -> String {
        format!("{}-location", self.device_id)
    }

    /// Datastream name for one of the device's properties.
    pub fn datastream_name(&self, property: &str) -> String {
        format!("{}/{}", self.device_id, property)
    }
}

/// Capability surface a device-family adapter exposes to the REST layer.
///
/// Implementations compose over a shared
/// [`AdapterContext`](crate::AdapterContext) rather than inheriting from
/// one another; the context carries the catalogs and channels.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Adapter family name, e.g. `"gps"`.
    fn adapter_type(&self) -> &str;

    /// Register a device and its property datastreams.
    async fn register(&self, descriptor: &DeviceDescriptor) -> Result<()>;

    /// Publish one observation for a registered device property.
    async fn observe(&self, device_id: &str, property: &str, result: Value) -> Result<bool>;

    /// Remove a device, optionally cascading remote datastream deletes.
    async fn delete(&self, device_id: &str, cascade: bool) -> Result<()>;
}
