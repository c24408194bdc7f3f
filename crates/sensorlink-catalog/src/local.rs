//! Durable device-to-datastream mapping.
//!
//! The catalog maps each device id to its per-property datastream ids and is
//! backed by a single JSON file. The file is the persisted source of truth
//! and is rewritten wholesale on every [`persist`](LocalResourceCatalog::persist);
//! there is no incremental diffing. The component itself does not serialize
//! concurrent persists; compound read-modify-persist sequences are guarded
//! by the orchestrator that owns the catalog.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use sensorlink_core::{EntityId, Error, Result};

/// Per-device map of property name to datastream id.
pub type PropertyMap = HashMap<String, EntityId>;

/// File-backed catalog of registered devices.
#[derive(Debug)]
pub struct LocalResourceCatalog {
    path: PathBuf,
    entries: HashMap<String, PropertyMap>,
}

impl LocalResourceCatalog {
    /// Load the catalog from `path`.
    ///
    /// An absent file yields an empty catalog; that is the normal first-run
    /// state, not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no catalog file, starting empty");
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        let catalog = Self { path, entries };
        info!(
            path = %catalog.path.display(),
            devices = catalog.entries.len(),
            "loaded resource catalog"
        );
        Ok(catalog)
    }

    /// Property map of a registered device.
    pub fn get(&self, device_id: &str) -> Result<&PropertyMap> {
        self.entries
            .get(device_id)
            .ok_or_else(|| Error::NotFound(device_id.to_string()))
    }

    /// Datastream id registered for a device property.
    pub fn datastream_id(&self, device_id: &str, property: &str) -> Result<EntityId> {
        let properties = self.get(device_id)?;
        properties
            .get(property)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("{}/{}", device_id, property)))
    }

    /// Upsert the datastream id for a device property.
    pub fn put(&mut self, device_id: &str, property: &str, datastream_id: EntityId) {
        self.entries
            .entry(device_id.to_string())
            .or_default()
            .insert(property.to_string(), datastream_id);
    }

    /// Remove a device entry, returning its property map if it existed.
    pub fn remove(&mut self, device_id: &str) -> Option<PropertyMap> {
        self.entries.remove(device_id)
    }

    /// Whether a device is present.
    pub fn contains(&self, device_id: &str) -> bool {
        self.entries.contains_key(device_id)
    }

    /// All registered device ids.
    pub fn devices(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog holds no devices.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the backing file with the current in-memory state.
    ///
    /// After this returns the file reflects the last committed mapping.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&self.path, raw)?;
        debug!(
            path = %self.path.display(),
            devices = self.entries.len(),
            "persisted resource catalog"
        );
        Ok(())
    }
}
