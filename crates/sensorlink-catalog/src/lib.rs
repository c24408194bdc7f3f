//! Entity catalogs for the SensorLink reconciliation engine.
//!
//! Two catalogs cooperate to keep a device fleet and a SensorThings-style
//! metadata server in agreement:
//!
//! - [`RemoteEntityCatalog`] resolves named entities against the remote
//!   server: discovery by unique name, creation when absent, optional
//!   override of an existing entity, and best-effort deletion. Resolution is
//!   idempotent; repeated calls for the same `(name, kind)` converge to one
//!   server-assigned id.
//! - [`LocalResourceCatalog`] is the durable local mapping from device ids
//!   to per-property datastream ids, backed by a single JSON file that is
//!   rewritten wholesale on every persist.
//!
//! The remote side talks through the [`SensorThingsApi`] trait so tests can
//! substitute an in-memory server.

pub mod local;
pub mod remote;

pub use local::LocalResourceCatalog;
pub use remote::{HttpSensorThingsApi, RemoteEntityCatalog, SensorThingsApi, ServerConfig};
