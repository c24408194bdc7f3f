//! Shared data model for the SensorLink reconciliation engine.
//!
//! This crate defines the entity model exchanged with a SensorThings-style
//! metadata server, the observation shape published over MQTT, and the
//! closed error taxonomy used across the workspace.
//!
//! ## Architecture
//!
//! - **RemoteEntity / Datastream**: named entities resolved against the
//!   remote server; ids are assigned by the server only.
//! - **Observation**: the ephemeral per-measurement payload, built once per
//!   publish and never persisted locally.
//! - **Error**: typed error kinds returned as `Result`s; validation and
//!   control flow never go through panics.

pub mod entity;
pub mod error;

pub use entity::{observation_topic, Datastream, EntityId, EntityKind, Observation, RemoteEntity};
pub use error::{Error, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
