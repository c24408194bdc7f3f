//! Reconciliation orchestrator for SensorThings device adapters.
//!
//! This crate composes the catalogs and MQTT channels into the three
//! operations an adapter's REST layer exposes: `register`, `observe`,
//! `delete`. Everything runs through one [`AdapterContext`] constructed at
//! startup; device-family adapters implement the [`DeviceAdapter`] trait by
//! composition over that shared context.
//!
//! ## Lifecycle
//!
//! Each device moves through `Unregistered → Registering → Registered →
//! (Deleting) → Unregistered`. Compound operations on the same device are
//! serialized by a per-device lock; registration failures leave the
//! already-committed properties in place and converge on retry.
//!
//! See the crate's `examples/` for a complete wiring demo.

pub mod context;
pub mod device;
pub mod inbound;
pub mod publish;

pub use context::{ActivityCounter, AdapterContext, PilotConfig};
pub use device::{DeviceAdapter, DeviceDescriptor, DeviceState, PropertySpec};
pub use inbound::{attach_observations, InboundRoute, ObservationIngest};
pub use publish::ObservationPublisher;
