//! Error types shared across the SensorLink crates.

use thiserror::Error;

use crate::entity::EntityKind;

/// Result type for SensorLink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SensorLink error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Broker or metadata server unreachable.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// HTTP request against the metadata server failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Create response carried no server-assigned id.
    #[error("Registration failed for {kind} '{name}': create response carried no id")]
    Registration { kind: EntityKind, name: String },

    /// More than one remote entity of the same kind shares the name.
    #[error("Duplicate {kind} entities named '{name}' on the server ({count} matches)")]
    Duplicate {
        kind: EntityKind,
        name: String,
        count: usize,
    },

    /// The remote server answered with an id that contradicts an earlier one.
    #[error("Inconsistent remote state: {0}")]
    Inconsistent(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Observation for a device that was never registered.
    #[error("Device not registered: {0}")]
    DeviceNotRegistered(String),

    /// Registration for a device that is already registered.
    #[error("Device already registered: {0}")]
    DuplicateDevice(String),

    /// The local MQTT client rejected a message.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Catalog file error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error should be reported to the caller as a client
    /// mistake rather than a server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::DeviceNotRegistered(_) | Error::DuplicateDevice(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Duplicate {
            kind: EntityKind::Thing,
            name: "L1".to_string(),
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "Duplicate Thing entities named 'L1' on the server (2 matches)"
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(Error::DeviceNotRegistered("gps-1".into()).is_client_error());
        assert!(!Error::Connectivity("broker down".into()).is_client_error());
    }
}
