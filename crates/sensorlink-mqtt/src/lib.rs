//! MQTT channels for the SensorLink delivery engine.
//!
//! Two channels over `rumqttc`, both built to survive broker disconnects:
//!
//! - [`PublishChannel`] delivers observations; on disconnect it sleeps a
//!   fixed backoff and reconnects, retrying indefinitely.
//! - [`SubscribeChannel`] receives inbound messages; it carries its
//!   subscription list as explicit state and replays every recorded topic
//!   after each reconnect before resuming dispatch. Without the replay a
//!   single network blip silently ends all inbound traffic.
//!
//! Connection lifecycle is an explicit state machine around a polled event
//! loop, not a set of callbacks; see [`subscriber`] for the event handling
//! and [`TopicPattern`] for id-bearing topic matching.

pub mod config;
pub mod publisher;
pub mod subscriber;
pub mod topic;

pub use config::{MqttConfig, Qos};
pub use publisher::PublishChannel;
pub use subscriber::{InboundHandler, InboundMessage, MessageDispatcher, SubscribeChannel};
pub use topic::TopicPattern;

use serde::{Deserialize, Serialize};

/// Channel connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Not connected and not trying.
    Disconnected,
    /// Initial connection in progress.
    Connecting,
    /// Connected and operational.
    Connected,
    /// Connection lost, reconnect loop running.
    Reconnecting,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}
