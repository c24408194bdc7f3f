//! Broker connection configuration.

use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// MQTT QoS level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl Default for Qos {
    fn default() -> Self {
        Self::AtLeastOnce
    }
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// MQTT channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker address.
    pub broker: String,

    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Client ID; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,

    /// Clean session flag.
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,

    /// Default QoS level.
    #[serde(default)]
    pub qos: Qos,

    /// Seconds to wait for the initial connection before failing.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Seconds slept between reconnect attempts after a disconnect.
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_secs: u64,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_clean_session() -> bool {
    true
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_reconnect_backoff() -> u64 {
    10
}

impl MqttConfig {
    /// Create a new configuration for a broker.
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port: default_port(),
            client_id: None,
            username: None,
            password: None,
            keep_alive: default_keep_alive(),
            clean_session: default_clean_session(),
            qos: Qos::default(),
            connection_timeout_secs: default_connection_timeout(),
            reconnect_backoff_secs: default_reconnect_backoff(),
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set authentication.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the client ID.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the default QoS.
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Set the reconnect backoff.
    pub fn with_reconnect_backoff(mut self, secs: u64) -> Self {
        self.reconnect_backoff_secs = secs;
        self
    }

    /// Full broker address.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }

    /// Backoff slept between reconnect attempts.
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    /// Build the rumqttc client pair for this configuration.
    ///
    /// `role` disambiguates generated client ids when one process runs both
    /// channel kinds against the same broker.
    pub(crate) fn build_client(&self, role: &str) -> (AsyncClient, EventLoop) {
        let client_id = self
            .client_id
            .clone()
            .unwrap_or_else(|| format!("sensorlink-{}-{}", role, Uuid::new_v4()));
        let mut options = MqttOptions::new(client_id, &self.broker, self.port);
        options.set_keep_alive(Duration::from_secs(self.keep_alive));
        options.set_clean_session(self.clean_session);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }
        AsyncClient::new(options, 64)
    }
}
