//! Outbound observation delivery.
//!
//! The channel owns one `rumqttc` client whose event loop runs on a spawned
//! task. The initial connection is awaited and fails fatally; once up, a
//! lost connection is retried forever with a fixed backoff. Publish success
//! means the local client accepted the message for transmission at the
//! requested QoS, nothing more; broker-side durability is whatever the QoS
//! level provides.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, Packet};
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use sensorlink_core::{Error, Observation, Result};

use crate::config::{MqttConfig, Qos};
use crate::ConnectionStatus;

/// MQTT publisher with reconnect-on-disconnect.
pub struct PublishChannel {
    client: AsyncClient,
    status: Arc<RwLock<ConnectionStatus>>,
    running: Arc<AtomicBool>,
    config: MqttConfig,
}

impl PublishChannel {
    /// Connect to the broker.
    ///
    /// Waits for the first ConnAck; failure to establish the initial
    /// connection is fatal. Afterwards the event loop keeps the connection
    /// alive on its own task.
    pub async fn connect(config: MqttConfig) -> Result<Self> {
        let (client, mut event_loop) = config.build_client("pub");
        await_first_connack(
            &mut event_loop,
            config.connection_timeout_secs,
            &config.broker_addr(),
        )
        .await?;
        info!(broker = %config.broker_addr(), "publish channel connected");

        let status = Arc::new(RwLock::new(ConnectionStatus::Connected));
        let running = Arc::new(AtomicBool::new(true));
        tokio::spawn(keep_alive(
            event_loop,
            status.clone(),
            running.clone(),
            config.reconnect_backoff(),
            config.broker_addr(),
        ));

        Ok(Self {
            client,
            status,
            running,
            config,
        })
    }

    /// Hand a message to the local client for transmission.
    ///
    /// Returns whether the client accepted it; a `false` is logged, never
    /// raised, and not retried by this layer.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, qos: Qos) -> bool {
        match self.client.publish(topic, qos.into(), false, payload).await {
            Ok(()) => true,
            Err(e) => {
                warn!(topic, error = %e, "publish rejected by local client");
                false
            }
        }
    }

    /// Publish an observation payload to its datastream topic.
    pub async fn publish_observation(
        &self,
        topic: &str,
        observation: &Observation,
        qos: Qos,
    ) -> bool {
        let payload = observation.to_payload().to_string();
        let accepted = self.publish(topic, payload.into_bytes(), qos).await;
        if accepted {
            // Diagnostic only; no bearing on the publish outcome.
            let latency = Utc::now().signed_duration_since(observation.result_time);
            debug!(
                topic,
                datastream_id = observation.datastream_id,
                latency_ms = latency.num_milliseconds(),
                "observation accepted for delivery"
            );
        }
        accepted
    }

    /// Current connection status.
    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    /// QoS the channel was configured with.
    pub fn default_qos(&self) -> Qos {
        self.config.qos
    }

    /// Stop the event loop and disconnect.
    pub async fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.client.disconnect().await;
        *self.status.write().await = ConnectionStatus::Disconnected;
    }
}

/// Drive the event loop forever: fixed backoff on error, status updates on
/// ConnAck. rumqttc re-establishes the connection on the next poll after a
/// failure, so the loop body is the whole reconnect state machine.
async fn keep_alive(
    mut event_loop: EventLoop,
    status: Arc<RwLock<ConnectionStatus>>,
    running: Arc<AtomicBool>,
    backoff: Duration,
    broker: String,
) {
    while running.load(Ordering::SeqCst) {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack)))
                if ack.code == ConnectReturnCode::Success =>
            {
                let mut current = status.write().await;
                if *current == ConnectionStatus::Reconnecting {
                    info!(broker = %broker, "publish channel reconnected");
                }
                *current = ConnectionStatus::Connected;
            }
            Ok(_) => {}
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                *status.write().await = ConnectionStatus::Reconnecting;
                warn!(
                    broker = %broker,
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "publish channel disconnected, backing off"
                );
                sleep(backoff).await;
            }
        }
    }
    debug!(broker = %broker, "publish channel event loop stopped");
}

/// Await the first ConnAck of a fresh event loop.
pub(crate) async fn await_first_connack(
    event_loop: &mut EventLoop,
    timeout_secs: u64,
    broker: &str,
) -> Result<()> {
    let handshake = async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    return if ack.code == ConnectReturnCode::Success {
                        Ok(())
                    } else {
                        Err(Error::Connectivity(format!(
                            "broker {} refused connection: {:?}",
                            broker, ack.code
                        )))
                    };
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(Error::Connectivity(format!(
                        "broker {} unreachable: {}",
                        broker, e
                    )))
                }
            }
        }
    };
    timeout(Duration::from_secs(timeout_secs), handshake)
        .await
        .map_err(|_| Error::Connectivity(format!("broker {} connection timed out", broker)))?
}
