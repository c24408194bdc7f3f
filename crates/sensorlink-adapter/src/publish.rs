//! Publisher seam between the reconciler and the MQTT channel.

use async_trait::async_trait;

use sensorlink_core::Observation;
use sensorlink_mqtt::{PublishChannel, Qos};

/// Outbound observation delivery as the reconciler sees it.
///
/// [`PublishChannel`] is the production implementation; tests record the
/// published observations instead of touching a broker.
#[async_trait]
pub trait ObservationPublisher: Send + Sync {
    /// Hand an observation to the transport; returns local acceptance.
    async fn publish_observation(
        &self,
        topic: &str,
        observation: &Observation,
        qos: Qos,
    ) -> bool;
}

#[async_trait]
impl ObservationPublisher for PublishChannel {
    async fn publish_observation(
        &self,
        topic: &str,
        observation: &Observation,
        qos: Qos,
    ) -> bool {
        PublishChannel::publish_observation(self, topic, observation, qos).await
    }
}
