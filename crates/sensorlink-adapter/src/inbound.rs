//! Inbound telemetry wiring: subscribe channel → reconciler.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::warn;

use sensorlink_core::{Error, Result};
use sensorlink_mqtt::{InboundHandler, MessageDispatcher, Qos, SubscribeChannel, TopicPattern};

use crate::context::AdapterContext;

/// One inbound telemetry route.
///
/// `filter` is the MQTT subscription filter (wildcards allowed); `pattern`
/// extracts the device id from concrete topics; `property` names the
/// observed property the payload carries.
#[derive(Debug, Clone)]
pub struct InboundRoute {
    pub filter: String,
    pub pattern: TopicPattern,
    pub property: String,
}

impl InboundRoute {
    pub fn new(
        filter: impl Into<String>,
        pattern: TopicPattern,
        property: impl Into<String>,
    ) -> Self {
        Self {
            filter: filter.into(),
            pattern,
            property: property.into(),
        }
    }
}

/// Turns inbound messages into observe calls on the reconciler.
pub struct ObservationIngest {
    context: Arc<AdapterContext>,
    property: String,
}

impl ObservationIngest {
    pub fn new(context: Arc<AdapterContext>, property: impl Into<String>) -> Self {
        Self {
            context,
            property: property.into(),
        }
    }
}

#[async_trait]
impl InboundHandler for ObservationIngest {
    async fn handle(&self, device_id: &str, payload: &[u8]) {
        let result: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(device_id, error = %e, "discarding malformed inbound payload");
                return;
            }
        };
        match self.context.observe(device_id, &self.property, result).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(device_id, property = %self.property, "inbound observation not accepted");
            }
            Err(e) => {
                warn!(device_id, property = %self.property, error = %e, "inbound observation rejected");
            }
        }
    }
}

/// Subscribe the channel to every route and spawn the dispatch loop.
///
/// The channel records each filter, so the routes survive broker
/// reconnects. The returned handle runs until the channel is disconnected.
pub async fn attach_observations(
    context: Arc<AdapterContext>,
    channel: &SubscribeChannel,
    routes: Vec<InboundRoute>,
    qos: Qos,
) -> Result<JoinHandle<()>> {
    let mut dispatcher = MessageDispatcher::new();
    for route in routes {
        channel.subscribe(&route.filter, qos).await?;
        dispatcher = dispatcher.route(
            route.pattern,
            Arc::new(ObservationIngest::new(context.clone(), route.property)),
        );
    }
    let messages = channel.take_messages().await.ok_or_else(|| {
        Error::Inconsistent("subscribe channel message stream already taken".to_string())
    })?;
    Ok(tokio::spawn(dispatcher.run(messages)))
}
