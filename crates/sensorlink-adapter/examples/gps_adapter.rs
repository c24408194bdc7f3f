//! Complete wiring demo: a GPS tracker adapter.
//!
//! Registers a tracker against a SensorThings server, publishes one
//! position fix over MQTT, and wires inbound telemetry back into the
//! reconciler. Point it at real services with:
//!
//! ```text
//! SENSORLINK_SERVER=http://localhost:8080/v1.0 \
//! SENSORLINK_BROKER=localhost \
//! cargo run --example gps_adapter
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use sensorlink_adapter::{
    attach_observations, AdapterContext, DeviceAdapter, DeviceDescriptor, InboundRoute,
    PilotConfig, PropertySpec,
};
use sensorlink_catalog::{LocalResourceCatalog, RemoteEntityCatalog, ServerConfig};
use sensorlink_core::Result;
use sensorlink_mqtt::{MqttConfig, PublishChannel, SubscribeChannel, TopicPattern};

/// GPS tracker family adapter: shapes tracker payloads, delegates the
/// reconciliation to the shared context.
struct GpsAdapter {
    context: Arc<AdapterContext>,
}

impl GpsAdapter {
    fn descriptor(&self, device_id: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(device_id)
            .with_description("Fleet GPS tracker")
            .with_property_spec(
                PropertySpec::new("position")
                    .with_definition(json!({
                        "description": "WGS84 position fix",
                        "definition": "http://www.opengis.net/def/property/OGC/0/SamplingLocation"
                    }))
                    .with_datastream_payload(json!({
                        "unitOfMeasurement": {
                            "name": "degree",
                            "symbol": "deg",
                            "definition": "http://www.opengis.net/def/uom/OGC/1.0/degree"
                        }
                    })),
            )
            .with_location(json!({
                "description": "Last known depot",
                "encodingType": "application/vnd.geo+json",
                "location": { "type": "Point", "coordinates": [7.68, 45.07] }
            }))
    }
}

#[async_trait]
impl DeviceAdapter for GpsAdapter {
    fn adapter_type(&self) -> &str {
        "gps"
    }

    async fn register(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        self.context.register(descriptor).await
    }

    async fn observe(&self, device_id: &str, property: &str, result: Value) -> Result<bool> {
        self.context.observe(device_id, property, result).await
    }

    async fn delete(&self, device_id: &str, cascade: bool) -> Result<()> {
        self.context.delete(device_id, cascade).await
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let server = ServerConfig::new(env_or("SENSORLINK_SERVER", "http://localhost:8080/v1.0"))
        .with_auth(
            env_or("SENSORLINK_USER", "pilot"),
            env_or("SENSORLINK_PASSWORD", "pilot"),
        );
    let broker = env_or("SENSORLINK_BROKER", "localhost");

    let publisher = Arc::new(PublishChannel::connect(MqttConfig::new(&broker)).await?);
    let local = LocalResourceCatalog::load("gps-catalog.json")?;
    let remote = RemoteEntityCatalog::with_server(server)?;
    let context = Arc::new(AdapterContext::new(
        remote,
        local,
        publisher,
        PilotConfig::new("v1.0/"),
    ));

    let adapter = GpsAdapter {
        context: context.clone(),
    };

    let descriptor = adapter.descriptor("gps-42");
    adapter.register(&descriptor).await?;
    info!("tracker registered");

    let accepted = adapter
        .observe("gps-42", "position", json!({ "lat": 45.07, "lon": 7.68 }))
        .await?;
    info!(accepted, "position fix published");

    // Inbound fixes from the trackers' own uplink topic flow back into the
    // reconciler; the subscription survives broker reconnects.
    let subscriber = SubscribeChannel::connect(MqttConfig::new(&broker)).await?;
    let pattern = TopicPattern::new("trackers/{id}/position")
        .ok_or_else(|| anyhow::anyhow!("invalid topic pattern"))?;
    let dispatch = attach_observations(
        context.clone(),
        &subscriber,
        vec![InboundRoute::new(
            "trackers/+/position",
            pattern,
            "position",
        )],
        sensorlink_mqtt::Qos::AtLeastOnce,
    )
    .await?;

    info!("listening for tracker uplinks, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    subscriber.disconnect().await;
    dispatch.await?;
    Ok(())
}
