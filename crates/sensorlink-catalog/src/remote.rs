//! Name-based reconciliation against the SensorThings metadata server.
//!
//! Every entity the engine manages is identified by a name that is unique
//! within its kind on the server. Resolution follows one rule: query first,
//! create only when nothing matches, and refuse to guess when more than one
//! entity carries the name.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use sensorlink_core::entity::observation_topic;
use sensorlink_core::{Datastream, EntityId, EntityKind, Error, RemoteEntity, Result};

/// Transport seam for the metadata server.
///
/// The production implementation is [`HttpSensorThingsApi`]; tests drive the
/// catalog through an in-memory fake.
#[async_trait]
pub trait SensorThingsApi: Send + Sync {
    /// All entities of `kind` whose name equals `name`.
    async fn query_by_name(&self, kind: EntityKind, name: &str) -> Result<Vec<Value>>;

    /// Create an entity; returns the server's response body.
    async fn create(&self, kind: EntityKind, body: &Value) -> Result<Value>;

    /// Patch an existing entity; returns the server's response body.
    async fn update(&self, kind: EntityKind, id: EntityId, body: &Value) -> Result<Value>;

    /// Delete an entity.
    async fn delete(&self, kind: EntityKind, id: EntityId) -> Result<()>;
}

/// Metadata server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the SensorThings service, e.g. `http://host:8080/v1.0`.
    pub base_url: String,

    /// Basic-Auth username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Basic-Auth password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl ServerConfig {
    /// Create a new server configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            password: None,
            timeout_secs: default_timeout(),
        }
    }

    /// Set Basic-Auth credentials.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// SensorThings REST client over `reqwest`.
pub struct HttpSensorThingsApi {
    config: ServerConfig,
    client: reqwest::Client,
}

impl HttpSensorThingsApi {
    /// Build the client from a server configuration.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            kind.collection()
        )
    }

    fn item_url(&self, kind: EntityKind, id: EntityId) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            kind.item_path(id)
        )
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.username {
            Some(username) => request.basic_auth(username, self.config.password.as_deref()),
            None => request,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("server answered {}: {}", status, body)));
        }
        // PATCH/DELETE responses may legitimately carry no body.
        let raw = response.text().await.map_err(request_error)?;
        if raw.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&raw).map_err(Error::from)
    }
}

fn request_error(e: reqwest::Error) -> Error {
    if e.is_connect() || e.is_timeout() {
        Error::Connectivity(format!("metadata server unreachable: {}", e))
    } else {
        Error::Http(e.to_string())
    }
}

#[async_trait]
impl SensorThingsApi for HttpSensorThingsApi {
    async fn query_by_name(&self, kind: EntityKind, name: &str) -> Result<Vec<Value>> {
        let filter = format!("name eq '{}'", name);
        let url = format!(
            "{}?$filter={}",
            self.collection_url(kind),
            urlencoding::encode(&filter)
        );
        debug!(%kind, name, "querying metadata server");
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(request_error)?;
        let body = Self::read_json(response).await?;
        Ok(body
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn create(&self, kind: EntityKind, body: &Value) -> Result<Value> {
        let response = self
            .with_auth(self.client.post(self.collection_url(kind)))
            .json(body)
            .send()
            .await
            .map_err(request_error)?;
        Self::read_json(response).await
    }

    async fn update(&self, kind: EntityKind, id: EntityId, body: &Value) -> Result<Value> {
        let response = self
            .with_auth(self.client.patch(self.item_url(kind, id)))
            .json(body)
            .send()
            .await
            .map_err(request_error)?;
        Self::read_json(response).await
    }

    async fn delete(&self, kind: EntityKind, id: EntityId) -> Result<()> {
        let response = self
            .with_auth(self.client.delete(self.item_url(kind, id)))
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!("delete answered {}", status)));
        }
        Ok(())
    }
}

/// Server-assigned id carried in entity bodies.
fn extract_id(body: &Value) -> Option<EntityId> {
    body.get("@iot.id").and_then(Value::as_i64)
}

/// Idempotent registry of named entities on the metadata server.
pub struct RemoteEntityCatalog {
    api: Arc<dyn SensorThingsApi>,
}

impl RemoteEntityCatalog {
    /// Create a catalog over an arbitrary API transport.
    pub fn new(api: Arc<dyn SensorThingsApi>) -> Self {
        Self { api }
    }

    /// Create a catalog talking HTTP to the configured server.
    pub fn with_server(config: ServerConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpSensorThingsApi::new(config)?)))
    }

    /// Resolve an entity to its server-assigned id, creating it when absent.
    ///
    /// Exactly one existing match returns its id without issuing a write;
    /// more than one match is refused. Repeated calls with the same
    /// `(name, kind)` converge to the same id and issue at most one create.
    pub async fn discover_or_register(&self, entity: &RemoteEntity) -> Result<EntityId> {
        self.resolve(entity.kind, &entity.name, &entity.body(), false)
            .await
    }

    /// As [`discover_or_register`](Self::discover_or_register), but an
    /// existing match is patched with the new payload. Fails when the update
    /// response names a different id than the one matched.
    pub async fn override_or_register(&self, entity: &RemoteEntity) -> Result<EntityId> {
        self.resolve(entity.kind, &entity.name, &entity.body(), true)
            .await
    }

    /// Resolve a datastream and derive its observation topic.
    ///
    /// The Thing/Sensor/ObservedProperty references must already be
    /// resolved; they are folded into the request body. Returns the
    /// datastream with its id and `<prefix>Datastreams(<id>)/Observations`
    /// topic filled in.
    pub async fn register_datastream(
        &self,
        datastream: &Datastream,
        topic_prefix: &str,
        force_update: bool,
    ) -> Result<Datastream> {
        let id = self
            .resolve(
                EntityKind::Datastream,
                &datastream.entity.name,
                &datastream.body(),
                force_update,
            )
            .await?;
        let mut resolved = datastream.clone();
        resolved.entity.id = Some(id);
        resolved.topic = Some(observation_topic(topic_prefix, id));
        Ok(resolved)
    }

    /// Best-effort remote delete; never raises.
    ///
    /// Returns whether the server accepted the delete. Escalation is the
    /// caller's decision.
    pub async fn delete(&self, kind: EntityKind, id: EntityId) -> bool {
        match self.api.delete(kind, id).await {
            Ok(()) => {
                info!(%kind, id, "deleted remote entity");
                true
            }
            Err(e) => {
                warn!(%kind, id, error = %e, "remote delete failed");
                false
            }
        }
    }

    async fn resolve(
        &self,
        kind: EntityKind,
        name: &str,
        body: &Value,
        update_existing: bool,
    ) -> Result<EntityId> {
        let matches = self.api.query_by_name(kind, name).await?;
        match matches.len() {
            0 => {
                let created = self.api.create(kind, body).await?;
                let id = extract_id(&created).ok_or_else(|| Error::Registration {
                    kind,
                    name: name.to_string(),
                })?;
                info!(%kind, name, id, "registered remote entity");
                Ok(id)
            }
            1 => {
                let id = extract_id(&matches[0]).ok_or_else(|| {
                    Error::Inconsistent(format!(
                        "{} '{}' discovery result carried no id",
                        kind, name
                    ))
                })?;
                if update_existing {
                    let updated = self.api.update(kind, id, body).await?;
                    if let Some(updated_id) = extract_id(&updated) {
                        if updated_id != id {
                            return Err(Error::Inconsistent(format!(
                                "{} '{}' update answered id {} for id {}",
                                kind, name, updated_id, id
                            )));
                        }
                    }
                    info!(%kind, name, id, "updated remote entity");
                } else {
                    debug!(%kind, name, id, "discovered remote entity");
                }
                Ok(id)
            }
            count => Err(Error::Duplicate {
                kind,
                name: name.to_string(),
                count,
            }),
        }
    }
}
