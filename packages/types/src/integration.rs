use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::{IntegrationId, OwnerId};

/// The kind of external system an integration binds to. Each kind maps
/// to a connector factory registered with the integration engine.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    ObjectStore,
    CodeHost,
    IssueTracker,
    Chat,
}

impl IntegrationKind {
    /// Config keys a definition of this kind must carry. Validated at
    /// registration time, before any connector is built.
    pub fn required_config_keys(&self) -> &'static [&'static str] {
        match self {
            IntegrationKind::ObjectStore => &["endpoint", "bucket"],
            IntegrationKind::CodeHost => &["api_base", "owner"],
            IntegrationKind::IssueTracker => &["api_base", "project"],
            IntegrationKind::Chat => &["webhook_url"],
        }
    }
}

impl std::fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntegrationKind::ObjectStore => "object_store",
            IntegrationKind::CodeHost => "code_host",
            IntegrationKind::IssueTracker => "issue_tracker",
            IntegrationKind::Chat => "chat",
        };
        write!(f, "{}", s)
    }
}

/// A named, owner-scoped configuration binding the platform to an
/// external system. `(owner, name)` is unique; credentials are held as
/// an opaque reference resolved through the secret store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct Integration {
    pub id: IntegrationId,
    pub owner: OwnerId,
    pub kind: IntegrationKind,
    pub name: String,
    #[schema(value_type = Object)]
    pub config: BTreeMap<String, serde_json::Value>,
    /// Reference into the secret store; never the secret itself.
    pub credential_ref: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    /// Connector instances are keyed by this; any change to config or
    /// credentials yields a new fingerprint and therefore a new instance.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.credential_ref.as_bytes());
        for (key, value) in &self.config {
            hasher.update(key.as_bytes());
            hasher.update(value.to_string().as_bytes());
        }
        const_hex::encode(hasher.finalize())
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// Result of probing an integration's connectivity.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct TestOutcome {
    pub ok: bool,
    pub latency_ms: u64,
    pub diagnostics: Vec<String>,
}

/// Declared shape of a single connector operation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, ToSchema)]
pub struct OperationSpec {
    pub description: String,
    /// Params the operation refuses to run without.
    pub required_params: Vec<String>,
}

/// The capability map a connector publishes: operation name to spec.
pub type Capabilities = BTreeMap<String, OperationSpec>;
