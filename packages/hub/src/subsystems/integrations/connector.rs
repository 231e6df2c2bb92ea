use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use vertex_types::{Capabilities, Integration, IntegrationKind, TestOutcome};

use super::connectors;
use super::error::ConnectorError;

/// Everything a connector gets at instantiation time. Each instance
/// receives its own resolved credential and its own HTTP client;
/// connectors never share mutable state.
pub struct ConnectorContext {
    pub integration: Integration,
    pub credential: String,
    pub http: reqwest::Client,
}

impl ConnectorContext {
    pub fn new(integration: Integration, credential: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            integration,
            credential,
            http,
        }
    }

    /// Pulls a required config key, normalizing the error.
    pub fn require_config(&self, key: &str) -> Result<String, ConnectorError> {
        self.integration
            .config_str(key)
            .map(str::to_owned)
            .ok_or_else(|| ConnectorError::MissingParam(format!("config.{}", key)))
    }
}

/// The contract every connector implements. The engine is agnostic to
/// connector internals: it validates params against `capabilities()` and
/// routes `execute` calls.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Probe connectivity. Failures come back inside the outcome as
    /// diagnostics, not as errors.
    async fn test(&self) -> TestOutcome;

    /// Declared operation map: name to required params.
    fn capabilities(&self) -> Capabilities;

    async fn execute(&self, operation: &str, params: &Value) -> Result<Value, ConnectorError>;
}

pub type ConnectorFactory =
    Arc<dyn Fn(ConnectorContext) -> Result<Arc<dyn Connector>, ConnectorError> + Send + Sync>;

/// Kind-to-factory table. Built-ins are registered up front; additional
/// connectors can be slotted in before the hub starts.
#[derive(Clone)]
pub struct ConnectorRegistry {
    factories: HashMap<IntegrationKind, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(IntegrationKind::ObjectStore, |ctx| {
            connectors::object_store::ObjectStoreConnector::from_context(ctx)
                .map(|c| Arc::new(c) as Arc<dyn Connector>)
        });
        registry.register(IntegrationKind::CodeHost, |ctx| {
            connectors::code_host::CodeHostConnector::from_context(ctx)
                .map(|c| Arc::new(c) as Arc<dyn Connector>)
        });
        registry.register(IntegrationKind::IssueTracker, |ctx| {
            connectors::issue_tracker::IssueTrackerConnector::from_context(ctx)
                .map(|c| Arc::new(c) as Arc<dyn Connector>)
        });
        registry.register(IntegrationKind::Chat, |ctx| {
            connectors::chat::ChatConnector::from_context(ctx)
                .map(|c| Arc::new(c) as Arc<dyn Connector>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: IntegrationKind, factory: F)
    where
        F: Fn(ConnectorContext) -> Result<Arc<dyn Connector>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    pub fn build(
        &self,
        kind: IntegrationKind,
        ctx: ConnectorContext,
    ) -> Result<Arc<dyn Connector>, ConnectorError> {
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| ConnectorError::Permanent(format!("no connector for kind {}", kind)))?;
        factory(ctx)
    }
}

/// Shared param helpers for connector implementations.
pub(crate) fn require_param<'a>(params: &'a Value, key: &str) -> Result<&'a str, ConnectorError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ConnectorError::MissingParam(key.to_string()))
}

pub(crate) fn optional_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Folds an HTTP response into a connector result: JSON bodies pass
/// through, anything else is wrapped with the status code. 5xx counts as
/// transient, 4xx as permanent.
pub(crate) async fn response_to_value(
    response: reqwest::Response,
) -> Result<Value, ConnectorError> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status.is_server_error() {
        return Err(ConnectorError::Transient(format!(
            "upstream returned {}: {}",
            status,
            truncate(&body, 256)
        )));
    }
    if status.is_client_error() {
        return Err(ConnectorError::Permanent(format!(
            "upstream returned {}: {}",
            status,
            truncate(&body, 256)
        )));
    }

    Ok(serde_json::from_str(&body).unwrap_or_else(|_| {
        serde_json::json!({
            "status": status.as_u16(),
            "body": body,
        })
    }))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}
