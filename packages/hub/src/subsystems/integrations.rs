pub mod connector;
pub mod connectors;
pub mod error;
pub mod instances;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use error::{ConnectorError, IntegrationError};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;
use utils::context::AppContext;
use utils::secrets::SecretResolver;
use utils::telemetry::IntegrationMetrics;
use utoipa::ToSchema;
use vertex_types::{
    Capabilities, Integration, IntegrationId, IntegrationKind, OwnerId, TestOutcome,
};

use crate::config::Config;
use crate::stores::Stores;
use connector::{Connector, ConnectorContext, ConnectorRegistry};
use instances::ConnectorInstances;

#[derive(Deserialize, Clone, Debug, ToSchema)]
pub struct NewIntegration {
    pub kind: IntegrationKind,
    pub name: String,
    #[schema(value_type = Object)]
    pub config: BTreeMap<String, Value>,
    pub credential_ref: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Deserialize, Clone, Debug, Default, ToSchema)]
pub struct IntegrationPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub config: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub credential_ref: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Owns integration definitions and the connector instances serving
/// them. Transport retries are deliberately absent here: operation
/// failures surface as typed results and callers decide policy.
#[derive(Clone)]
pub struct IntegrationManager {
    stores: Stores,
    registry: Arc<ConnectorRegistry>,
    instances: Arc<ConnectorInstances>,
    secrets: Arc<dyn SecretResolver>,
    operation_timeout: Duration,
    metrics: IntegrationMetrics,
}

impl IntegrationManager {
    pub fn new(
        config: &Config,
        stores: Stores,
        secrets: Arc<dyn SecretResolver>,
        metrics: IntegrationMetrics,
    ) -> Self {
        Self {
            stores,
            registry: Arc::new(ConnectorRegistry::with_builtins()),
            instances: Arc::new(ConnectorInstances::new(
                config.connectors.max_instances,
                Duration::from_secs(config.connectors.idle_ttl_secs),
                metrics.clone(),
            )),
            secrets,
            operation_timeout: Duration::from_secs(config.connectors.operation_timeout_secs),
            metrics,
        }
    }

    /// Periodic idle sweep of the instance cache.
    pub fn start(&self, ctx: AppContext) {
        let instances = self.instances.clone();
        let mut kill_receiver = ctx.get_kill_receiver();

        ctx.rt.spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = kill_receiver.recv() => {
                        tracing::debug!("Connector instance sweeper shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        instances.sweep();
                    }
                }
            }
        });
    }

    #[instrument(skip(self, new), fields(subsys = "Integrations"))]
    pub fn register(
        &self,
        owner: &OwnerId,
        new: NewIntegration,
    ) -> Result<Integration, IntegrationError> {
        if new.name.trim().is_empty() {
            return Err(IntegrationError::Validation("name must not be empty".into()));
        }
        for key in new.kind.required_config_keys() {
            if !new.config.contains_key(*key) {
                return Err(IntegrationError::Validation(format!(
                    "config is missing required key {} for kind {}",
                    key, new.kind
                )));
            }
        }
        if self
            .stores
            .find_integration_by_name(owner, &new.name)?
            .is_some()
        {
            return Err(IntegrationError::Conflict { name: new.name });
        }

        let now = Utc::now();
        let integration = Integration {
            id: IntegrationId::generate(),
            owner: owner.clone(),
            kind: new.kind,
            name: new.name,
            config: new.config,
            credential_ref: new.credential_ref,
            tags: new.tags,
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.stores.save_integration(&integration)?;
        self.metrics.registered.add(1, &[]);

        tracing::info!(
            "Integration registered: id={}, kind={}, name={}",
            integration.id,
            integration.kind,
            integration.name
        );
        Ok(integration)
    }

    #[instrument(skip(self, patch), fields(subsys = "Integrations"))]
    pub fn update(
        &self,
        id: &IntegrationId,
        patch: IntegrationPatch,
    ) -> Result<Integration, IntegrationError> {
        let current = self.stores.get_integration(id)?;

        if let Some(name) = &patch.name {
            if name != &current.name {
                if let Some(existing) = self.stores.find_integration_by_name(&current.owner, name)? {
                    if existing.id != *id {
                        return Err(IntegrationError::Conflict { name: name.clone() });
                    }
                }
            }
        }
        if let Some(config) = &patch.config {
            for key in current.kind.required_config_keys() {
                if !config.contains_key(*key) {
                    return Err(IntegrationError::Validation(format!(
                        "config is missing required key {} for kind {}",
                        key, current.kind
                    )));
                }
            }
        }

        let credentials_changed =
            patch.config.is_some() || patch.credential_ref.is_some();

        let updated = self.stores.update_integration(id, |integration| {
            if let Some(name) = patch.name {
                integration.name = name;
            }
            if let Some(config) = patch.config {
                integration.config = config;
            }
            if let Some(credential_ref) = patch.credential_ref {
                integration.credential_ref = credential_ref;
            }
            if let Some(tags) = patch.tags {
                integration.tags = tags;
            }
        })?;

        // the next execute must never observe an instance built from the
        // old config or credentials
        if credentials_changed {
            self.instances.evict(id);
        }

        Ok(updated)
    }

    #[instrument(skip(self), fields(subsys = "Integrations"))]
    pub fn deactivate(&self, id: &IntegrationId) -> Result<Integration, IntegrationError> {
        let updated = self.stores.update_integration(id, |integration| {
            integration.active = false;
        })?;
        self.instances.evict(id);
        Ok(updated)
    }

    #[instrument(skip(self), fields(subsys = "Integrations"))]
    pub fn reactivate(&self, id: &IntegrationId) -> Result<Integration, IntegrationError> {
        Ok(self.stores.update_integration(id, |integration| {
            integration.active = true;
        })?)
    }

    #[instrument(skip(self), fields(subsys = "Integrations"))]
    pub fn remove(&self, id: &IntegrationId) -> Result<Integration, IntegrationError> {
        let removed = self.stores.remove_integration(id)?;
        self.instances.evict(id);
        self.metrics.registered.add(-1, &[]);
        Ok(removed)
    }

    pub fn get(&self, id: &IntegrationId) -> Result<Integration, IntegrationError> {
        Ok(self.stores.get_integration(id)?)
    }

    pub fn list(&self) -> Result<Vec<Integration>, IntegrationError> {
        Ok(self.stores.list_integrations()?)
    }

    /// Probes the integration's connectivity. Connector failures are
    /// folded into the outcome's diagnostics rather than raised.
    #[instrument(skip(self), fields(subsys = "Integrations"))]
    pub async fn test(&self, id: &IntegrationId) -> Result<TestOutcome, IntegrationError> {
        let integration = self.stores.get_integration(id)?;
        let connector = match self.connector_for(&integration) {
            Ok(connector) => connector,
            Err(IntegrationError::Connector(err)) => {
                return Ok(TestOutcome {
                    ok: false,
                    latency_ms: 0,
                    diagnostics: vec![err.to_string()],
                })
            }
            Err(err) => return Err(err),
        };
        Ok(connector.test().await)
    }

    pub fn capabilities(&self, id: &IntegrationId) -> Result<Capabilities, IntegrationError> {
        let integration = self.stores.get_integration(id)?;
        let connector = self.connector_for(&integration)?;
        Ok(connector.capabilities())
    }

    #[instrument(skip(self, params), fields(subsys = "Integrations"))]
    pub async fn execute(
        &self,
        id: &IntegrationId,
        operation: &str,
        params: &Value,
    ) -> Result<Value, IntegrationError> {
        let integration = self.stores.get_integration(id)?;
        if !integration.active {
            return Err(IntegrationError::Inactive(*id));
        }

        let connector = self.connector_for(&integration)?;

        let capabilities = connector.capabilities();
        let spec = capabilities.get(operation).ok_or_else(|| {
            ConnectorError::UnsupportedOperation(operation.to_string())
        })?;
        for required in &spec.required_params {
            if params.get(required).is_none() {
                return Err(ConnectorError::MissingParam(required.clone()).into());
            }
        }

        self.metrics
            .record_operation(&integration.kind.to_string(), operation);

        match connector.execute(operation, params).await {
            Ok(result) => Ok(result),
            Err(err) => {
                self.metrics
                    .record_operation_error(&integration.kind.to_string(), &err.to_string());
                Err(err.into())
            }
        }
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn connector_for(
        &self,
        integration: &Integration,
    ) -> Result<Arc<dyn Connector>, IntegrationError> {
        self.instances.get_or_build(integration, || {
            let credential = self.secrets.resolve(&integration.credential_ref)?;
            let ctx = ConnectorContext::new(
                integration.clone(),
                credential,
                self.operation_timeout,
            );
            Ok(self.registry.build(integration.kind, ctx)?)
        })
    }
}
