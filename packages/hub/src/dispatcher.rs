use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::instrument;
use utils::cache::{CacheClass, HubCache};
use utils::context::AppContext;
use utils::secrets::SecretResolver;
use utils::storage::db::HubDb;
use utils::telemetry::HubMetrics;
use utoipa::ToSchema;
use vertex_types::{
    to_canonical_json, AuthContext, Capabilities, DeliveryId, Event, EventId, ExecutionId,
    Integration, IntegrationId, NotificationDelivery, NotificationId, NotificationTemplate,
    OwnerId, Report, ReportExecution, ReportId, ReportTemplate, ReportTemplateId, Subscription,
    SubscriptionId, TemplateId, TestOutcome, Webhook, WebhookDelivery, WebhookId,
};

use crate::config::Config;
use crate::stores::{StoreError, Stores};
use crate::subsystems::events::error::EventError;
use crate::subsystems::events::{EventBroker, NewSubscription, PublishOutcome};
use crate::subsystems::integrations::error::{ConnectorError, IntegrationError};
use crate::subsystems::integrations::{IntegrationManager, IntegrationPatch, NewIntegration};
use crate::subsystems::notifications::error::NotificationError;
use crate::subsystems::notifications::{NewTemplate, NotificationManager, SendNotification};
use crate::subsystems::reports::error::ReportError;
use crate::subsystems::reports::{
    NewReport, NewReportTemplate, ReportPatch, ReportScheduler,
};
use crate::subsystems::webhooks::error::WebhookError;
use crate::subsystems::webhooks::{NewWebhook, WebhookManager, WebhookPatch};

/*
 * High-level system design
 *
 * The Hub is the composition layer over the five subsystems. Management
 * calls come in from the http server carrying the caller's resolved
 * AuthContext; the Hub enforces owner scoping, delegates to the owning
 * subsystem, and publishes exactly one lifecycle event per committed
 * state change.
 *
 * The execution pipelines (webhook delivery workers, the notification
 * queue, the report ticker, subscription lanes) run on their own tasks
 * inside the shared runtime and are started once from `start`. Workers
 * coordinate through the stores and per-key claim maps; the Hub itself
 * holds no delivery state.
 */

/// Boundary error taxonomy. Subsystem errors fold into these kinds, and
/// the HTTP layer maps each kind to a status code.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Not authorized to access this resource")]
    Authorization,

    #[error("Connector failure: {0}")]
    Connector(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Template render failed: {0}")]
    TemplateRender(String),

    #[error("Deadline exceeded")]
    Timeout,

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TerminalDelivery(..) | StoreError::TerminalExecution(..) => {
                HubError::Conflict(err.to_string())
            }
            StoreError::DBError(e) => HubError::Internal(e.to_string()),
            other => HubError::NotFound(other.to_string()),
        }
    }
}

impl From<IntegrationError> for HubError {
    fn from(err: IntegrationError) -> Self {
        match err {
            IntegrationError::Validation(msg) => HubError::Validation(msg),
            IntegrationError::Conflict { .. } => HubError::Conflict(err.to_string()),
            IntegrationError::Inactive(_) => HubError::Validation(err.to_string()),
            IntegrationError::Secret(e) => HubError::Validation(e.to_string()),
            IntegrationError::Connector(e) => e.into(),
            IntegrationError::Store(e) => e.into(),
        }
    }
}

impl From<ConnectorError> for HubError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::UnsupportedOperation(_) | ConnectorError::MissingParam(_) => {
                HubError::Validation(err.to_string())
            }
            ConnectorError::Transient(msg) | ConnectorError::Permanent(msg) => {
                HubError::Connector(msg)
            }
        }
    }
}

impl From<WebhookError> for HubError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Validation(msg) => HubError::Validation(msg),
            WebhookError::Conflict { .. } => HubError::Conflict(err.to_string()),
            WebhookError::Inactive(_) => HubError::Validation(err.to_string()),
            WebhookError::Store(e) => e.into(),
        }
    }
}

impl From<NotificationError> for HubError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::Validation(msg) => HubError::Validation(msg),
            NotificationError::Conflict { .. } => HubError::Conflict(err.to_string()),
            NotificationError::Render(e) => HubError::TemplateRender(e.to_string()),
            NotificationError::Terminal(_) => HubError::Conflict(err.to_string()),
            NotificationError::Store(e) => e.into(),
        }
    }
}

impl From<EventError> for HubError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Validation(msg) => HubError::Validation(msg),
            EventError::UnknownHandler(_) => HubError::Validation(err.to_string()),
            EventError::Webhook(e) => e.into(),
            EventError::Store(e) => e.into(),
        }
    }
}

impl From<ReportError> for HubError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::Validation(msg) => HubError::Validation(msg),
            ReportError::Schedule(e) => HubError::Validation(e.to_string()),
            ReportError::TerminalExecution(_) => HubError::Conflict(err.to_string()),
            ReportError::Artifact(e) => HubError::Internal(e.to_string()),
            ReportError::Notification(e) => e.into(),
            ReportError::Store(e) => e.into(),
        }
    }
}

type Result<T> = std::result::Result<T, HubError>;

/// Live operational counters served from `/metrics`.
#[derive(Serialize, serde::Deserialize, Clone, Debug, ToSchema)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub integrations: usize,
    pub connector_instances: usize,
    pub pending_webhook_deliveries: usize,
    pub notification_queue_depth: usize,
    pub scheduled_reports: usize,
    pub reports_in_flight: usize,
    pub active_subscriptions: usize,
}

/// The composition layer over the hub subsystems. One instance per
/// process, shared by the HTTP layer and the background workers.
pub struct Hub {
    pub stores: Stores,
    pub integrations: IntegrationManager,
    pub webhooks: WebhookManager,
    pub notifications: NotificationManager,
    pub broker: Arc<EventBroker>,
    pub reports: ReportScheduler,
    pub cache: Arc<HubCache>,
    max_payload_bytes: usize,
    started_at: Instant,
}

impl Hub {
    pub fn new(
        config: &Config,
        secrets: Arc<dyn SecretResolver>,
        metrics: HubMetrics,
    ) -> Self {
        let stores = Stores::new(HubDb::new());

        let webhooks = WebhookManager::new(config, stores.clone(), metrics.webhook.clone());
        let broker = Arc::new(EventBroker::new(
            config,
            stores.clone(),
            webhooks.clone(),
            metrics.event.clone(),
        ));
        let notifications = NotificationManager::new(
            config,
            stores.clone(),
            broker.clone(),
            metrics.notification.clone(),
        );
        let integrations = IntegrationManager::new(
            config,
            stores.clone(),
            secrets,
            metrics.integration.clone(),
        );
        let reports = ReportScheduler::new(
            config,
            stores.clone(),
            notifications.clone(),
            broker.clone(),
            metrics.report.clone(),
        );

        let cache = Arc::new(HubCache::new(
            config.cache.tier1_size,
            Duration::from_secs(config.cache.default_ttl_secs),
            metrics.cache.clone(),
        ));

        Self {
            stores,
            integrations,
            webhooks,
            notifications,
            broker,
            reports,
            cache,
            max_payload_bytes: config.webhooks.max_payload_bytes,
            started_at: Instant::now(),
        }
    }

    /// Starts every subsystem's background workers. Called once, after
    /// construction; shutdown flows through the context's kill signal.
    #[instrument(skip(self, ctx), fields(subsys = "Hub"))]
    pub fn start(&self, ctx: AppContext) {
        self.webhooks.start(ctx.clone());
        self.notifications.start(ctx.clone());
        self.integrations.start(ctx.clone());
        self.reports.start(ctx);
        tracing::info!("Hub subsystems started");
    }

    async fn publish_lifecycle(&self, kind: &str, payload: Value) {
        let outcome = self.broker.publish(Event::new(kind, "hub", payload)).await;
        tracing::debug!(
            "Lifecycle event {}: matched={}, deliveries={}",
            kind,
            outcome.matched,
            outcome.webhook_deliveries
        );
    }

    fn ensure_read(auth: &AuthContext, owner: &OwnerId) -> Result<()> {
        if auth.can_read(owner) {
            Ok(())
        } else {
            Err(HubError::Authorization)
        }
    }

    fn ensure_write(auth: &AuthContext, owner: &OwnerId) -> Result<()> {
        if auth.can_write(owner) {
            Ok(())
        } else {
            Err(HubError::Authorization)
        }
    }

    fn ensure_create(auth: &AuthContext) -> Result<()> {
        if auth.can_create() {
            Ok(())
        } else {
            Err(HubError::Authorization)
        }
    }

    fn check_payload_size(&self, payload: &Value) -> Result<()> {
        let size = to_canonical_json(payload).len();
        if size > self.max_payload_bytes {
            return Err(HubError::Validation(format!(
                "payload is {} bytes, over the {} byte limit",
                size, self.max_payload_bytes
            )));
        }
        Ok(())
    }

    // ---- integrations ----

    pub async fn create_integration(
        &self,
        auth: &AuthContext,
        new: NewIntegration,
    ) -> Result<Integration> {
        Self::ensure_create(auth)?;
        let integration = self.integrations.register(&auth.user, new)?;
        self.publish_lifecycle(
            "integration.created",
            json!({"id": integration.id.to_string(), "kind": integration.kind.to_string(), "owner": integration.owner.to_string()}),
        )
        .await;
        Ok(integration)
    }

    pub fn get_integration(&self, auth: &AuthContext, id: &IntegrationId) -> Result<Integration> {
        let integration = self.integrations.get(id)?;
        Self::ensure_read(auth, &integration.owner)?;
        Ok(integration)
    }

    pub fn list_integrations(&self, auth: &AuthContext) -> Result<Vec<Integration>> {
        Ok(self
            .integrations
            .list()?
            .into_iter()
            .filter(|i| auth.can_read(&i.owner))
            .collect())
    }

    pub async fn update_integration(
        &self,
        auth: &AuthContext,
        id: &IntegrationId,
        patch: IntegrationPatch,
    ) -> Result<Integration> {
        let current = self.integrations.get(id)?;
        Self::ensure_write(auth, &current.owner)?;
        let updated = self.integrations.update(id, patch)?;
        self.publish_lifecycle(
            "integration.updated",
            json!({"id": updated.id.to_string(), "owner": updated.owner.to_string()}),
        )
        .await;
        Ok(updated)
    }

    pub async fn delete_integration(
        &self,
        auth: &AuthContext,
        id: &IntegrationId,
    ) -> Result<Integration> {
        let current = self.integrations.get(id)?;
        Self::ensure_write(auth, &current.owner)?;
        let removed = self.integrations.remove(id)?;
        self.publish_lifecycle(
            "integration.deleted",
            json!({"id": removed.id.to_string(), "owner": removed.owner.to_string()}),
        )
        .await;
        Ok(removed)
    }

    pub async fn test_integration(
        &self,
        auth: &AuthContext,
        id: &IntegrationId,
    ) -> Result<TestOutcome> {
        let integration = self.integrations.get(id)?;
        Self::ensure_read(auth, &integration.owner)?;
        Ok(self.integrations.test(id).await?)
    }

    pub fn integration_capabilities(
        &self,
        auth: &AuthContext,
        id: &IntegrationId,
    ) -> Result<Capabilities> {
        let integration = self.integrations.get(id)?;
        Self::ensure_read(auth, &integration.owner)?;
        Ok(self.integrations.capabilities(id)?)
    }

    pub async fn execute_integration(
        &self,
        auth: &AuthContext,
        id: &IntegrationId,
        operation: &str,
        params: &Value,
    ) -> Result<Value> {
        let integration = self.integrations.get(id)?;
        Self::ensure_write(auth, &integration.owner)?;
        Ok(self.integrations.execute(id, operation, params).await?)
    }

    // ---- webhooks ----

    pub async fn create_webhook(&self, auth: &AuthContext, new: NewWebhook) -> Result<Webhook> {
        Self::ensure_create(auth)?;
        let webhook = self.webhooks.register(&auth.user, new)?;
        self.publish_lifecycle(
            "webhook.created",
            json!({"id": webhook.id.to_string(), "owner": webhook.owner.to_string()}),
        )
        .await;
        Ok(webhook)
    }

    pub fn get_webhook(&self, auth: &AuthContext, id: &WebhookId) -> Result<Webhook> {
        let webhook = self.webhooks.get(id)?;
        Self::ensure_read(auth, &webhook.owner)?;
        Ok(webhook)
    }

    pub fn list_webhooks(&self, auth: &AuthContext) -> Result<Vec<Webhook>> {
        Ok(self
            .webhooks
            .list()?
            .into_iter()
            .filter(|w| auth.can_read(&w.owner))
            .collect())
    }

    pub async fn update_webhook(
        &self,
        auth: &AuthContext,
        id: &WebhookId,
        patch: WebhookPatch,
    ) -> Result<Webhook> {
        let current = self.webhooks.get(id)?;
        Self::ensure_write(auth, &current.owner)?;
        let updated = self.webhooks.update(id, patch)?;
        self.publish_lifecycle(
            "webhook.updated",
            json!({"id": updated.id.to_string(), "owner": updated.owner.to_string()}),
        )
        .await;
        Ok(updated)
    }

    pub async fn delete_webhook(&self, auth: &AuthContext, id: &WebhookId) -> Result<Webhook> {
        let current = self.webhooks.get(id)?;
        Self::ensure_write(auth, &current.owner)?;
        let removed = self.webhooks.remove(id)?;
        self.publish_lifecycle(
            "webhook.deleted",
            json!({"id": removed.id.to_string(), "owner": removed.owner.to_string()}),
        )
        .await;
        Ok(removed)
    }

    /// Synchronously enqueues a delivery of an ad-hoc payload to one
    /// webhook, outside the event fan-out path.
    pub fn deliver(
        &self,
        auth: &AuthContext,
        id: &WebhookId,
        event_kind: Option<String>,
        payload: Value,
    ) -> Result<WebhookDelivery> {
        let webhook = self.webhooks.get(id)?;
        Self::ensure_write(auth, &webhook.owner)?;
        self.check_payload_size(&payload)?;

        let event = Event::new(
            event_kind.unwrap_or_else(|| "manual.delivery".to_string()),
            "hub.manual",
            payload,
        );
        Ok(self.webhooks.enqueue(&webhook, &event)?)
    }

    pub fn delivery_history(
        &self,
        auth: &AuthContext,
        id: &WebhookId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>> {
        let webhook = self.webhooks.get(id)?;
        Self::ensure_read(auth, &webhook.owner)?;
        Ok(self.webhooks.delivery_history(id, offset, limit)?)
    }

    pub fn cancel_delivery(
        &self,
        auth: &AuthContext,
        id: &DeliveryId,
    ) -> Result<WebhookDelivery> {
        let delivery = self.webhooks.delivery(id)?;
        let webhook = self.webhooks.get(&delivery.webhook_id)?;
        Self::ensure_write(auth, &webhook.owner)?;
        Ok(self.webhooks.cancel_delivery(id)?)
    }

    // ---- notifications ----

    pub async fn create_template(
        &self,
        auth: &AuthContext,
        new: NewTemplate,
    ) -> Result<NotificationTemplate> {
        Self::ensure_create(auth)?;
        let template = self.notifications.create_template(&auth.user, new)?;
        self.publish_lifecycle(
            "template.created",
            json!({"id": template.id.to_string(), "owner": template.owner.to_string()}),
        )
        .await;
        Ok(template)
    }

    pub fn get_template(&self, auth: &AuthContext, id: &TemplateId) -> Result<NotificationTemplate> {
        let template = self.notifications.get_template(id)?;
        Self::ensure_read(auth, &template.owner)?;
        Ok(template)
    }

    pub fn list_templates(&self, auth: &AuthContext) -> Result<Vec<NotificationTemplate>> {
        Ok(self
            .notifications
            .list_templates()?
            .into_iter()
            .filter(|t| auth.can_read(&t.owner))
            .collect())
    }

    pub async fn delete_template(
        &self,
        auth: &AuthContext,
        id: &TemplateId,
    ) -> Result<NotificationTemplate> {
        let template = self.notifications.get_template(id)?;
        Self::ensure_write(auth, &template.owner)?;
        let removed = self.notifications.delete_template(id)?;
        self.publish_lifecycle(
            "template.deleted",
            json!({"id": removed.id.to_string(), "owner": removed.owner.to_string()}),
        )
        .await;
        Ok(removed)
    }

    /// Enqueues a notification; the completion event (`notification.sent`
    /// and friends) is published by the engine once recipients resolve.
    pub fn send_notification(
        &self,
        auth: &AuthContext,
        req: SendNotification,
    ) -> Result<NotificationDelivery> {
        Self::ensure_create(auth)?;
        let template = self.notifications.get_template(&req.template_id)?;
        Self::ensure_read(auth, &template.owner)?;
        Ok(self.notifications.send(&auth.user, req)?)
    }

    pub fn get_notification(
        &self,
        auth: &AuthContext,
        id: &NotificationId,
    ) -> Result<NotificationDelivery> {
        let delivery = self.notifications.get(id)?;
        Self::ensure_read(auth, &delivery.owner)?;
        Ok(delivery)
    }

    pub fn cancel_notification(
        &self,
        auth: &AuthContext,
        id: &NotificationId,
    ) -> Result<NotificationDelivery> {
        let delivery = self.notifications.get(id)?;
        Self::ensure_write(auth, &delivery.owner)?;
        Ok(self.notifications.cancel(id)?)
    }

    // ---- events ----

    pub async fn subscribe(
        &self,
        auth: &AuthContext,
        new: NewSubscription,
    ) -> Result<Subscription> {
        Self::ensure_create(auth)?;
        let subscription = self.broker.subscribe(&auth.user, new)?;
        self.publish_lifecycle(
            "subscription.created",
            json!({"id": subscription.id.to_string(), "pattern": subscription.pattern, "owner": subscription.owner.to_string()}),
        )
        .await;
        Ok(subscription)
    }

    pub async fn unsubscribe(
        &self,
        auth: &AuthContext,
        id: &SubscriptionId,
    ) -> Result<Subscription> {
        let subscription = self.broker.get_subscription(id)?;
        Self::ensure_write(auth, &subscription.owner)?;
        let removed = self.broker.unsubscribe(id)?;
        self.publish_lifecycle(
            "subscription.deleted",
            json!({"id": removed.id.to_string(), "owner": removed.owner.to_string()}),
        )
        .await;
        Ok(removed)
    }

    pub fn list_subscriptions(&self, auth: &AuthContext) -> Result<Vec<Subscription>> {
        Ok(self
            .broker
            .list_subscriptions()?
            .into_iter()
            .filter(|s| auth.can_read(&s.owner))
            .collect())
    }

    /// Best-effort publish into the broker. The outcome reports how the
    /// fan-out went; it never fails on delivery problems.
    pub async fn publish_event(
        &self,
        auth: &AuthContext,
        id: Option<EventId>,
        kind: String,
        source: Option<String>,
        payload: Value,
        correlation_id: Option<String>,
    ) -> Result<PublishOutcome> {
        Self::ensure_create(auth)?;
        if kind.trim().is_empty() {
            return Err(HubError::Validation("event type must not be empty".into()));
        }
        self.check_payload_size(&payload)?;

        let mut event = Event::new(
            kind,
            source.unwrap_or_else(|| format!("user:{}", auth.user)),
            payload,
        );
        if let Some(id) = id {
            event = event.with_id(id);
        }
        if let Some(correlation_id) = correlation_id {
            event = event.with_correlation_id(correlation_id);
        }

        Ok(self.broker.publish(event).await)
    }

    pub fn events_in_range(
        &self,
        auth: &AuthContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        Self::ensure_create(auth)?;
        Ok(self.stores.events_in_range(start, end)?)
    }

    // ---- reports ----

    pub async fn create_report_template(
        &self,
        auth: &AuthContext,
        new: NewReportTemplate,
    ) -> Result<ReportTemplate> {
        Self::ensure_create(auth)?;
        let template = self.reports.create_report_template(&auth.user, new)?;
        self.publish_lifecycle(
            "report_template.created",
            json!({"id": template.id.to_string(), "owner": template.owner.to_string()}),
        )
        .await;
        Ok(template)
    }

    pub fn get_report_template(
        &self,
        auth: &AuthContext,
        id: &ReportTemplateId,
    ) -> Result<ReportTemplate> {
        let template = self.reports.get_report_template(id)?;
        Self::ensure_read(auth, &template.owner)?;
        Ok(template)
    }

    pub async fn delete_report_template(
        &self,
        auth: &AuthContext,
        id: &ReportTemplateId,
    ) -> Result<ReportTemplate> {
        let template = self.reports.get_report_template(id)?;
        Self::ensure_write(auth, &template.owner)?;
        let removed = self.reports.delete_report_template(id)?;
        self.publish_lifecycle(
            "report_template.deleted",
            json!({"id": removed.id.to_string(), "owner": removed.owner.to_string()}),
        )
        .await;
        Ok(removed)
    }

    pub async fn create_report(&self, auth: &AuthContext, new: NewReport) -> Result<Report> {
        Self::ensure_create(auth)?;
        let template = self.reports.get_report_template(&new.template_id)?;
        Self::ensure_read(auth, &template.owner)?;
        let report = self.reports.create_report(&auth.user, new)?;
        self.publish_lifecycle(
            "report.created",
            json!({"id": report.id.to_string(), "owner": report.owner.to_string()}),
        )
        .await;
        Ok(report)
    }

    pub fn get_report(&self, auth: &AuthContext, id: &ReportId) -> Result<Report> {
        let report = self.reports.get_report(id)?;
        Self::ensure_read(auth, &report.owner)?;
        Ok(report)
    }

    pub fn list_reports(&self, auth: &AuthContext) -> Result<Vec<Report>> {
        Ok(self
            .reports
            .list_reports()?
            .into_iter()
            .filter(|r| auth.can_read(&r.owner))
            .collect())
    }

    pub async fn update_report(
        &self,
        auth: &AuthContext,
        id: &ReportId,
        patch: ReportPatch,
    ) -> Result<Report> {
        let current = self.reports.get_report(id)?;
        Self::ensure_write(auth, &current.owner)?;
        let updated = self.reports.update_report(id, patch)?;
        self.publish_lifecycle(
            "report.updated",
            json!({"id": updated.id.to_string(), "owner": updated.owner.to_string()}),
        )
        .await;
        Ok(updated)
    }

    pub async fn delete_report(&self, auth: &AuthContext, id: &ReportId) -> Result<Report> {
        let current = self.reports.get_report(id)?;
        Self::ensure_write(auth, &current.owner)?;
        let removed = self.reports.delete_report(id)?;
        self.publish_lifecycle(
            "report.deleted",
            json!({"id": removed.id.to_string(), "owner": removed.owner.to_string()}),
        )
        .await;
        Ok(removed)
    }

    /// Manual run outside the schedule; `report.completed` /
    /// `report.failed` arrives from the scheduler when the run settles.
    pub fn run_report(
        &self,
        auth: &AuthContext,
        ctx: &AppContext,
        id: &ReportId,
    ) -> Result<Option<ExecutionId>> {
        let report = self.reports.get_report(id)?;
        Self::ensure_write(auth, &report.owner)?;
        Ok(self.reports.run_now(ctx, id)?)
    }

    pub fn report_executions(
        &self,
        auth: &AuthContext,
        id: &ReportId,
    ) -> Result<Vec<ReportExecution>> {
        let report = self.reports.get_report(id)?;
        Self::ensure_read(auth, &report.owner)?;
        Ok(self.reports.executions(id)?)
    }

    pub fn cancel_execution(
        &self,
        auth: &AuthContext,
        id: &ExecutionId,
    ) -> Result<ReportExecution> {
        let execution = self.reports.get_execution(id)?;
        let report = self.reports.get_report(&execution.report_id)?;
        Self::ensure_write(auth, &report.owner)?;
        Ok(self.reports.cancel_execution(id)?)
    }

    // ---- operational ----

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let uptime_secs = self.started_at.elapsed().as_secs();

        let build = || async {
            Ok(MetricsSnapshot {
                uptime_secs,
                integrations: self.integrations.list().map(|i| i.len()).unwrap_or(0),
                connector_instances: self.integrations.instance_count(),
                pending_webhook_deliveries: self.webhooks.pending_count(),
                notification_queue_depth: self.notifications.queue_depth(),
                scheduled_reports: self.reports.scheduled_count(),
                reports_in_flight: self.reports.in_flight_count(),
                active_subscriptions: self
                    .broker
                    .list_subscriptions()
                    .map(|s| s.len())
                    .unwrap_or(0),
            })
        };

        // short-lived cache so a scrape storm doesn't hammer the stores
        match self
            .cache
            .get_or_build(
                CacheClass::Metrics,
                "snapshot",
                Some(Duration::from_secs(5)),
                build,
            )
            .await
        {
            Ok(snapshot) => snapshot,
            Err(_) => MetricsSnapshot {
                uptime_secs,
                integrations: 0,
                connector_instances: 0,
                pending_webhook_deliveries: 0,
                notification_queue_depth: 0,
                scheduled_reports: 0,
                reports_in_flight: 0,
                active_subscriptions: 0,
            },
        }
    }
}
