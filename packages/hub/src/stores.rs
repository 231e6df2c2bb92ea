use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::instrument;
use utils::storage::db::{handles, DBError, HubDb};
use vertex_types::{
    DeliveryId, DeliveryStatus, Event, EventId, ExecutionId, ExecutionStatus, Integration,
    IntegrationId, NotificationDelivery, NotificationId, NotificationTemplate, OwnerId, Report,
    ReportExecution, ReportId, ReportTemplate, ReportTemplateId, Subscription, SubscriptionId,
    TemplateId, Webhook, WebhookDelivery, WebhookId,
};

type Result<T> = std::result::Result<T, StoreError>;

/// Typed repository layer over [`HubDb`]. Each subsystem goes through
/// these methods rather than touching tables directly, which keeps the
/// entity invariants (terminal-state immutability, time-ordered listings)
/// in one place.
#[derive(Clone)]
pub struct Stores {
    db: HubDb,
}

impl Stores {
    pub fn new(db: HubDb) -> Self {
        Self { db }
    }

    // ---- integrations ----

    pub fn try_get_integration(&self, id: &IntegrationId) -> Result<Option<Integration>> {
        Ok(self.db.get(&handles::INTEGRATIONS, id)?)
    }

    #[instrument(skip(self), fields(subsys = "Stores"))]
    pub fn get_integration(&self, id: &IntegrationId) -> Result<Integration> {
        self.try_get_integration(id)?
            .ok_or(StoreError::UnknownIntegration(*id))
    }

    pub fn save_integration(&self, integration: &Integration) -> Result<()> {
        Ok(self
            .db
            .set(&handles::INTEGRATIONS, integration.id, integration.clone())?)
    }

    pub fn update_integration<F>(&self, id: &IntegrationId, f: F) -> Result<Integration>
    where
        F: FnOnce(&mut Integration),
    {
        self.db
            .update(&handles::INTEGRATIONS, id, |integration| {
                f(integration);
                integration.updated_at = Utc::now();
            })?
            .ok_or(StoreError::UnknownIntegration(*id))
    }

    pub fn remove_integration(&self, id: &IntegrationId) -> Result<Integration> {
        self.db
            .remove(&handles::INTEGRATIONS, id)?
            .ok_or(StoreError::UnknownIntegration(*id))
    }

    pub fn list_integrations(&self) -> Result<Vec<Integration>> {
        let mut integrations = self
            .db
            .scan(&handles::INTEGRATIONS, |_, i| Some(i.clone()))?;
        integrations.sort_by_key(|i| i.id);
        Ok(integrations)
    }

    pub fn find_integration_by_name(
        &self,
        owner: &OwnerId,
        name: &str,
    ) -> Result<Option<Integration>> {
        Ok(self.db.find(&handles::INTEGRATIONS, |_, i| {
            i.owner == *owner && i.name == name
        })?)
    }

    // ---- webhooks ----

    pub fn try_get_webhook(&self, id: &WebhookId) -> Result<Option<Webhook>> {
        Ok(self.db.get(&handles::WEBHOOKS, id)?)
    }

    #[instrument(skip(self), fields(subsys = "Stores"))]
    pub fn get_webhook(&self, id: &WebhookId) -> Result<Webhook> {
        self.try_get_webhook(id)?
            .ok_or(StoreError::UnknownWebhook(*id))
    }

    pub fn save_webhook(&self, webhook: &Webhook) -> Result<()> {
        Ok(self.db.set(&handles::WEBHOOKS, webhook.id, webhook.clone())?)
    }

    pub fn update_webhook<F>(&self, id: &WebhookId, f: F) -> Result<Webhook>
    where
        F: FnOnce(&mut Webhook),
    {
        self.db
            .update(&handles::WEBHOOKS, id, |webhook| {
                f(webhook);
                webhook.updated_at = Utc::now();
            })?
            .ok_or(StoreError::UnknownWebhook(*id))
    }

    pub fn remove_webhook(&self, id: &WebhookId) -> Result<Webhook> {
        self.db
            .remove(&handles::WEBHOOKS, id)?
            .ok_or(StoreError::UnknownWebhook(*id))
    }

    pub fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        let mut webhooks = self.db.scan(&handles::WEBHOOKS, |_, w| Some(w.clone()))?;
        webhooks.sort_by_key(|w| w.id);
        Ok(webhooks)
    }

    pub fn find_webhook_by_name(&self, owner: &OwnerId, name: &str) -> Result<Option<Webhook>> {
        Ok(self.db.find(&handles::WEBHOOKS, |_, w| {
            w.owner == *owner && w.name == name
        })?)
    }

    // ---- webhook deliveries ----

    pub fn get_delivery(&self, id: &DeliveryId) -> Result<WebhookDelivery> {
        self.db
            .get(&handles::WEBHOOK_DELIVERIES, id)?
            .ok_or(StoreError::UnknownDelivery(*id))
    }

    pub fn save_delivery(&self, delivery: &WebhookDelivery) -> Result<()> {
        Ok(self
            .db
            .set(&handles::WEBHOOK_DELIVERIES, delivery.id, delivery.clone())?)
    }

    /// Mutates a delivery in place, refusing to touch terminal records.
    /// The closure runs under the entry lock.
    pub fn update_delivery<F>(&self, id: &DeliveryId, f: F) -> Result<WebhookDelivery>
    where
        F: FnOnce(&mut WebhookDelivery),
    {
        let mut was_terminal = false;
        let updated = self
            .db
            .update(&handles::WEBHOOK_DELIVERIES, id, |delivery| {
                if delivery.status.is_terminal() {
                    was_terminal = true;
                    return;
                }
                f(delivery);
                delivery.updated_at = Utc::now();
            })?
            .ok_or(StoreError::UnknownDelivery(*id))?;

        if was_terminal {
            return Err(StoreError::TerminalDelivery(*id, updated.status));
        }
        Ok(updated)
    }

    /// Pending deliveries whose `next_attempt_at` has passed, oldest
    /// first. Workers drain this in order.
    pub fn due_deliveries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<WebhookDelivery>> {
        let mut due = self.db.scan(&handles::WEBHOOK_DELIVERIES, |_, d| {
            (d.status == DeliveryStatus::Pending && d.next_attempt_at <= now).then(|| d.clone())
        })?;
        due.sort_by_key(|d| (d.next_attempt_at, d.id));
        due.truncate(limit);
        Ok(due)
    }

    /// Delivery history for one webhook, newest first.
    pub fn deliveries_for_webhook(
        &self,
        webhook_id: &WebhookId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>> {
        let mut deliveries = self.db.scan(&handles::WEBHOOK_DELIVERIES, |_, d| {
            (d.webhook_id == *webhook_id).then(|| d.clone())
        })?;
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deliveries.into_iter().skip(offset).take(limit).collect())
    }

    // ---- notification templates ----

    pub fn get_template(&self, id: &TemplateId) -> Result<NotificationTemplate> {
        self.db
            .get(&handles::NOTIFICATION_TEMPLATES, id)?
            .ok_or(StoreError::UnknownTemplate(*id))
    }

    pub fn save_template(&self, template: &NotificationTemplate) -> Result<()> {
        Ok(self
            .db
            .set(&handles::NOTIFICATION_TEMPLATES, template.id, template.clone())?)
    }

    pub fn remove_template(&self, id: &TemplateId) -> Result<NotificationTemplate> {
        self.db
            .remove(&handles::NOTIFICATION_TEMPLATES, id)?
            .ok_or(StoreError::UnknownTemplate(*id))
    }

    pub fn list_templates(&self) -> Result<Vec<NotificationTemplate>> {
        let mut templates = self
            .db
            .scan(&handles::NOTIFICATION_TEMPLATES, |_, t| Some(t.clone()))?;
        templates.sort_by_key(|t| t.id);
        Ok(templates)
    }

    pub fn find_template_by_name(
        &self,
        owner: &OwnerId,
        name: &str,
    ) -> Result<Option<NotificationTemplate>> {
        Ok(self.db.find(&handles::NOTIFICATION_TEMPLATES, |_, t| {
            t.owner == *owner && t.name == name
        })?)
    }

    // ---- notification deliveries ----

    pub fn get_notification(&self, id: &NotificationId) -> Result<NotificationDelivery> {
        self.db
            .get(&handles::NOTIFICATION_DELIVERIES, id)?
            .ok_or(StoreError::UnknownNotification(*id))
    }

    pub fn save_notification(&self, delivery: &NotificationDelivery) -> Result<()> {
        Ok(self.db.set(
            &handles::NOTIFICATION_DELIVERIES,
            delivery.id,
            delivery.clone(),
        )?)
    }

    pub fn update_notification<F>(&self, id: &NotificationId, f: F) -> Result<NotificationDelivery>
    where
        F: FnOnce(&mut NotificationDelivery),
    {
        self.db
            .update(&handles::NOTIFICATION_DELIVERIES, id, |delivery| {
                f(delivery);
                delivery.updated_at = Utc::now();
            })?
            .ok_or(StoreError::UnknownNotification(*id))
    }

    // ---- subscriptions ----

    pub fn get_subscription(&self, id: &SubscriptionId) -> Result<Subscription> {
        self.db
            .get(&handles::SUBSCRIPTIONS, id)?
            .ok_or(StoreError::UnknownSubscription(*id))
    }

    pub fn save_subscription(&self, subscription: &Subscription) -> Result<()> {
        Ok(self
            .db
            .set(&handles::SUBSCRIPTIONS, subscription.id, subscription.clone())?)
    }

    pub fn remove_subscription(&self, id: &SubscriptionId) -> Result<Subscription> {
        self.db
            .remove(&handles::SUBSCRIPTIONS, id)?
            .ok_or(StoreError::UnknownSubscription(*id))
    }

    pub fn active_subscriptions(&self) -> Result<Vec<Subscription>> {
        let mut subscriptions = self
            .db
            .scan(&handles::SUBSCRIPTIONS, |_, s| s.active.then(|| s.clone()))?;
        subscriptions.sort_by_key(|s| s.id);
        Ok(subscriptions)
    }

    // ---- events ----

    pub fn save_event(&self, event: &Event) -> Result<()> {
        Ok(self
            .db
            .set(&handles::EVENTS, event.id.clone(), event.clone())?)
    }

    pub fn try_get_event(&self, id: &EventId) -> Result<Option<Event>> {
        Ok(self.db.get(&handles::EVENTS, id)?)
    }

    pub fn events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let mut events = self.db.scan(&handles::EVENTS, |_, e| {
            (e.timestamp >= start && e.timestamp <= end).then(|| e.clone())
        })?;
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    // ---- reports ----

    pub fn try_get_report(&self, id: &ReportId) -> Result<Option<Report>> {
        Ok(self.db.get(&handles::REPORTS, id)?)
    }

    #[instrument(skip(self), fields(subsys = "Stores"))]
    pub fn get_report(&self, id: &ReportId) -> Result<Report> {
        self.try_get_report(id)?
            .ok_or(StoreError::UnknownReport(*id))
    }

    pub fn save_report(&self, report: &Report) -> Result<()> {
        Ok(self.db.set(&handles::REPORTS, report.id, report.clone())?)
    }

    pub fn update_report<F>(&self, id: &ReportId, f: F) -> Result<Report>
    where
        F: FnOnce(&mut Report),
    {
        self.db
            .update(&handles::REPORTS, id, |report| {
                f(report);
                report.updated_at = Utc::now();
            })?
            .ok_or(StoreError::UnknownReport(*id))
    }

    pub fn remove_report(&self, id: &ReportId) -> Result<Report> {
        self.db
            .remove(&handles::REPORTS, id)?
            .ok_or(StoreError::UnknownReport(*id))
    }

    pub fn list_reports(&self) -> Result<Vec<Report>> {
        let mut reports = self.db.scan(&handles::REPORTS, |_, r| Some(r.clone()))?;
        reports.sort_by_key(|r| r.id);
        Ok(reports)
    }

    // ---- report templates ----

    pub fn get_report_template(&self, id: &ReportTemplateId) -> Result<ReportTemplate> {
        self.db
            .get(&handles::REPORT_TEMPLATES, id)?
            .ok_or(StoreError::UnknownReportTemplate(*id))
    }

    pub fn save_report_template(&self, template: &ReportTemplate) -> Result<()> {
        Ok(self
            .db
            .set(&handles::REPORT_TEMPLATES, template.id, template.clone())?)
    }

    pub fn remove_report_template(&self, id: &ReportTemplateId) -> Result<ReportTemplate> {
        self.db
            .remove(&handles::REPORT_TEMPLATES, id)?
            .ok_or(StoreError::UnknownReportTemplate(*id))
    }

    // ---- report executions ----

    pub fn get_execution(&self, id: &ExecutionId) -> Result<ReportExecution> {
        self.db
            .get(&handles::REPORT_EXECUTIONS, id)?
            .ok_or(StoreError::UnknownExecution(*id))
    }

    pub fn save_execution(&self, execution: &ReportExecution) -> Result<()> {
        Ok(self
            .db
            .set(&handles::REPORT_EXECUTIONS, execution.id, execution.clone())?)
    }

    /// Terminal executions are immutable; like deliveries, transitions
    /// run under the entry lock.
    pub fn update_execution<F>(&self, id: &ExecutionId, f: F) -> Result<ReportExecution>
    where
        F: FnOnce(&mut ReportExecution),
    {
        let mut was_terminal = false;
        let updated = self
            .db
            .update(&handles::REPORT_EXECUTIONS, id, |execution| {
                if execution.status.is_terminal() {
                    was_terminal = true;
                    return;
                }
                f(execution);
            })?
            .ok_or(StoreError::UnknownExecution(*id))?;

        if was_terminal {
            return Err(StoreError::TerminalExecution(*id, updated.status));
        }
        Ok(updated)
    }

    pub fn executions_for_report(&self, report_id: &ReportId) -> Result<Vec<ReportExecution>> {
        let mut executions = self.db.scan(&handles::REPORT_EXECUTIONS, |_, e| {
            (e.report_id == *report_id).then(|| e.clone())
        })?;
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(executions)
    }

    pub fn running_executions(&self) -> Result<Vec<ReportExecution>> {
        Ok(self.db.scan(&handles::REPORT_EXECUTIONS, |_, e| {
            (e.status == ExecutionStatus::Running).then(|| e.clone())
        })?)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unknown Integration {0}")]
    UnknownIntegration(IntegrationId),

    #[error("Unknown Webhook {0}")]
    UnknownWebhook(WebhookId),

    #[error("Unknown Delivery {0}")]
    UnknownDelivery(DeliveryId),

    #[error("Delivery {0} is already terminal ({1:?})")]
    TerminalDelivery(DeliveryId, DeliveryStatus),

    #[error("Unknown NotificationTemplate {0}")]
    UnknownTemplate(TemplateId),

    #[error("Unknown NotificationDelivery {0}")]
    UnknownNotification(NotificationId),

    #[error("Unknown Subscription {0}")]
    UnknownSubscription(SubscriptionId),

    #[error("Unknown Report {0}")]
    UnknownReport(ReportId),

    #[error("Unknown ReportTemplate {0}")]
    UnknownReportTemplate(ReportTemplateId),

    #[error("Unknown ReportExecution {0}")]
    UnknownExecution(ExecutionId),

    #[error("Execution {0} is already terminal ({1:?})")]
    TerminalExecution(ExecutionId, ExecutionStatus),

    #[error("Database error: {0}")]
    DBError(#[from] DBError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use utils::storage::db::HubDb;
    use vertex_types::EventId;

    fn stores() -> Stores {
        Stores::new(HubDb::new())
    }

    fn sample_webhook(owner: &str, name: &str) -> Webhook {
        let now = Utc::now();
        Webhook {
            id: WebhookId::generate(),
            owner: OwnerId::new(owner).unwrap(),
            name: name.to_string(),
            url: "http://sink.example/hook".to_string(),
            events: vec!["foo.*".to_string()],
            secret: Some("s".to_string()),
            active: true,
            retry: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn webhook_name_lookup_is_owner_scoped() {
        let stores = stores();
        let hook = sample_webhook("alice", "ci-events");
        stores.save_webhook(&hook).unwrap();

        let alice = OwnerId::new("alice").unwrap();
        let bob = OwnerId::new("bob").unwrap();
        assert!(stores.find_webhook_by_name(&alice, "ci-events").unwrap().is_some());
        assert!(stores.find_webhook_by_name(&bob, "ci-events").unwrap().is_none());
    }

    #[test]
    fn due_deliveries_ordering_and_filtering() {
        let stores = stores();
        let hook = sample_webhook("alice", "hook");
        stores.save_webhook(&hook).unwrap();

        let now = Utc::now();
        let mut early = WebhookDelivery::new(
            hook.id,
            EventId::new("e1").unwrap(),
            "foo.bar".to_string(),
            json!({"x": 1}),
        );
        early.next_attempt_at = now - chrono::Duration::seconds(10);

        let mut late = WebhookDelivery::new(
            hook.id,
            EventId::new("e2").unwrap(),
            "foo.bar".to_string(),
            json!({"x": 2}),
        );
        late.next_attempt_at = now - chrono::Duration::seconds(5);

        let mut future = WebhookDelivery::new(
            hook.id,
            EventId::new("e3").unwrap(),
            "foo.bar".to_string(),
            json!({"x": 3}),
        );
        future.next_attempt_at = now + chrono::Duration::seconds(60);

        let mut done = WebhookDelivery::new(
            hook.id,
            EventId::new("e4").unwrap(),
            "foo.bar".to_string(),
            json!({"x": 4}),
        );
        done.status = DeliveryStatus::Delivered;

        for d in [&early, &late, &future, &done] {
            stores.save_delivery(d).unwrap();
        }

        let due = stores.due_deliveries(now, 10).unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, early.id);
        assert_eq!(due[1].id, late.id);
    }

    #[test]
    fn terminal_deliveries_are_immutable() {
        let stores = stores();
        let hook = sample_webhook("alice", "hook");
        let mut delivery = WebhookDelivery::new(
            hook.id,
            EventId::new("e1").unwrap(),
            "foo.bar".to_string(),
            json!({}),
        );
        delivery.status = DeliveryStatus::Delivered;
        stores.save_delivery(&delivery).unwrap();

        let result = stores.update_delivery(&delivery.id, |d| {
            d.status = DeliveryStatus::Pending;
        });
        assert!(matches!(result, Err(StoreError::TerminalDelivery(..))));

        // untouched
        let stored = stores.get_delivery(&delivery.id).unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
    }

    #[test]
    fn events_in_range() {
        let stores = stores();
        let now = Utc::now();

        let mut old = Event::new("a.b", "test", json!({}));
        old.timestamp = now - chrono::Duration::hours(2);
        let recent = Event::new("a.c", "test", json!({}));

        stores.save_event(&old).unwrap();
        stores.save_event(&recent).unwrap();

        let found = stores
            .events_in_range(now - chrono::Duration::hours(1), now + chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, recent.id);
    }

    #[test]
    fn terminal_executions_are_immutable() {
        let stores = stores();
        let mut execution = ReportExecution::start(ReportId::generate());
        execution.status = ExecutionStatus::Completed;
        stores.save_execution(&execution).unwrap();

        let result = stores.update_execution(&execution.id, |e| {
            e.status = ExecutionStatus::Running;
        });
        assert!(matches!(result, Err(StoreError::TerminalExecution(..))));
    }
}
