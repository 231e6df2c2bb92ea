pub mod channels;
pub mod error;
pub mod template;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, BTreeMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use error::{NotificationError, RenderError};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;
use utils::context::AppContext;
use utils::telemetry::NotificationMetrics;
use utoipa::ToSchema;
use vertex_types::{
    Channel, Event, NotificationDelivery, NotificationId, NotificationStatus,
    NotificationTemplate, OwnerId, Priority, RecipientStatus, RetryPolicy, TemplateId,
};

use crate::config::Config;
use crate::stores::Stores;
use crate::subsystems::events::EventBroker;
use crate::subsystems::webhooks::backoff;
use channels::ChannelTransports;

#[derive(Deserialize, Clone, Debug, ToSchema)]
pub struct NewTemplate {
    pub name: String,
    pub channel: Channel,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Deserialize, Clone, Debug, ToSchema)]
pub struct SendNotification {
    pub template_id: TemplateId,
    pub recipients: Vec<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Clone, PartialEq, Eq)]
struct QueueItem {
    priority: Priority,
    scheduled_at: DateTime<Utc>,
    id: NotificationId,
}

// max-heap: highest priority first, then earliest scheduled_at
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.scheduled_at.cmp(&self.scheduled_at))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum PopOutcome {
    Ready(NotificationId),
    WaitUntil(DateTime<Utc>),
    Empty,
}

/// Renders templates and dispatches them through channel transports,
/// tracking per-recipient outcomes. Deliveries wait in a priority queue
/// ordered `(priority DESC, scheduled_at ASC)`; failed recipients retry
/// with the shared backoff model up to the channel cap.
#[derive(Clone)]
pub struct NotificationManager {
    stores: Stores,
    broker: Arc<EventBroker>,
    queue: Arc<Mutex<BinaryHeap<QueueItem>>>,
    wakeup: Arc<tokio::sync::Notify>,
    transports: Arc<ChannelTransports>,
    retry: RetryPolicy,
    workers: usize,
    metrics: NotificationMetrics,
}

impl NotificationManager {
    pub fn new(
        config: &Config,
        stores: Stores,
        broker: Arc<EventBroker>,
        metrics: NotificationMetrics,
    ) -> Self {
        Self {
            stores,
            broker,
            queue: Arc::new(Mutex::new(BinaryHeap::new())),
            wakeup: Arc::new(tokio::sync::Notify::new()),
            transports: Arc::new(ChannelTransports::from_config(config)),
            retry: RetryPolicy {
                base_delay_ms: config.notifications.retry_base_delay_ms,
                max_delay_ms: config.notifications.retry_max_delay_ms,
                max_attempts: config.notifications.max_attempts,
                jitter: 0.2,
            },
            workers: config.notifications.workers.max(1),
            metrics,
        }
    }

    #[instrument(skip(self, ctx), fields(subsys = "Notifications"))]
    pub fn start(&self, ctx: AppContext) {
        for worker_id in 0..self.workers {
            let _self = self.clone();
            let mut kill_receiver = ctx.get_kill_receiver();

            ctx.rt.spawn(async move {
                loop {
                    let wait = match _self.pop_ready() {
                        PopOutcome::Ready(id) => {
                            _self.process(id).await;
                            continue;
                        }
                        PopOutcome::WaitUntil(at) => (at - Utc::now())
                            .to_std()
                            .unwrap_or(Duration::ZERO)
                            .min(Duration::from_millis(200)),
                        PopOutcome::Empty => Duration::from_millis(200),
                    };

                    tokio::select! {
                        _ = kill_receiver.recv() => {
                            tracing::debug!("Notification worker {} shutting down", worker_id);
                            break;
                        }
                        _ = _self.wakeup.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            });
        }
    }

    fn pop_ready(&self) -> PopOutcome {
        let mut queue = self.queue.lock().unwrap();
        match queue.peek() {
            Some(item) if item.scheduled_at <= Utc::now() => {
                let item = queue.pop().unwrap();
                self.metrics.queue_depth.record(queue.len() as i64, &[]);
                PopOutcome::Ready(item.id)
            }
            Some(item) => PopOutcome::WaitUntil(item.scheduled_at),
            None => PopOutcome::Empty,
        }
    }

    fn push(&self, id: NotificationId, priority: Priority, scheduled_at: DateTime<Utc>) {
        let mut queue = self.queue.lock().unwrap();
        queue.push(QueueItem {
            priority,
            scheduled_at,
            id,
        });
        self.metrics.queue_depth.record(queue.len() as i64, &[]);
        drop(queue);
        self.wakeup.notify_one();
    }

    // ---- templates ----

    #[instrument(skip(self, new), fields(subsys = "Notifications"))]
    pub fn create_template(
        &self,
        owner: &OwnerId,
        new: NewTemplate,
    ) -> Result<NotificationTemplate, NotificationError> {
        if new.name.trim().is_empty() {
            return Err(NotificationError::Validation("name must not be empty".into()));
        }
        if self.stores.find_template_by_name(owner, &new.name)?.is_some() {
            return Err(NotificationError::Conflict { name: new.name });
        }

        // reject syntactically broken templates up front, and required
        // params that no placeholder would ever consume
        let mut declared = template::placeholders(&new.body)?;
        if let Some(subject) = &new.subject {
            declared.extend(template::placeholders(subject)?);
        }
        for required in &new.required_params {
            if !declared.contains(required) {
                return Err(NotificationError::Validation(format!(
                    "required param {} does not appear in the template",
                    required
                )));
            }
        }

        let now = Utc::now();
        let template = NotificationTemplate {
            id: TemplateId::generate(),
            owner: owner.clone(),
            name: new.name,
            channel: new.channel,
            subject: new.subject,
            body: new.body,
            required_params: new.required_params,
            category: new.category,
            created_at: now,
            updated_at: now,
        };
        self.stores.save_template(&template)?;
        Ok(template)
    }

    pub fn get_template(&self, id: &TemplateId) -> Result<NotificationTemplate, NotificationError> {
        Ok(self.stores.get_template(id)?)
    }

    pub fn list_templates(&self) -> Result<Vec<NotificationTemplate>, NotificationError> {
        Ok(self.stores.list_templates()?)
    }

    #[instrument(skip(self), fields(subsys = "Notifications"))]
    pub fn delete_template(&self, id: &TemplateId) -> Result<NotificationTemplate, NotificationError> {
        Ok(self.stores.remove_template(id)?)
    }

    // ---- deliveries ----

    /// Validates and enqueues a delivery. Rendering errors (missing
    /// required params) surface here, before anything is queued.
    #[instrument(skip(self, req), fields(subsys = "Notifications"))]
    pub fn send(
        &self,
        owner: &OwnerId,
        req: SendNotification,
    ) -> Result<NotificationDelivery, NotificationError> {
        let template = self.stores.get_template(&req.template_id)?;

        if req.recipients.is_empty() {
            return Err(NotificationError::Validation(
                "at least one recipient is required".into(),
            ));
        }
        if req.recipients.iter().any(|r| r.trim().is_empty()) {
            return Err(NotificationError::Validation("empty recipient".into()));
        }
        for required in &template.required_params {
            if !req.params.contains_key(required) {
                return Err(RenderError::MissingParam(required.clone()).into());
            }
        }

        let delivery = NotificationDelivery::new(
            req.template_id,
            owner.clone(),
            req.recipients,
            req.params,
            req.priority,
            req.scheduled_at,
        );
        self.stores.save_notification(&delivery)?;
        self.metrics.enqueued_total.add(1, &[]);
        self.push(delivery.id, delivery.priority, delivery.scheduled_at);

        Ok(delivery)
    }

    pub fn get(&self, id: &NotificationId) -> Result<NotificationDelivery, NotificationError> {
        Ok(self.stores.get_notification(id)?)
    }

    #[instrument(skip(self), fields(subsys = "Notifications"))]
    pub fn cancel(&self, id: &NotificationId) -> Result<NotificationDelivery, NotificationError> {
        let current = self.stores.get_notification(id)?;
        if current.status.is_terminal() {
            return Err(NotificationError::Terminal(*id));
        }
        Ok(self.stores.update_notification(id, |delivery| {
            delivery.status = NotificationStatus::Cancelled;
        })?)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    // ---- the send cycle ----

    #[instrument(skip(self), fields(subsys = "Notifications", notification_id = %id))]
    async fn process(&self, id: NotificationId) {
        if let Err(err) = self.process_inner(id).await {
            tracing::error!("Notification processing failed: {:?}", err);
        }
    }

    async fn process_inner(&self, id: NotificationId) -> Result<(), NotificationError> {
        let delivery = self.stores.get_notification(&id)?;
        if delivery.status.is_terminal() || delivery.status == NotificationStatus::Cancelled {
            return Ok(());
        }

        let template = match self.stores.get_template(&delivery.template_id) {
            Ok(template) => template,
            Err(_) => {
                // template deleted while queued
                self.finalize(
                    &id,
                    NotificationStatus::Failed,
                    Some("template no longer exists"),
                )?;
                return Ok(());
            }
        };

        if delivery.status.can_transition_to(NotificationStatus::Sending) {
            self.stores.update_notification(&id, |d| {
                d.status = NotificationStatus::Sending;
            })?;
        }

        let (subject, body) = match self.render(&template, &delivery.params) {
            Ok(rendered) => rendered,
            Err(err) => {
                self.finalize(&id, NotificationStatus::Failed, Some(&err.to_string()))?;
                return Ok(());
            }
        };

        let urgent = delivery.priority == Priority::Urgent;
        let pace = self.transports.pace_delay(template.channel, urgent);
        if !pace.is_zero() {
            tokio::time::sleep(pace).await;
        }

        let transport = self.transports.transport(template.channel);
        let send_timeout = self.transports.send_timeout();

        for recipient in &delivery.recipients {
            let already_sent = delivery
                .results
                .get(recipient)
                .map(|r| r.status == RecipientStatus::Sent)
                .unwrap_or(false);
            if already_sent {
                continue;
            }

            let outcome = tokio::time::timeout(
                send_timeout,
                transport.send(recipient, subject.as_deref(), &body),
            )
            .await;

            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(_) => Some("send timed out".to_string()),
            };

            let sent = error.is_none();
            if !sent {
                self.metrics
                    .record_recipient_failure(&template.channel.to_string());
            }

            self.stores.update_notification(&id, |d| {
                let result = d
                    .results
                    .entry(recipient.clone())
                    .or_insert_with(vertex_types::RecipientResult::pending);
                result.attempts += 1;
                result.status = if sent {
                    RecipientStatus::Sent
                } else {
                    RecipientStatus::Failed
                };
                result.error = error.clone();
            })?;
        }

        self.settle(&id, &template).await
    }

    /// Decides whether the delivery is done or goes back into the queue
    /// for a retry cycle.
    async fn settle(
        &self,
        id: &NotificationId,
        template: &NotificationTemplate,
    ) -> Result<(), NotificationError> {
        let delivery = self.stores.get_notification(id)?;
        if delivery.status == NotificationStatus::Cancelled {
            return Ok(());
        }

        let retryable_failures: Vec<u32> = delivery
            .results
            .values()
            .filter(|r| r.status == RecipientStatus::Failed && r.attempts < self.retry.max_attempts)
            .map(|r| r.attempts)
            .collect();

        if retryable_failures.is_empty() {
            let final_status = delivery.aggregate_status();
            self.finalize(id, final_status, None)?;

            match final_status {
                NotificationStatus::Sent => self.metrics.record_sent(&template.channel.to_string()),
                NotificationStatus::Failed => self.metrics.failed_total.add(1, &[]),
                _ => {}
            }

            let kind = match final_status {
                NotificationStatus::Sent => "notification.sent",
                NotificationStatus::Partial => "notification.partial",
                _ => "notification.failed",
            };
            self.broker
                .publish(Event::new(
                    kind,
                    "hub.notifications",
                    json!({
                        "notification_id": id.to_string(),
                        "template_id": delivery.template_id.to_string(),
                        "recipients": delivery.recipients.len(),
                    }),
                ))
                .await;
            return Ok(());
        }

        // some recipients still have attempts left: note the interim
        // status and come back after the backoff delay
        let interim = delivery.aggregate_status();
        if interim == NotificationStatus::Partial
            && delivery.status.can_transition_to(NotificationStatus::Partial)
        {
            self.stores.update_notification(id, |d| {
                d.status = NotificationStatus::Partial;
            })?;
        }

        let attempt = retryable_failures.into_iter().max().unwrap_or(1);
        let delay = backoff::delay_for_attempt(&self.retry, attempt);
        let next = Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(30));

        tracing::debug!(
            "Requeueing notification {} for retry at {}",
            id,
            next.to_rfc3339()
        );
        self.push(*id, delivery.priority, next);
        Ok(())
    }

    fn finalize(
        &self,
        id: &NotificationId,
        status: NotificationStatus,
        error: Option<&str>,
    ) -> Result<(), NotificationError> {
        self.stores.update_notification(id, |d| {
            if d.status.can_transition_to(status) {
                d.status = status;
            }
            if let Some(error) = error {
                for result in d.results.values_mut() {
                    if result.status != RecipientStatus::Sent {
                        result.status = RecipientStatus::Failed;
                        result.error = Some(error.to_string());
                    }
                }
            }
        })?;
        Ok(())
    }

    fn render(
        &self,
        template: &NotificationTemplate,
        params: &BTreeMap<String, String>,
    ) -> Result<(Option<String>, String), RenderError> {
        let subject = template
            .subject
            .as_ref()
            .map(|s| template::render(s, params, &template.required_params))
            .transpose()?;
        let body = template::render(&template.body, params, &template.required_params)?;
        Ok((subject, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utils::storage::db::HubDb;
    use utils::telemetry::{EventMetrics, WebhookMetrics};

    use crate::subsystems::webhooks::WebhookManager;

    fn manager() -> NotificationManager {
        let config = Config::default();
        let stores = Stores::new(HubDb::new());
        let meter = opentelemetry::global::meter("test");
        let webhooks = WebhookManager::new(&config, stores.clone(), WebhookMetrics::init(&meter));
        let broker = Arc::new(EventBroker::new(
            &config,
            stores.clone(),
            webhooks,
            EventMetrics::init(&meter),
        ));
        NotificationManager::new(&config, stores, broker, NotificationMetrics::init(&meter))
    }

    fn email_template(manager: &NotificationManager, owner: &OwnerId) -> NotificationTemplate {
        manager
            .create_template(
                owner,
                NewTemplate {
                    name: "welcome".to_string(),
                    channel: Channel::Email,
                    subject: Some("Hi {{name}}".to_string()),
                    body: "Hello {{name}}".to_string(),
                    required_params: vec!["name".to_string()],
                    category: None,
                },
            )
            .unwrap()
    }

    #[test]
    fn template_validation() {
        let manager = manager();
        let owner = OwnerId::new("alice").unwrap();

        // unclosed placeholder
        let broken = manager.create_template(
            &owner,
            NewTemplate {
                name: "broken".to_string(),
                channel: Channel::Email,
                subject: None,
                body: "Hello {{name".to_string(),
                required_params: vec![],
                category: None,
            },
        );
        assert!(matches!(broken, Err(NotificationError::Render(_))));

        // required param that is never used
        let unused = manager.create_template(
            &owner,
            NewTemplate {
                name: "unused".to_string(),
                channel: Channel::Email,
                subject: None,
                body: "Hello".to_string(),
                required_params: vec!["name".to_string()],
                category: None,
            },
        );
        assert!(matches!(unused, Err(NotificationError::Validation(_))));

        email_template(&manager, &owner);
        // duplicate name for the same owner
        let duplicate = manager.create_template(
            &owner,
            NewTemplate {
                name: "welcome".to_string(),
                channel: Channel::Email,
                subject: None,
                body: "x".to_string(),
                required_params: vec![],
                category: None,
            },
        );
        assert!(matches!(duplicate, Err(NotificationError::Conflict { .. })));
    }

    #[test]
    fn send_validates_recipients_and_params() {
        let manager = manager();
        let owner = OwnerId::new("alice").unwrap();
        let template = email_template(&manager, &owner);

        let no_recipients = manager.send(
            &owner,
            SendNotification {
                template_id: template.id,
                recipients: vec![],
                params: [("name".to_string(), "Ada".to_string())].into_iter().collect(),
                priority: Priority::Normal,
                scheduled_at: None,
            },
        );
        assert!(matches!(
            no_recipients,
            Err(NotificationError::Validation(_))
        ));

        let missing_param = manager.send(
            &owner,
            SendNotification {
                template_id: template.id,
                recipients: vec!["a@x".to_string()],
                params: BTreeMap::new(),
                priority: Priority::Normal,
                scheduled_at: None,
            },
        );
        assert!(matches!(missing_param, Err(NotificationError::Render(_))));

        let ok = manager
            .send(
                &owner,
                SendNotification {
                    template_id: template.id,
                    recipients: vec!["a@x".to_string()],
                    params: [("name".to_string(), "Ada".to_string())].into_iter().collect(),
                    priority: Priority::Normal,
                    scheduled_at: None,
                },
            )
            .unwrap();
        assert_eq!(ok.status, NotificationStatus::Queued);
        assert_eq!(manager.queue_depth(), 1);
    }

    #[test]
    fn queue_orders_by_priority_then_schedule() {
        let manager = manager();
        let now = Utc::now();

        let low = NotificationId::generate();
        let urgent = NotificationId::generate();
        let normal_early = NotificationId::generate();
        let normal_late = NotificationId::generate();

        manager.push(normal_late, Priority::Normal, now + chrono::Duration::milliseconds(5));
        manager.push(low, Priority::Low, now - chrono::Duration::seconds(1));
        manager.push(urgent, Priority::Urgent, now);
        manager.push(normal_early, Priority::Normal, now - chrono::Duration::seconds(2));

        let mut queue = manager.queue.lock().unwrap();
        assert_eq!(queue.pop().unwrap().id, urgent);
        assert_eq!(queue.pop().unwrap().id, normal_early);
        assert_eq!(queue.pop().unwrap().id, normal_late);
        assert_eq!(queue.pop().unwrap().id, low);
    }

    #[test]
    fn cancel_rejects_terminal() {
        let manager = manager();
        let owner = OwnerId::new("alice").unwrap();
        let template = email_template(&manager, &owner);

        let delivery = manager
            .send(
                &owner,
                SendNotification {
                    template_id: template.id,
                    recipients: vec!["a@x".to_string()],
                    params: [("name".to_string(), "Ada".to_string())].into_iter().collect(),
                    priority: Priority::Normal,
                    scheduled_at: None,
                },
            )
            .unwrap();

        let cancelled = manager.cancel(&delivery.id).unwrap();
        assert_eq!(cancelled.status, NotificationStatus::Cancelled);
        assert!(matches!(
            manager.cancel(&delivery.id),
            Err(NotificationError::Terminal(_))
        ));
    }
}
