pub mod backoff;
pub mod error;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use error::WebhookError;
use serde::Deserialize;
use tracing::instrument;
use utils::context::AppContext;
use utils::telemetry::WebhookMetrics;
use utoipa::ToSchema;
use vertex_types::{
    signature, to_canonical_json, DeliveryId, DeliveryStatus, Event, OwnerId, RetryPolicy,
    Webhook, WebhookDelivery, WebhookId,
};
use wildmatch::WildMatch;

use crate::config::Config;
use crate::stores::{StoreError, Stores};

#[derive(Deserialize, Clone, Debug, ToSchema)]
pub struct NewWebhook {
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

#[derive(Deserialize, Clone, Debug, Default, ToSchema)]
pub struct WebhookPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

/// Registers webhooks and drives at-least-once delivery: a worker pool
/// drains due pending deliveries, POSTs canonically-serialized payloads
/// with HMAC headers, and reschedules failures with exponential backoff
/// until the attempt cap.
#[derive(Clone)]
pub struct WebhookManager {
    stores: Stores,
    http: reqwest::Client,
    // per-delivery claim guard: one worker per delivery at a time
    claims: Arc<DashMap<DeliveryId, ()>>,
    // sliding per-webhook dispatch windows for the rate limit
    windows: Arc<DashMap<WebhookId, VecDeque<Instant>>>,
    workers: usize,
    poll_interval: Duration,
    rate_limit_per_minute: usize,
    metrics: WebhookMetrics,
}

impl WebhookManager {
    pub fn new(config: &Config, stores: Stores, metrics: WebhookMetrics) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.webhooks.request_timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            stores,
            http,
            claims: Arc::new(DashMap::new()),
            windows: Arc::new(DashMap::new()),
            workers: config.webhooks.workers.max(1),
            poll_interval: Duration::from_millis(config.webhooks.poll_interval_ms.max(10)),
            rate_limit_per_minute: config.webhooks.rate_limit_per_minute,
            metrics,
        }
    }

    /// Spawns the delivery worker pool. Workers poll for due deliveries
    /// and race on the claim map, so adding workers never double-sends.
    #[instrument(skip(self, ctx), fields(subsys = "Webhooks"))]
    pub fn start(&self, ctx: AppContext) {
        for worker_id in 0..self.workers {
            let _self = self.clone();
            let mut kill_receiver = ctx.get_kill_receiver();

            ctx.rt.spawn(async move {
                let mut interval = tokio::time::interval(_self.poll_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = kill_receiver.recv() => {
                            tracing::debug!("Webhook worker {} shutting down", worker_id);
                            break;
                        }
                        _ = interval.tick() => {
                            _self.drain_due().await;
                        }
                    }
                }
            });
        }
    }

    async fn drain_due(&self) {
        let due = match self.stores.due_deliveries(Utc::now(), 32) {
            Ok(due) => due,
            Err(err) => {
                tracing::error!("Failed to list due deliveries: {:?}", err);
                return;
            }
        };

        for delivery in due {
            // claim or skip; the claim holds for the whole attempt
            if self.claims.insert(delivery.id, ()).is_some() {
                continue;
            }
            self.attempt_delivery(delivery).await;
        }
    }

    #[instrument(skip(self, delivery), fields(subsys = "Webhooks", delivery_id = %delivery.id))]
    async fn attempt_delivery(&self, delivery: WebhookDelivery) {
        let outcome = self.attempt_delivery_inner(&delivery).await;
        self.claims.remove(&delivery.id);

        if let Err(err) = outcome {
            tracing::error!("Delivery attempt bookkeeping failed: {:?}", err);
        }
    }

    async fn attempt_delivery_inner(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        // the poll snapshot may predate another worker's attempt;
        // re-read under the claim so a delivered record is never re-sent
        let delivery = &self.stores.get_delivery(&delivery.id)?;
        if delivery.status != DeliveryStatus::Pending || delivery.next_attempt_at > Utc::now() {
            return Ok(());
        }

        let webhook = match self.stores.try_get_webhook(&delivery.webhook_id)? {
            Some(webhook) => webhook,
            None => {
                // webhook deleted from under its queue: finalize
                self.stores.update_delivery(&delivery.id, |d| {
                    d.status = DeliveryStatus::Cancelled;
                    d.response_summary = Some("webhook no longer exists".to_string());
                })?;
                return Ok(());
            }
        };

        if !webhook.active {
            self.stores.update_delivery(&delivery.id, |d| {
                d.status = DeliveryStatus::Cancelled;
                d.response_summary = Some("webhook deactivated".to_string());
            })?;
            return Ok(());
        }

        if !self.admit(&webhook.id) {
            // window full: defer without consuming an attempt
            self.metrics.rate_limited_total.add(1, &[]);
            self.stores.update_delivery(&delivery.id, |d| {
                d.next_attempt_at = Utc::now() + chrono::Duration::seconds(1);
            })?;
            return Ok(());
        }

        let attempt = delivery.attempt + 1;
        let body = to_canonical_json(&delivery.payload);

        let mut request = self
            .http
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("X-Event-Id", delivery.event_id.to_string())
            .header("X-Event-Type", delivery.event_kind.clone())
            .header("X-Attempt", attempt.to_string())
            .header("X-Delivered-At", Utc::now().to_rfc3339());

        if let Some(secret) = &webhook.secret {
            request = request.header(
                "X-Signature",
                signature::signature_header(secret.as_bytes(), &body),
            );
        }

        let started = Instant::now();
        let result = request.body(body).send().await;
        let elapsed = started.elapsed().as_secs_f64();

        let request_summary = format!("POST {}", webhook.url);

        match result {
            Ok(response) if response.status().is_success() => {
                let status = response.status();
                self.metrics.record_attempt("delivered", elapsed);
                self.metrics.delivered_total.add(1, &[]);

                self.stores.update_delivery(&delivery.id, |d| {
                    d.attempt = attempt;
                    d.status = DeliveryStatus::Delivered;
                    d.request_summary = Some(request_summary.clone());
                    d.response_summary = Some(status.to_string());
                })?;

                tracing::info!(
                    "Delivered event {} to webhook {} (attempt {})",
                    delivery.event_id,
                    webhook.id,
                    attempt
                );
            }
            Ok(response) => {
                let status = response.status();
                let advisory = backoff::retry_after_delay(response.headers(), &webhook.retry);
                let body_text = response.text().await.unwrap_or_default();
                let summary = format!("{}: {}", status, truncate(&body_text, 512));

                self.metrics.record_attempt("rejected", elapsed);
                self.finalize_failed_attempt(delivery, &webhook, attempt, request_summary, summary, advisory)?;
            }
            Err(err) => {
                self.metrics.record_attempt("transport_error", elapsed);
                let summary = format!("transport error: {}", err);
                self.finalize_failed_attempt(delivery, &webhook, attempt, request_summary, summary, None)?;
            }
        }

        Ok(())
    }

    fn finalize_failed_attempt(
        &self,
        delivery: &WebhookDelivery,
        webhook: &Webhook,
        attempt: u32,
        request_summary: String,
        response_summary: String,
        advisory_delay: Option<Duration>,
    ) -> Result<(), StoreError> {
        if attempt >= webhook.retry.max_attempts {
            self.metrics.exhausted_total.add(1, &[]);
            self.stores.update_delivery(&delivery.id, |d| {
                d.attempt = attempt;
                d.status = DeliveryStatus::Exhausted;
                d.request_summary = Some(request_summary);
                d.response_summary = Some(response_summary);
            })?;
            tracing::warn!(
                "Delivery {} exhausted after {} attempts",
                delivery.id,
                attempt
            );
            return Ok(());
        }

        // Retry-After wins when the target asked for a longer pause
        let mut delay = backoff::delay_for_attempt(&webhook.retry, attempt);
        if let Some(advisory) = advisory_delay {
            delay = delay.max(advisory);
        }

        self.stores.update_delivery(&delivery.id, |d| {
            d.attempt = attempt;
            d.request_summary = Some(request_summary);
            d.response_summary = Some(response_summary);
            d.next_attempt_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(60));
        })?;

        Ok(())
    }

    /// Sliding-window admission per webhook. Keeps a downstream outage
    /// from turning the retry queue into a thundering herd.
    fn admit(&self, webhook_id: &WebhookId) -> bool {
        if self.rate_limit_per_minute == 0 {
            return true;
        }

        let now = Instant::now();
        let mut window = self.windows.entry(*webhook_id).or_default();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > Duration::from_secs(60) {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.rate_limit_per_minute {
            return false;
        }
        window.push_back(now);
        true
    }

    // ---- registration ----

    #[instrument(skip(self, new), fields(subsys = "Webhooks"))]
    pub fn register(&self, owner: &OwnerId, new: NewWebhook) -> Result<Webhook, WebhookError> {
        if new.name.trim().is_empty() {
            return Err(WebhookError::Validation("name must not be empty".into()));
        }
        url::Url::parse(&new.url)
            .map_err(|e| WebhookError::Validation(format!("invalid url: {}", e)))?;
        if new.events.is_empty() {
            return Err(WebhookError::Validation(
                "at least one event pattern is required".into(),
            ));
        }
        if new.events.iter().any(|p| p.trim().is_empty()) {
            return Err(WebhookError::Validation("empty event pattern".into()));
        }
        if self.stores.find_webhook_by_name(owner, &new.name)?.is_some() {
            return Err(WebhookError::Conflict { name: new.name });
        }

        let now = Utc::now();
        let webhook = Webhook {
            id: WebhookId::generate(),
            owner: owner.clone(),
            name: new.name,
            url: new.url,
            events: new.events,
            secret: new.secret,
            active: true,
            retry: new.retry.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        self.stores.save_webhook(&webhook)?;

        tracing::info!("Webhook registered: id={}, url={}", webhook.id, webhook.url);
        Ok(webhook)
    }

    #[instrument(skip(self, patch), fields(subsys = "Webhooks"))]
    pub fn update(&self, id: &WebhookId, patch: WebhookPatch) -> Result<Webhook, WebhookError> {
        let current = self.stores.get_webhook(id)?;

        if let Some(url) = &patch.url {
            url::Url::parse(url)
                .map_err(|e| WebhookError::Validation(format!("invalid url: {}", e)))?;
        }
        if let Some(events) = &patch.events {
            if events.is_empty() || events.iter().any(|p| p.trim().is_empty()) {
                return Err(WebhookError::Validation(
                    "at least one non-empty event pattern is required".into(),
                ));
            }
        }
        if let Some(name) = &patch.name {
            if name != &current.name {
                if let Some(existing) = self.stores.find_webhook_by_name(&current.owner, name)? {
                    if existing.id != *id {
                        return Err(WebhookError::Conflict { name: name.clone() });
                    }
                }
            }
        }

        Ok(self.stores.update_webhook(id, |webhook| {
            if let Some(name) = patch.name {
                webhook.name = name;
            }
            if let Some(url) = patch.url {
                webhook.url = url;
            }
            if let Some(events) = patch.events {
                webhook.events = events;
            }
            if let Some(secret) = patch.secret {
                webhook.secret = Some(secret);
            }
            if let Some(active) = patch.active {
                webhook.active = active;
            }
            if let Some(retry) = patch.retry {
                webhook.retry = retry;
            }
        })?)
    }

    #[instrument(skip(self), fields(subsys = "Webhooks"))]
    pub fn remove(&self, id: &WebhookId) -> Result<Webhook, WebhookError> {
        Ok(self.stores.remove_webhook(id)?)
    }

    pub fn get(&self, id: &WebhookId) -> Result<Webhook, WebhookError> {
        Ok(self.stores.get_webhook(id)?)
    }

    pub fn list(&self) -> Result<Vec<Webhook>, WebhookError> {
        Ok(self.stores.list_webhooks()?)
    }

    /// Active webhooks whose pattern set matches the event type.
    pub fn matching_webhooks(&self, event_kind: &str) -> Result<Vec<Webhook>, WebhookError> {
        Ok(self
            .stores
            .list_webhooks()?
            .into_iter()
            .filter(|w| w.active && matches_any(&w.events, event_kind))
            .collect())
    }

    // ---- deliveries ----

    /// Creates a pending delivery for the event. The worker pool picks
    /// it up on the next poll.
    #[instrument(skip(self, event), fields(subsys = "Webhooks"))]
    pub fn enqueue(&self, webhook: &Webhook, event: &Event) -> Result<WebhookDelivery, WebhookError> {
        if !webhook.active {
            return Err(WebhookError::Inactive(webhook.id));
        }

        let delivery = WebhookDelivery::new(
            webhook.id,
            event.id.clone(),
            event.kind.clone(),
            event.payload.clone(),
        );
        self.stores.save_delivery(&delivery)?;
        self.metrics.deliveries_created.add(1, &[]);
        Ok(delivery)
    }

    pub fn cancel_delivery(&self, id: &DeliveryId) -> Result<WebhookDelivery, WebhookError> {
        Ok(self.stores.update_delivery(id, |d| {
            d.status = DeliveryStatus::Cancelled;
        })?)
    }

    pub fn delivery(&self, id: &DeliveryId) -> Result<WebhookDelivery, WebhookError> {
        Ok(self.stores.get_delivery(id)?)
    }

    pub fn delivery_history(
        &self,
        webhook_id: &WebhookId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        Ok(self
            .stores
            .deliveries_for_webhook(webhook_id, offset, limit)?)
    }

    pub fn pending_count(&self) -> usize {
        self.stores
            .due_deliveries(Utc::now() + chrono::Duration::days(3650), usize::MAX)
            .map(|d| d.len())
            .unwrap_or(0)
    }
}

fn matches_any(patterns: &[String], event_kind: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| WildMatch::new(pattern).matches(event_kind))
}

fn truncate(s: &str, max: usize) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use utils::storage::db::HubDb;

    fn manager() -> WebhookManager {
        WebhookManager::new(
            &Config::default(),
            Stores::new(HubDb::new()),
            WebhookMetrics::init(&opentelemetry::global::meter("test")),
        )
    }

    fn new_webhook(name: &str) -> NewWebhook {
        NewWebhook {
            name: name.to_string(),
            url: "http://sink.example/hook".to_string(),
            events: vec!["foo.*".to_string()],
            secret: Some("s".to_string()),
            retry: None,
        }
    }

    #[test]
    fn registration_validation() {
        let manager = manager();
        let owner = OwnerId::new("alice").unwrap();

        let mut bad_url = new_webhook("hook");
        bad_url.url = "not a url".to_string();
        assert!(matches!(
            manager.register(&owner, bad_url),
            Err(WebhookError::Validation(_))
        ));

        let mut no_events = new_webhook("hook");
        no_events.events.clear();
        assert!(matches!(
            manager.register(&owner, no_events),
            Err(WebhookError::Validation(_))
        ));

        manager.register(&owner, new_webhook("hook")).unwrap();
        assert!(matches!(
            manager.register(&owner, new_webhook("hook")),
            Err(WebhookError::Conflict { .. })
        ));
    }

    #[test]
    fn pattern_matching() {
        let manager = manager();
        let owner = OwnerId::new("alice").unwrap();

        let mut exact = new_webhook("exact");
        exact.events = vec!["foo.bar".to_string()];
        manager.register(&owner, exact).unwrap();

        let mut glob = new_webhook("glob");
        glob.events = vec!["foo.*".to_string()];
        manager.register(&owner, glob).unwrap();

        let mut other = new_webhook("other");
        other.events = vec!["bar.*".to_string()];
        manager.register(&owner, other).unwrap();

        let matched = manager.matching_webhooks("foo.bar").unwrap();
        assert_eq!(matched.len(), 2);

        let matched = manager.matching_webhooks("foo.baz").unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "glob");
    }

    #[test]
    fn enqueue_rejects_inactive() {
        let manager = manager();
        let owner = OwnerId::new("alice").unwrap();
        let webhook = manager.register(&owner, new_webhook("hook")).unwrap();

        let webhook = manager
            .update(
                &webhook.id,
                WebhookPatch {
                    active: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        let event = Event::new("foo.bar", "test", json!({"x": 1}));
        assert!(matches!(
            manager.enqueue(&webhook, &event),
            Err(WebhookError::Inactive(_))
        ));
    }

    #[test]
    fn cancel_only_touches_pending() {
        let manager = manager();
        let owner = OwnerId::new("alice").unwrap();
        let webhook = manager.register(&owner, new_webhook("hook")).unwrap();

        let event = Event::new("foo.bar", "test", json!({"x": 1}));
        let delivery = manager.enqueue(&webhook, &event).unwrap();

        let cancelled = manager.cancel_delivery(&delivery.id).unwrap();
        assert_eq!(cancelled.status, DeliveryStatus::Cancelled);

        // terminal now, second cancel is rejected
        assert!(manager.cancel_delivery(&delivery.id).is_err());
    }

    #[test]
    fn rate_limit_window() {
        let mut config = Config::default();
        config.webhooks.rate_limit_per_minute = 2;
        let manager = WebhookManager::new(
            &config,
            Stores::new(HubDb::new()),
            WebhookMetrics::init(&opentelemetry::global::meter("test")),
        );

        let id = WebhookId::generate();
        assert!(manager.admit(&id));
        assert!(manager.admit(&id));
        assert!(!manager.admit(&id));

        // other webhooks have their own window
        assert!(manager.admit(&WebhookId::generate()));
    }
}
