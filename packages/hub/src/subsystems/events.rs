pub mod error;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use error::EventError;
use serde::Deserialize;
use serde::Serialize;
use tracing::instrument;
use utils::telemetry::EventMetrics;
use utoipa::ToSchema;
use vertex_types::{Callback, Event, OwnerId, Subscription, SubscriptionId};
use wildmatch::WildMatch;

use crate::config::Config;
use crate::stores::Stores;
use crate::subsystems::webhooks::WebhookManager;

#[derive(Deserialize, Clone, Debug, ToSchema)]
pub struct NewSubscription {
    pub pattern: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub filters: std::collections::BTreeMap<String, serde_json::Value>,
    pub callback: Callback,
}

#[derive(Serialize, Clone, Copy, Debug, Default, ToSchema)]
pub struct PublishOutcome {
    /// Subscriptions whose pattern and predicates matched.
    pub matched: usize,
    /// Webhook deliveries enqueued (direct webhook matches plus
    /// webhook-callback subscriptions).
    pub webhook_deliveries: usize,
    /// Events dropped because a subscription lane stayed full past the
    /// publish block bound.
    pub dropped: usize,
}

/// In-process callback target for subscriptions that don't go out over a
/// webhook. Handler failures are logged and counted; they never reach
/// the publisher.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

/// Pattern-matching fan-out from publishers to subscriptions. Each
/// subscription gets its own bounded FIFO lane, so one slow consumer
/// only drops its own events.
pub struct EventBroker {
    stores: Stores,
    webhooks: WebhookManager,
    handlers: DashMap<String, Arc<dyn EventHandler>>,
    // compiled pattern per subscription
    patterns: DashMap<SubscriptionId, WildMatch>,
    lanes: DashMap<SubscriptionId, tokio::sync::mpsc::Sender<Event>>,
    queue_depth: usize,
    publish_block: Duration,
    metrics: EventMetrics,
}

impl EventBroker {
    pub fn new(
        config: &Config,
        stores: Stores,
        webhooks: WebhookManager,
        metrics: EventMetrics,
    ) -> Self {
        Self {
            stores,
            webhooks,
            handlers: DashMap::new(),
            patterns: DashMap::new(),
            lanes: DashMap::new(),
            queue_depth: config.events.queue_depth.max(1),
            publish_block: Duration::from_millis(config.events.publish_block_ms),
            metrics,
        }
    }

    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    #[instrument(skip(self, new), fields(subsys = "Events"))]
    pub fn subscribe(
        &self,
        owner: &OwnerId,
        new: NewSubscription,
    ) -> Result<Subscription, EventError> {
        if new.pattern.trim().is_empty() {
            return Err(EventError::Validation("pattern must not be empty".into()));
        }
        match &new.callback {
            Callback::Webhook { webhook_id } => {
                // resolves or the registration is refused
                self.webhooks.get(webhook_id)?;
            }
            Callback::Handler { handler } => {
                if !self.handlers.contains_key(handler) {
                    return Err(EventError::UnknownHandler(handler.clone()));
                }
            }
        }

        let subscription = Subscription {
            id: SubscriptionId::generate(),
            owner: owner.clone(),
            pattern: new.pattern,
            filters: new.filters,
            callback: new.callback,
            active: true,
            created_at: Utc::now(),
        };
        self.stores.save_subscription(&subscription)?;
        self.patterns
            .insert(subscription.id, WildMatch::new(&subscription.pattern));

        tracing::info!(
            "Subscription registered: id={}, pattern={}",
            subscription.id,
            subscription.pattern
        );
        Ok(subscription)
    }

    #[instrument(skip(self), fields(subsys = "Events"))]
    pub fn unsubscribe(&self, id: &SubscriptionId) -> Result<Subscription, EventError> {
        let removed = self.stores.remove_subscription(id)?;
        self.patterns.remove(id);
        // dropping the sender ends the lane task once it drains
        self.lanes.remove(id);
        Ok(removed)
    }

    pub fn get_subscription(&self, id: &SubscriptionId) -> Result<Subscription, EventError> {
        Ok(self.stores.get_subscription(id)?)
    }

    pub fn list_subscriptions(&self) -> Result<Vec<Subscription>, EventError> {
        Ok(self.stores.active_subscriptions()?)
    }

    /// Best-effort publish: the event is persisted, matched against
    /// direct webhook registrations and subscriptions, and handed to
    /// each matching lane. Publishers never see delivery failures.
    #[instrument(skip(self, event), fields(subsys = "Events", event_id = %event.id, event_kind = %event.kind))]
    pub async fn publish(&self, event: Event) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();
        self.metrics.published_total.add(1, &[]);

        // persisted best-effort; a failed write never blocks fan-out
        if let Err(err) = self.stores.save_event(&event) {
            tracing::warn!("Failed to persist event {}: {:?}", event.id, err);
        }

        // direct webhook registrations match on their own pattern sets
        match self.webhooks.matching_webhooks(&event.kind) {
            Ok(matched) => {
                for webhook in matched {
                    match self.webhooks.enqueue(&webhook, &event) {
                        Ok(_) => outcome.webhook_deliveries += 1,
                        Err(err) => {
                            tracing::warn!(
                                "Failed to enqueue delivery for webhook {}: {:?}",
                                webhook.id,
                                err
                            );
                        }
                    }
                }
            }
            Err(err) => tracing::error!("Webhook matching failed: {:?}", err),
        }

        let subscriptions = match self.stores.active_subscriptions() {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                tracing::error!("Subscription listing failed: {:?}", err);
                return outcome;
            }
        };

        for subscription in subscriptions {
            if !self.matches(&subscription, &event) {
                continue;
            }
            outcome.matched += 1;
            self.metrics.matched_total.add(1, &[]);

            match &subscription.callback {
                Callback::Webhook { webhook_id } => {
                    // enqueued inline so deliveries keep publish order
                    match self.webhooks.get(webhook_id) {
                        Ok(webhook) => match self.webhooks.enqueue(&webhook, &event) {
                            Ok(_) => outcome.webhook_deliveries += 1,
                            Err(err) => tracing::warn!(
                                "Subscription {} enqueue failed: {:?}",
                                subscription.id,
                                err
                            ),
                        },
                        Err(err) => tracing::warn!(
                            "Subscription {} webhook vanished: {:?}",
                            subscription.id,
                            err
                        ),
                    }
                }
                Callback::Handler { handler } => {
                    if !self.dispatch_to_lane(&subscription, handler, event.clone()).await {
                        outcome.dropped += 1;
                    }
                }
            }
        }

        outcome
    }

    /// Pattern match on the event type plus equality predicates over
    /// top-level payload fields.
    fn matches(&self, subscription: &Subscription, event: &Event) -> bool {
        let pattern_matches = match self.patterns.get(&subscription.id) {
            Some(compiled) => compiled.matches(&event.kind),
            None => {
                // subscription loaded from storage after a restart;
                // compile and remember
                let compiled = WildMatch::new(&subscription.pattern);
                let matched = compiled.matches(&event.kind);
                self.patterns.insert(subscription.id, compiled);
                matched
            }
        };
        if !pattern_matches {
            return false;
        }

        subscription
            .filters
            .iter()
            .all(|(key, expected)| event.payload.get(key) == Some(expected))
    }

    /// Sends into the subscription's FIFO lane, blocking up to the
    /// publish bound when the lane is full. Returns false on drop.
    async fn dispatch_to_lane(
        &self,
        subscription: &Subscription,
        handler_name: &str,
        event: Event,
    ) -> bool {
        let handler = match self.handlers.get(handler_name) {
            Some(handler) => handler.clone(),
            None => {
                tracing::warn!(
                    "Subscription {} names unknown handler {}",
                    subscription.id,
                    handler_name
                );
                self.metrics.handler_errors.add(1, &[]);
                return false;
            }
        };

        // entry API so concurrent publishers share one lane per
        // subscription instead of racing to spawn two
        let sender = match self.lanes.entry(subscription.id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (sender, mut receiver) =
                    tokio::sync::mpsc::channel::<Event>(self.queue_depth);
                let metrics = self.metrics.clone();
                let subscription_id = subscription.id;

                tokio::spawn(async move {
                    while let Some(event) = receiver.recv().await {
                        if let Err(err) = handler.handle(event).await {
                            metrics.handler_errors.add(1, &[]);
                            tracing::warn!(
                                "Handler for subscription {} failed: {:?}",
                                subscription_id,
                                err
                            );
                        }
                    }
                    tracing::debug!("Lane for subscription {} closed", subscription_id);
                });

                entry.insert(sender.clone());
                sender
            }
        };

        match tokio::time::timeout(self.publish_block, sender.send(event)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                // lane task is gone; drop the stale sender so the next
                // publish rebuilds it
                self.lanes.remove(&subscription.id);
                self.metrics.dropped_events.add(1, &[]);
                false
            }
            Err(_) => {
                self.metrics.dropped_events.add(1, &[]);
                tracing::warn!(
                    "Dropping event for subscription {}: lane full past {}ms",
                    subscription.id,
                    self.publish_block.as_millis()
                );
                false
            }
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}
