use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{DeliveryId, EventId, OwnerId, WebhookId};

/// Retry behavior for a webhook's deliveries. Delays grow exponentially
/// from `base_delay_ms`, capped at `max_delay_ms`, with a symmetric
/// random jitter factor applied last.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, ToSchema)]
pub struct RetryPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

/// An outbound HTTP target registered to receive events matching a
/// pattern set. Deactivating stops new deliveries but keeps history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct Webhook {
    pub id: WebhookId,
    pub owner: OwnerId,
    pub name: String,
    pub url: String,
    /// Glob patterns over event types, e.g. `report.*`. Never empty.
    pub events: Vec<String>,
    /// HMAC secret; deliveries are unsigned when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    Exhausted,
    Cancelled,
}

impl DeliveryStatus {
    /// Terminal statuses are immutable; workers skip them and cancel
    /// requests reject them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

/// One event's delivery lifecycle against one webhook. Mutated on each
/// attempt until it reaches a terminal status.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct WebhookDelivery {
    pub id: DeliveryId,
    pub webhook_id: WebhookId,
    pub event_id: EventId,
    pub event_kind: String,
    /// Canonical payload bytes are recomputed from this on every attempt
    /// so the signature stays byte-stable across retries.
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub attempt: u32,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_summary: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn new(webhook_id: WebhookId, event_id: EventId, event_kind: String, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: DeliveryId::generate(),
            webhook_id,
            event_id,
            event_kind,
            payload,
            attempt: 0,
            status: DeliveryStatus::Pending,
            request_summary: None,
            response_summary: None,
            next_attempt_at: now,
            created_at: now,
            updated_at: now,
        }
    }
}
