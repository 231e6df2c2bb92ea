use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::{OwnerId, SubscriptionId, WebhookId};

/// Where a matched event is delivered: out over a registered webhook, or
/// into an in-process handler looked up by name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Callback {
    Webhook { webhook_id: WebhookId },
    Handler { handler: String },
}

/// A registration associating an event-type pattern (and optional
/// payload predicates) with a delivery target.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub owner: OwnerId,
    /// Glob over event types, e.g. `foo.*`.
    pub pattern: String,
    /// Top-level payload fields that must equal these values for the
    /// subscription to match. Empty means pattern-only matching.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub filters: BTreeMap<String, serde_json::Value>,
    pub callback: Callback,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
