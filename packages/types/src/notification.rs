use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::{NotificationId, OwnerId, TemplateId};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Push,
    Chat,
    Custom,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
            Channel::Chat => "chat",
            Channel::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// Queue ordering is `(priority DESC, scheduled_at ASC)`; the derived
/// `Ord` places `Low` first so priority comparisons read naturally.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// A parameterized message blueprint for a specific channel.
/// `{{name}}` placeholders are bound at send time.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct NotificationTemplate {
    pub id: TemplateId,
    pub owner: OwnerId,
    pub name: String,
    pub channel: Channel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
    /// Placeholders that must be bound; missing ones fail the render.
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Queued,
    Sending,
    Sent,
    Partial,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    /// `Partial` is not terminal: retries may still drain the failed
    /// recipient set and promote it to `Sent`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Sent | NotificationStatus::Failed | NotificationStatus::Cancelled
        )
    }

    /// The status machine only moves forward: queued -> sending ->
    /// {sent, partial, failed}, partial -> sent, and cancelled from any
    /// non-terminal state. Queued -> failed covers deliveries rejected
    /// at dequeue time (e.g. the template was deleted while waiting).
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        match (self, next) {
            (Queued, Sending) | (Queued, Failed) | (Queued, Cancelled) => true,
            (Sending, Sent) | (Sending, Partial) | (Sending, Failed) | (Sending, Cancelled) => true,
            (Partial, Sending) | (Partial, Sent) | (Partial, Failed) | (Partial, Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct RecipientResult {
    pub status: RecipientStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecipientResult {
    pub fn pending() -> Self {
        Self {
            status: RecipientStatus::Pending,
            attempts: 0,
            error: None,
        }
    }
}

/// One enqueued notification: a template bound to params, fanned out to
/// recipients, with per-recipient outcomes tracked independently.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct NotificationDelivery {
    pub id: NotificationId,
    pub template_id: TemplateId,
    pub owner: OwnerId,
    pub recipients: Vec<String>,
    #[schema(value_type = Object)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub priority: Priority,
    pub scheduled_at: DateTime<Utc>,
    pub status: NotificationStatus,
    pub results: BTreeMap<String, RecipientResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationDelivery {
    pub fn new(
        template_id: TemplateId,
        owner: OwnerId,
        recipients: Vec<String>,
        params: BTreeMap<String, String>,
        priority: Priority,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = Utc::now();
        let results = recipients
            .iter()
            .map(|r| (r.clone(), RecipientResult::pending()))
            .collect();
        Self {
            id: NotificationId::generate(),
            template_id,
            owner,
            recipients,
            params,
            priority,
            scheduled_at: scheduled_at.unwrap_or(now).max(now),
            status: NotificationStatus::Queued,
            results,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overall status derived from per-recipient outcomes once a send
    /// cycle finishes: all sent -> Sent, none sent -> Failed, else Partial.
    pub fn aggregate_status(&self) -> NotificationStatus {
        let sent = self
            .results
            .values()
            .filter(|r| r.status == RecipientStatus::Sent)
            .count();
        if sent == self.results.len() {
            NotificationStatus::Sent
        } else if sent == 0 {
            NotificationStatus::Failed
        } else {
            NotificationStatus::Partial
        }
    }
}
