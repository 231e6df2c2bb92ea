use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::EventId;

/// A typed, immutable notification emitted by the platform or by an
/// integration. Payloads are plain JSON values; the canonical byte form
/// used for signing is produced by [`crate::to_canonical_json`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct Event {
    pub id: EventId,
    /// Dotted event type, e.g. `integration.created` or `report.completed`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Which subsystem or integration emitted this.
    pub source: String,
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl Event {
    pub fn new(kind: impl Into<String>, source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: EventId::generate(),
            kind: kind.into(),
            source: source.into(),
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}
