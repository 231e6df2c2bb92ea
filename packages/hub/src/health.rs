use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub timestamp: DateTime<Utc>,
    pub subsystems: HashMap<String, SubsystemHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubsystemHealth {
    Healthy,
    Unhealthy { error: String },
    Unknown,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            subsystems: HashMap::new(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        !self.subsystems.is_empty()
            && self
                .subsystems
                .values()
                .all(|result| matches!(result, SubsystemHealth::Healthy))
    }

    pub fn mark_healthy(&mut self, subsystem: &str) {
        self.timestamp = Utc::now();
        self.subsystems
            .insert(subsystem.to_string(), SubsystemHealth::Healthy);
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedHealthStatus = Arc<RwLock<HealthStatus>>;

pub fn create_shared_health_status() -> SharedHealthStatus {
    Arc::new(RwLock::new(HealthStatus::new()))
}

/// Flips every hub subsystem to healthy; called once the workers are up.
pub fn mark_subsystems_started(status: &SharedHealthStatus) {
    let mut status = status.write().unwrap();
    for subsystem in ["integrations", "webhooks", "notifications", "events", "reports"] {
        status.mark_healthy(subsystem);
    }
}
