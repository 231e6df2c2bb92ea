use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::{ExecutionId, OwnerId, ReportId, ReportTemplateId};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Pdf,
    Csv,
    Html,
    #[default]
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Csv => "csv",
            OutputFormat::Html => "html",
            OutputFormat::Json => "json",
        }
    }
}

/// Cron cadence plus the timezone the expression is evaluated in.
/// Validation (cron syntax, tz lookup) happens in the scheduler, where
/// the parsed forms live.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, ToSchema)]
pub struct ReportSchedule {
    pub cron: String,
    /// IANA name, e.g. `UTC` or `America/New_York`.
    pub timezone: String,
}

/// Blueprint for a generated artifact. `content` carries the same
/// `{{name}}` placeholder syntax as notification templates.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct ReportTemplate {
    pub id: ReportTemplateId,
    pub owner: OwnerId,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub required_params: Vec<String>,
    #[serde(default)]
    pub supported_formats: Vec<OutputFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An owner-scoped job producing an artifact, either on demand or on a
/// cron cadence. Each fire spawns a [`ReportExecution`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct Report {
    pub id: ReportId,
    pub owner: OwnerId,
    pub template_id: ReportTemplateId,
    pub name: String,
    #[schema(value_type = Object)]
    pub params: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ReportSchedule>,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub format: OutputFormat,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_generated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// One run of a report. `output_path` is set iff the run completed;
/// `error` is set iff it failed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct ReportExecution {
    pub id: ExecutionId,
    pub report_id: ReportId,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReportExecution {
    pub fn start(report_id: ReportId) -> Self {
        Self {
            id: ExecutionId::generate(),
            report_id,
            started_at: Utc::now(),
            ended_at: None,
            status: ExecutionStatus::Running,
            output_path: None,
            bytes: 0,
            error: None,
        }
    }
}
