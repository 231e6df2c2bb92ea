use thiserror::Error;
use vertex_types::ExecutionId;

use crate::stores::StoreError;
use crate::subsystems::notifications::error::NotificationError;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression {expression}: {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Unknown timezone {0}")]
    UnknownTimezone(String),

    #[error("Schedule {0} never fires")]
    NeverFires(String),
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid report: {0}")]
    Validation(String),

    #[error("Schedule: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("Execution {0} is already terminal")]
    TerminalExecution(ExecutionId),

    #[error("Artifact write failed: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("Notification: {0}")]
    Notification(#[from] NotificationError),

    #[error("Store: {0}")]
    Store(#[from] StoreError),
}
