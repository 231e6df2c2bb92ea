use thiserror::Error;
use vertex_types::NotificationId;

use crate::stores::StoreError;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Missing required param {0}")]
    MissingParam(String),

    #[error("Malformed template: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Send timed out")]
    Timeout,

    #[error("Send failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Invalid notification: {0}")]
    Validation(String),

    #[error("Template named {name} already exists for this owner")]
    Conflict { name: String },

    #[error("Render: {0}")]
    Render(#[from] RenderError),

    #[error("Notification {0} is already terminal")]
    Terminal(NotificationId),

    #[error("Store: {0}")]
    Store(#[from] StoreError),
}
