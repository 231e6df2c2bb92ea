use thiserror::Error;
use vertex_types::WebhookId;

use crate::stores::StoreError;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Invalid webhook: {0}")]
    Validation(String),

    #[error("Webhook named {name} already exists for this owner")]
    Conflict { name: String },

    #[error("Webhook {0} is not active")]
    Inactive(WebhookId),

    #[error("Store: {0}")]
    Store(#[from] StoreError),
}
