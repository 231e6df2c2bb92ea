use thiserror::Error;

use crate::stores::StoreError;
use crate::subsystems::webhooks::error::WebhookError;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Invalid subscription: {0}")]
    Validation(String),

    #[error("No handler registered under {0}")]
    UnknownHandler(String),

    #[error("Webhook: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Store: {0}")]
    Store(#[from] StoreError),
}
