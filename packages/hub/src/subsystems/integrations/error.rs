use thiserror::Error;
use vertex_types::IntegrationId;

use crate::stores::StoreError;
use utils::secrets::SecretError;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Operation {0} is not supported by this connector")]
    UnsupportedOperation(String),

    #[error("Missing required param {0}")]
    MissingParam(String),

    #[error("Transient connector failure: {0}")]
    Transient(String),

    #[error("Permanent connector failure: {0}")]
    Permanent(String),
}

impl ConnectorError {
    /// Callers use this to decide whether a retry is worthwhile; the
    /// engine itself never retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectorError::Transient(_))
    }

    /// Timeouts and connection failures are worth retrying; anything the
    /// remote side actively rejected is not.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ConnectorError::Transient(err.to_string())
        } else {
            ConnectorError::Permanent(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("Invalid integration: {0}")]
    Validation(String),

    #[error("Integration named {name} already exists for this owner")]
    Conflict { name: String },

    #[error("Integration {0} is not active")]
    Inactive(IntegrationId),

    #[error("Secret resolution failed: {0}")]
    Secret(#[from] SecretError),

    #[error("Connector: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Store: {0}")]
    Store(#[from] StoreError),
}
