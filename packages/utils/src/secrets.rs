use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("No secret found for reference {0}")]
    NotFound(String),

    #[error("Secret reference {0} is not valid: {1}")]
    InvalidReference(String, String),
}

/// Resolves opaque credential references into secret material. Entities
/// store only the reference; the material never touches persisted state.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<String, SecretError>;
}

/// Environment-backed resolver: `store-key-1` resolves from
/// `VERTEX_SECRET_STORE_KEY_1`.
pub struct EnvSecretResolver {
    prefix: String,
}

impl Default for EnvSecretResolver {
    fn default() -> Self {
        Self::new("VERTEX_SECRET_")
    }
}

impl EnvSecretResolver {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn env_var_name(&self, reference: &str) -> Result<String, SecretError> {
        if reference.is_empty() {
            return Err(SecretError::InvalidReference(
                reference.to_string(),
                "empty reference".to_string(),
            ));
        }
        if !reference
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SecretError::InvalidReference(
                reference.to_string(),
                "only alphanumeric, '-' and '_' are allowed".to_string(),
            ));
        }

        Ok(format!(
            "{}{}",
            self.prefix,
            reference.to_ascii_uppercase().replace('-', "_")
        ))
    }
}

impl SecretResolver for EnvSecretResolver {
    fn resolve(&self, reference: &str) -> Result<String, SecretError> {
        let var = self.env_var_name(reference)?;
        std::env::var(&var).map_err(|_| SecretError::NotFound(reference.to_string()))
    }
}

/// In-memory resolver for tests and local development.
#[derive(Default)]
pub struct StaticSecretResolver {
    secrets: RwLock<HashMap<String, String>>,
}

impl StaticSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reference: impl Into<String>, value: impl Into<String>) {
        self.secrets
            .write()
            .unwrap()
            .insert(reference.into(), value.into());
    }
}

impl SecretResolver for StaticSecretResolver {
    fn resolve(&self, reference: &str) -> Result<String, SecretError> {
        self.secrets
            .read()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(reference.to_string()))
    }
}
