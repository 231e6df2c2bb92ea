use std::sync::Arc;

use utils::context::AppContext;
use utils::http::auth::{StaticTokenValidator, TokenValidator};
use utils::telemetry::HttpMetrics;
use vertex_types::{AuthContext, OwnerId, Role};

use crate::config::Config;
use crate::dispatcher::Hub;
use crate::health::SharedHealthStatus;

#[derive(Clone)]
pub struct HttpState {
    pub config: Config,
    pub hub: Arc<Hub>,
    pub ctx: AppContext,
    pub health_status: SharedHealthStatus,
    pub metrics: HttpMetrics,
}

impl HttpState {
    pub fn new(
        config: Config,
        hub: Arc<Hub>,
        ctx: AppContext,
        health_status: SharedHealthStatus,
        metrics: HttpMetrics,
    ) -> Self {
        Self {
            config,
            hub,
            ctx,
            health_status,
            metrics,
        }
    }

    /// Builds the token validator from the static token table in config.
    /// Tokens that fail to parse into an identity are skipped loudly.
    pub fn token_validator(&self) -> Arc<dyn TokenValidator> {
        let mut tokens = std::collections::HashMap::new();
        for entry in &self.config.tokens {
            match OwnerId::new(entry.user.clone()) {
                Ok(user) => {
                    tokens.insert(
                        entry.token.clone(),
                        AuthContext::new(user, entry.organization.clone(), entry.role),
                    );
                }
                Err(err) => {
                    tracing::error!("Skipping token for invalid user {}: {}", entry.user, err);
                }
            }
        }
        Arc::new(StaticTokenValidator::new(tokens))
    }
}

/// Convenience for tests: an identity with the given role.
pub fn test_identity(user: &str, role: Role) -> AuthContext {
    AuthContext::new(OwnerId::new(user).unwrap(), None, role)
}
