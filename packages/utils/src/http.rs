pub mod auth {
    use std::sync::Arc;

    use axum::{
        body::Body,
        extract::{Request, State},
        http::{header, Response, StatusCode},
        middleware::Next,
        response::IntoResponse,
    };
    use vertex_types::AuthContext;

    /// Resolves a bearer token to an identity. The hub only consumes
    /// this interface; the real backplane lives elsewhere.
    pub trait TokenValidator: Send + Sync {
        fn validate(&self, token: &str) -> Option<AuthContext>;
    }

    /// Static token table, used for local deployments and tests.
    #[derive(Default)]
    pub struct StaticTokenValidator {
        tokens: std::collections::HashMap<String, AuthContext>,
    }

    impl StaticTokenValidator {
        pub fn new(tokens: std::collections::HashMap<String, AuthContext>) -> Self {
            Self { tokens }
        }
    }

    impl TokenValidator for StaticTokenValidator {
        fn validate(&self, token: &str) -> Option<AuthContext> {
            self.tokens.get(token).cloned()
        }
    }

    /// Bearer middleware: validates the token, stashes the resolved
    /// [`AuthContext`] in request extensions for handlers to extract.
    /// State is a tuple: (validator, realm)
    pub async fn require_bearer_identity(
        State((validator, realm)): State<(Arc<dyn TokenValidator>, String)>,
        mut req: Request,
        next: Next,
    ) -> impl IntoResponse {
        let unauthorized = || {
            Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .header(
                    header::WWW_AUTHENTICATE,
                    format!("Bearer realm=\"{}\"", realm),
                )
                .body(Body::from("Unauthorized"))
                .unwrap()
        };

        let header_val = match req.headers().get(header::AUTHORIZATION) {
            Some(h) => h,
            None => return unauthorized(),
        };

        let Ok(as_str) = header_val.to_str() else {
            return unauthorized();
        };
        let Some(token) = as_str.strip_prefix("Bearer ") else {
            return unauthorized();
        };

        match validator.validate(token) {
            Some(identity) => {
                req.extensions_mut().insert(identity);
                next.run(req).await
            }
            None => unauthorized(),
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use vertex_types::{OwnerId, Role};

        #[test]
        fn static_validator_lookup() {
            let identity = AuthContext::new(OwnerId::new("alice").unwrap(), None, Role::Member);
            let validator = StaticTokenValidator::new(
                [("token-1".to_string(), identity.clone())].into_iter().collect(),
            );

            assert_eq!(validator.validate("token-1"), Some(identity));
            assert_eq!(validator.validate("token-2"), None);
        }
    }
}
