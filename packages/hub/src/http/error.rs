use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::dispatcher::HubError;

/// Structured error body returned on every failure. Stack traces and
/// internal detail never cross this boundary.
#[derive(Serialize, Debug, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub details: Option<Value>,
}

pub struct HttpError(pub HubError);

pub type HttpResult<T> = Result<T, HttpError>;

impl From<HubError> for HttpError {
    fn from(err: HubError) -> Self {
        Self(err)
    }
}

// subsystem errors fold through HubError so handlers can use `?` on
// whichever layer they call into
macro_rules! http_error_from {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for HttpError {
                fn from(err: $err) -> Self {
                    Self(err.into())
                }
            }
        )*
    };
}

http_error_from!(
    crate::stores::StoreError,
    crate::subsystems::integrations::error::IntegrationError,
    crate::subsystems::integrations::error::ConnectorError,
    crate::subsystems::webhooks::error::WebhookError,
    crate::subsystems::notifications::error::NotificationError,
    crate::subsystems::events::error::EventError,
    crate::subsystems::reports::error::ReportError,
);

impl HttpError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            HubError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            HubError::TemplateRender(_) => (StatusCode::BAD_REQUEST, "template_render_error"),
            HubError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            HubError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            HubError::Authorization => (StatusCode::FORBIDDEN, "forbidden"),
            HubError::Connector(_) => (StatusCode::BAD_GATEWAY, "connector_error"),
            HubError::Transport(_) => (StatusCode::BAD_GATEWAY, "transport_error"),
            HubError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            HubError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            HubError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // internals are logged, not leaked
        let message = match &self.0 {
            HubError::Internal(detail) => {
                tracing::error!("Internal error at API boundary: {}", detail);
                "internal error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            code: code.to_string(),
            message,
            details: None,
        };

        let mut response = (status, Json(body)).into_response();
        if let HubError::RateLimited {
            retry_after_secs: Some(secs),
        } = self.0
        {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (HubError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (HubError::Conflict("x".into()), StatusCode::CONFLICT),
            (HubError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (HubError::Authorization, StatusCode::FORBIDDEN),
            (HubError::Connector("x".into()), StatusCode::BAD_GATEWAY),
            (HubError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (
                HubError::RateLimited {
                    retry_after_secs: None,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (HubError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(HttpError(err).status_and_code().0, expected);
        }
    }
}
