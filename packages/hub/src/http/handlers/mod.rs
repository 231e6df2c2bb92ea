pub mod events;
pub mod health;
pub mod info;
pub mod integrations;
pub mod notifications;
pub mod openapi;
pub mod reports;
pub mod webhooks;

use axum::http::StatusCode;
use axum::response::IntoResponse;

pub async fn handle_not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({
            "code": "not_found",
            "message": "no such route",
        })),
    )
}
