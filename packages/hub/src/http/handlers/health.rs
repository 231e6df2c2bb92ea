use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::instrument;

use crate::dispatcher::MetricsSnapshot;
use crate::health::HealthStatus;
use crate::http::state::HttpState;

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Liveness + subsystem health", body = HealthStatus))
)]
#[instrument(level = "debug", skip(state))]
pub async fn handle_health(State(state): State<HttpState>) -> impl IntoResponse {
    let health_status = state.health_status.read().unwrap().clone();
    Json(health_status)
}

#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Ready to serve"),
        (status = 503, description = "Subsystems still starting"),
    )
)]
#[instrument(level = "debug", skip(state))]
pub async fn handle_ready(State(state): State<HttpState>) -> impl IntoResponse {
    let ready = state.health_status.read().unwrap().is_healthy();
    if ready {
        StatusCode::OK.into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, description = "Live operational counters", body = MetricsSnapshot))
)]
#[instrument(level = "debug", skip(state))]
pub async fn handle_metrics(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.hub.metrics_snapshot().await)
}
