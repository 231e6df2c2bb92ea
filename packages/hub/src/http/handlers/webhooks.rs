use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;
use vertex_types::{AuthContext, DeliveryId, Webhook, WebhookDelivery, WebhookId};

use crate::http::error::HttpError;
use crate::http::state::HttpState;
use crate::subsystems::webhooks::{NewWebhook, WebhookPatch};

#[derive(Deserialize, Debug, ToSchema)]
pub struct DeliverRequest {
    /// Event type stamped on the delivery; defaults to `manual.delivery`
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[schema(value_type = Object)]
    pub payload: Value,
}

#[derive(Deserialize, Debug)]
pub struct HistoryQuery {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[utoipa::path(
    post,
    path = "/webhooks",
    request_body = NewWebhook,
    responses(
        (status = 201, description = "Webhook created", body = Webhook),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Name already taken"),
    )
)]
#[axum::debug_handler]
pub async fn handle_create_webhook(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<NewWebhook>,
) -> impl IntoResponse {
    state.metrics.record_request("create_webhook");
    match state.hub.create_webhook(&auth, req).await {
        Ok(webhook) => (StatusCode::CREATED, Json(webhook)).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/webhooks/{id}",
    responses((status = 200, description = "The webhook", body = Webhook))
)]
#[axum::debug_handler]
pub async fn handle_get_webhook(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<WebhookId>,
) -> impl IntoResponse {
    match state.hub.get_webhook(&auth, &id) {
        Ok(webhook) => Json(webhook).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/webhooks",
    responses((status = 200, description = "Webhooks visible to the caller", body = Vec<Webhook>))
)]
#[axum::debug_handler]
pub async fn handle_list_webhooks(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
) -> impl IntoResponse {
    match state.hub.list_webhooks(&auth) {
        Ok(webhooks) => Json(webhooks).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    put,
    path = "/webhooks/{id}",
    request_body = WebhookPatch,
    responses((status = 200, description = "Updated webhook", body = Webhook))
)]
#[axum::debug_handler]
pub async fn handle_update_webhook(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<WebhookId>,
    Json(patch): Json<WebhookPatch>,
) -> impl IntoResponse {
    match state.hub.update_webhook(&auth, &id, patch).await {
        Ok(webhook) => Json(webhook).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/webhooks/{id}",
    responses((status = 204, description = "Webhook deleted"))
)]
#[axum::debug_handler]
pub async fn handle_delete_webhook(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<WebhookId>,
) -> impl IntoResponse {
    match state.hub.delete_webhook(&auth, &id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/webhooks/{id}/deliver",
    request_body = DeliverRequest,
    responses(
        (status = 202, description = "Delivery enqueued", body = WebhookDelivery),
        (status = 400, description = "Payload over the size limit"),
    )
)]
#[axum::debug_handler]
pub async fn handle_deliver(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<WebhookId>,
    Json(req): Json<DeliverRequest>,
) -> impl IntoResponse {
    state.metrics.record_request("deliver");
    match state.hub.deliver(&auth, &id, req.kind, req.payload) {
        Ok(delivery) => (StatusCode::ACCEPTED, Json(delivery)).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/webhooks/{id}/deliveries",
    responses((status = 200, description = "Delivery history, newest first", body = Vec<WebhookDelivery>))
)]
#[axum::debug_handler]
pub async fn handle_delivery_history(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<WebhookId>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    match state
        .hub
        .delivery_history(&auth, &id, query.offset, query.limit.min(500))
    {
        Ok(deliveries) => Json(deliveries).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/deliveries/{id}/cancel",
    responses(
        (status = 200, description = "Delivery cancelled", body = WebhookDelivery),
        (status = 409, description = "Delivery already terminal"),
    )
)]
#[axum::debug_handler]
pub async fn handle_cancel_delivery(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<DeliveryId>,
) -> impl IntoResponse {
    match state.hub.cancel_delivery(&auth, &id) {
        Ok(delivery) => Json(delivery).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}
