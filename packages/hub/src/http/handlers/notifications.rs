use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use vertex_types::{AuthContext, NotificationDelivery, NotificationId, NotificationTemplate, TemplateId};

use crate::http::error::HttpError;
use crate::http::state::HttpState;
use crate::subsystems::notifications::{NewTemplate, SendNotification};

#[utoipa::path(
    post,
    path = "/notifications/templates",
    request_body = NewTemplate,
    responses(
        (status = 201, description = "Template created", body = NotificationTemplate),
        (status = 400, description = "Template failed validation"),
        (status = 409, description = "Name already taken"),
    )
)]
#[axum::debug_handler]
pub async fn handle_create_template(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<NewTemplate>,
) -> impl IntoResponse {
    state.metrics.record_request("create_template");
    match state.hub.create_template(&auth, req).await {
        Ok(template) => (StatusCode::CREATED, Json(template)).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/notifications/templates",
    responses((status = 200, description = "Templates visible to the caller", body = Vec<NotificationTemplate>))
)]
#[axum::debug_handler]
pub async fn handle_list_templates(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
) -> impl IntoResponse {
    match state.hub.list_templates(&auth) {
        Ok(templates) => Json(templates).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/notifications/templates/{id}",
    responses((status = 200, description = "The template", body = NotificationTemplate))
)]
#[axum::debug_handler]
pub async fn handle_get_template(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<TemplateId>,
) -> impl IntoResponse {
    match state.hub.get_template(&auth, &id) {
        Ok(template) => Json(template).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/notifications/templates/{id}",
    responses((status = 204, description = "Template deleted"))
)]
#[axum::debug_handler]
pub async fn handle_delete_template(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<TemplateId>,
) -> impl IntoResponse {
    match state.hub.delete_template(&auth, &id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/notifications/send",
    request_body = SendNotification,
    responses(
        (status = 202, description = "Delivery enqueued", body = NotificationDelivery),
        (status = 400, description = "Missing required params or no recipients"),
    )
)]
#[axum::debug_handler]
pub async fn handle_send_notification(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<SendNotification>,
) -> impl IntoResponse {
    state.metrics.record_request("send_notification");
    match state.hub.send_notification(&auth, req) {
        Ok(delivery) => (StatusCode::ACCEPTED, Json(delivery)).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/notifications/{id}",
    responses((status = 200, description = "Delivery with per-recipient results", body = NotificationDelivery))
)]
#[axum::debug_handler]
pub async fn handle_get_notification(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<NotificationId>,
) -> impl IntoResponse {
    match state.hub.get_notification(&auth, &id) {
        Ok(delivery) => Json(delivery).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/notifications/{id}/cancel",
    responses(
        (status = 200, description = "Delivery cancelled", body = NotificationDelivery),
        (status = 409, description = "Delivery already terminal"),
    )
)]
#[axum::debug_handler]
pub async fn handle_cancel_notification(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<NotificationId>,
) -> impl IntoResponse {
    match state.hub.cancel_notification(&auth, &id) {
        Ok(delivery) => Json(delivery).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}
