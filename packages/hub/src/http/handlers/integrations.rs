use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;
use vertex_types::{AuthContext, Integration, IntegrationId, TestOutcome};

use crate::http::{error::HttpResult, state::HttpState};
use crate::subsystems::integrations::{IntegrationPatch, NewIntegration};

#[derive(Deserialize, Debug, ToSchema)]
pub struct ExecuteRequest {
    pub op: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: Value,
}

#[utoipa::path(
    post,
    path = "/integrations",
    request_body = NewIntegration,
    responses(
        (status = 201, description = "Integration created", body = Integration),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Name already taken"),
    )
)]
#[axum::debug_handler]
pub async fn handle_create_integration(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<NewIntegration>,
) -> impl IntoResponse {
    match create_integration_inner(state, auth, req).await {
        Ok(integration) => (StatusCode::CREATED, Json(integration)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn create_integration_inner(
    state: HttpState,
    auth: AuthContext,
    req: NewIntegration,
) -> HttpResult<Integration> {
    state.metrics.record_request("create_integration");
    Ok(state.hub.create_integration(&auth, req).await?)
}

#[utoipa::path(
    get,
    path = "/integrations/{id}",
    responses(
        (status = 200, description = "The integration", body = Integration),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such integration"),
    )
)]
#[axum::debug_handler]
pub async fn handle_get_integration(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<IntegrationId>,
) -> impl IntoResponse {
    match state.hub.get_integration(&auth, &id) {
        Ok(integration) => Json(integration).into_response(),
        Err(e) => crate::http::error::HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/integrations",
    responses((status = 200, description = "Integrations visible to the caller", body = Vec<Integration>))
)]
#[axum::debug_handler]
pub async fn handle_list_integrations(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
) -> impl IntoResponse {
    match state.hub.list_integrations(&auth) {
        Ok(integrations) => Json(integrations).into_response(),
        Err(e) => crate::http::error::HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    put,
    path = "/integrations/{id}",
    request_body = IntegrationPatch,
    responses((status = 200, description = "Updated integration", body = Integration))
)]
#[axum::debug_handler]
pub async fn handle_update_integration(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<IntegrationId>,
    Json(patch): Json<IntegrationPatch>,
) -> impl IntoResponse {
    match state.hub.update_integration(&auth, &id, patch).await {
        Ok(integration) => Json(integration).into_response(),
        Err(e) => crate::http::error::HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/integrations/{id}",
    responses((status = 204, description = "Integration deleted"))
)]
#[axum::debug_handler]
pub async fn handle_delete_integration(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<IntegrationId>,
) -> impl IntoResponse {
    match state.hub.delete_integration(&auth, &id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => crate::http::error::HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/integrations/{id}/test",
    responses((status = 200, description = "Connectivity diagnostic", body = TestOutcome))
)]
#[axum::debug_handler]
pub async fn handle_test_integration(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<IntegrationId>,
) -> impl IntoResponse {
    match state.hub.test_integration(&auth, &id).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => crate::http::error::HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/integrations/{id}/execute",
    request_body = ExecuteRequest,
    responses(
        (status = 200, description = "Connector result"),
        (status = 400, description = "Unsupported operation or bad params"),
        (status = 502, description = "Connector failure"),
    )
)]
#[axum::debug_handler]
pub async fn handle_execute_integration(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<IntegrationId>,
    Json(req): Json<ExecuteRequest>,
) -> impl IntoResponse {
    match execute_integration_inner(state, auth, id, req).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn execute_integration_inner(
    state: HttpState,
    auth: AuthContext,
    id: IntegrationId,
    req: ExecuteRequest,
) -> HttpResult<Value> {
    state.metrics.record_request("execute_integration");
    Ok(state
        .hub
        .execute_integration(&auth, &id, &req.op, &req.params)
        .await?)
}

#[utoipa::path(
    get,
    path = "/integrations/{id}/capabilities",
    responses((status = 200, description = "Operation map declared by the connector"))
)]
#[axum::debug_handler]
pub async fn handle_integration_capabilities(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<IntegrationId>,
) -> impl IntoResponse {
    match state.hub.integration_capabilities(&auth, &id) {
        Ok(capabilities) => Json(capabilities).into_response(),
        Err(e) => crate::http::error::HttpError::from(e).into_response(),
    }
}
