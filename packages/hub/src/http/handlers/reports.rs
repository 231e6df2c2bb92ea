use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Serialize;
use utoipa::ToSchema;
use vertex_types::{
    AuthContext, ExecutionId, Report, ReportExecution, ReportId, ReportTemplate, ReportTemplateId,
};

use crate::http::error::HttpError;
use crate::http::state::HttpState;
use crate::subsystems::reports::{NewReport, NewReportTemplate, ReportPatch};

#[derive(Serialize, Debug, ToSchema)]
pub struct RunReportResponse {
    /// Absent when the report already had an execution in flight
    pub execution_id: Option<ExecutionId>,
}

#[utoipa::path(
    post,
    path = "/reports/templates",
    request_body = NewReportTemplate,
    responses((status = 201, description = "Report template created", body = ReportTemplate))
)]
#[axum::debug_handler]
pub async fn handle_create_report_template(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<NewReportTemplate>,
) -> impl IntoResponse {
    state.metrics.record_request("create_report_template");
    match state.hub.create_report_template(&auth, req).await {
        Ok(template) => (StatusCode::CREATED, Json(template)).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/reports/templates/{id}",
    responses((status = 200, description = "The report template", body = ReportTemplate))
)]
#[axum::debug_handler]
pub async fn handle_get_report_template(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ReportTemplateId>,
) -> impl IntoResponse {
    match state.hub.get_report_template(&auth, &id) {
        Ok(template) => Json(template).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/reports/templates/{id}",
    responses((status = 204, description = "Report template deleted"))
)]
#[axum::debug_handler]
pub async fn handle_delete_report_template(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ReportTemplateId>,
) -> impl IntoResponse {
    match state.hub.delete_report_template(&auth, &id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/reports",
    request_body = NewReport,
    responses(
        (status = 201, description = "Report created", body = Report),
        (status = 400, description = "Bad schedule or unsupported format"),
    )
)]
#[axum::debug_handler]
pub async fn handle_create_report(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<NewReport>,
) -> impl IntoResponse {
    state.metrics.record_request("create_report");
    match state.hub.create_report(&auth, req).await {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/reports",
    responses((status = 200, description = "Reports visible to the caller", body = Vec<Report>))
)]
#[axum::debug_handler]
pub async fn handle_list_reports(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
) -> impl IntoResponse {
    match state.hub.list_reports(&auth) {
        Ok(reports) => Json(reports).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/reports/{id}",
    responses((status = 200, description = "The report", body = Report))
)]
#[axum::debug_handler]
pub async fn handle_get_report(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ReportId>,
) -> impl IntoResponse {
    match state.hub.get_report(&auth, &id) {
        Ok(report) => Json(report).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    put,
    path = "/reports/{id}",
    request_body = ReportPatch,
    responses((status = 200, description = "Updated report", body = Report))
)]
#[axum::debug_handler]
pub async fn handle_update_report(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ReportId>,
    Json(patch): Json<ReportPatch>,
) -> impl IntoResponse {
    match state.hub.update_report(&auth, &id, patch).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/reports/{id}",
    responses((status = 204, description = "Report deleted"))
)]
#[axum::debug_handler]
pub async fn handle_delete_report(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ReportId>,
) -> impl IntoResponse {
    match state.hub.delete_report(&auth, &id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/reports/{id}/run",
    responses(
        (status = 202, description = "Execution started (or skipped when one is in flight)", body = RunReportResponse),
    )
)]
#[axum::debug_handler]
pub async fn handle_run_report(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ReportId>,
) -> impl IntoResponse {
    state.metrics.record_request("run_report");
    match state.hub.run_report(&auth, &state.ctx, &id) {
        Ok(execution_id) => (
            StatusCode::ACCEPTED,
            Json(RunReportResponse { execution_id }),
        )
            .into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/reports/{id}/executions",
    responses((status = 200, description = "Execution history, newest first", body = Vec<ReportExecution>))
)]
#[axum::debug_handler]
pub async fn handle_report_executions(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ReportId>,
) -> impl IntoResponse {
    match state.hub.report_executions(&auth, &id) {
        Ok(executions) => Json(executions).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/reports/executions/{id}/cancel",
    responses(
        (status = 200, description = "Execution cancelled", body = ReportExecution),
        (status = 409, description = "Execution already terminal"),
    )
)]
#[axum::debug_handler]
pub async fn handle_cancel_execution(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<ExecutionId>,
) -> impl IntoResponse {
    match state.hub.cancel_execution(&auth, &id) {
        Ok(execution) => Json(execution).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}
