use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::http::state::HttpState;

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct InfoResponse {
    pub name: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/info",
    responses((status = 200, description = "Service name and version", body = InfoResponse))
)]
#[axum::debug_handler]
pub async fn handle_info(State(_state): State<HttpState>) -> impl IntoResponse {
    Json(InfoResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
