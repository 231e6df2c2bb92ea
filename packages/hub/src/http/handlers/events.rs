use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;
use vertex_types::{AuthContext, Event, EventId, Subscription, SubscriptionId};

use crate::http::error::HttpError;
use crate::http::state::HttpState;
use crate::subsystems::events::{NewSubscription, PublishOutcome};

#[derive(Deserialize, Debug, ToSchema)]
pub struct PublishRequest {
    /// Caller-supplied id for receiver-side deduplication; generated
    /// when absent
    #[serde(default)]
    pub id: Option<EventId>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub source: Option<String>,
    #[schema(value_type = Object)]
    pub payload: Value,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct EventRangeQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[utoipa::path(
    post,
    path = "/events/subscribe",
    request_body = NewSubscription,
    responses(
        (status = 201, description = "Subscription registered", body = Subscription),
        (status = 400, description = "Pattern or callback failed validation"),
    )
)]
#[axum::debug_handler]
pub async fn handle_subscribe(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<NewSubscription>,
) -> impl IntoResponse {
    state.metrics.record_request("subscribe");
    match state.hub.subscribe(&auth, req).await {
        Ok(subscription) => (StatusCode::CREATED, Json(subscription)).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/events/subscriptions",
    responses((status = 200, description = "Active subscriptions visible to the caller", body = Vec<Subscription>))
)]
#[axum::debug_handler]
pub async fn handle_list_subscriptions(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
) -> impl IntoResponse {
    match state.hub.list_subscriptions(&auth) {
        Ok(subscriptions) => Json(subscriptions).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/events/subscriptions/{id}",
    responses((status = 204, description = "Subscription removed"))
)]
#[axum::debug_handler]
pub async fn handle_unsubscribe(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<SubscriptionId>,
) -> impl IntoResponse {
    match state.hub.unsubscribe(&auth, &id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/events/publish",
    request_body = PublishRequest,
    responses(
        (status = 202, description = "Event accepted for fan-out", body = PublishOutcome),
        (status = 400, description = "Empty type or oversized payload"),
    )
)]
#[axum::debug_handler]
pub async fn handle_publish(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<PublishRequest>,
) -> impl IntoResponse {
    state.metrics.record_request("publish");
    match state
        .hub
        .publish_event(&auth, req.id, req.kind, req.source, req.payload, req.correlation_id)
        .await
    {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/events",
    responses((status = 200, description = "Persisted events in the time range", body = Vec<Event>))
)]
#[axum::debug_handler]
pub async fn handle_events_in_range(
    State(state): State<HttpState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<EventRangeQuery>,
) -> impl IntoResponse {
    match state.hub.events_in_range(&auth, query.start, query.end) {
        Ok(events) => Json(events).into_response(),
        Err(e) => HttpError::from(e).into_response(),
    }
}
