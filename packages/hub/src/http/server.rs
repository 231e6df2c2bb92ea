use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
};
use axum_tracing_opentelemetry::middleware::OtelAxumLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utils::context::AppContext;
use utils::telemetry::HttpMetrics;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use wildmatch::WildMatch;

use super::handlers::{
    events, handle_not_found, health, info, integrations, notifications, openapi::ApiDoc, reports,
    webhooks,
};
use super::state::HttpState;
use crate::config::Config;
use crate::dispatcher::Hub;
use crate::health::SharedHealthStatus;

const REALM: &str = "vertex";

/// Binds and serves the API until the kill signal fires. Owns the
/// calling thread; the router factory below is shared with tests.
pub fn start(
    ctx: AppContext,
    config: Config,
    hub: Arc<Hub>,
    health_status: SharedHealthStatus,
    metrics: HttpMetrics,
) -> anyhow::Result<()> {
    let rt = ctx.rt.clone();

    rt.block_on(async move {
        let bind_addr = format!("{}:{}", config.host, config.port);
        let mut kill = ctx.get_kill_receiver();

        let router = make_router(config, hub, ctx, health_status, metrics)?;
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        tracing::info!("API listening on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = kill.recv().await;
                tracing::info!("API server draining connections");
            })
            .await?;

        Ok(())
    })
}

// this is called from main and tests
pub fn make_router(
    config: Config,
    hub: Arc<Hub>,
    ctx: AppContext,
    health_status: SharedHealthStatus,
    metrics: HttpMetrics,
) -> anyhow::Result<axum::Router> {
    let state = HttpState::new(config.clone(), hub, ctx, health_status, metrics);

    // operational routes stay open
    let public = axum::Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(OtelAxumLayer::default())
        .route("/health", get(health::handle_health))
        .route("/ready", get(health::handle_ready))
        .route("/metrics", get(health::handle_metrics))
        .route("/info", get(info::handle_info));

    // everything else resolves the caller's identity first
    let protected = axum::Router::new()
        .route(
            "/integrations",
            post(integrations::handle_create_integration)
                .get(integrations::handle_list_integrations),
        )
        .route(
            "/integrations/{id}",
            get(integrations::handle_get_integration)
                .put(integrations::handle_update_integration)
                .delete(integrations::handle_delete_integration),
        )
        .route(
            "/integrations/{id}/test",
            post(integrations::handle_test_integration),
        )
        .route(
            "/integrations/{id}/execute",
            post(integrations::handle_execute_integration),
        )
        .route(
            "/integrations/{id}/capabilities",
            get(integrations::handle_integration_capabilities),
        )
        .route(
            "/webhooks",
            post(webhooks::handle_create_webhook).get(webhooks::handle_list_webhooks),
        )
        .route(
            "/webhooks/{id}",
            get(webhooks::handle_get_webhook)
                .put(webhooks::handle_update_webhook)
                .delete(webhooks::handle_delete_webhook),
        )
        .route("/webhooks/{id}/deliver", post(webhooks::handle_deliver))
        .route(
            "/webhooks/{id}/deliveries",
            get(webhooks::handle_delivery_history),
        )
        .route(
            "/deliveries/{id}/cancel",
            post(webhooks::handle_cancel_delivery),
        )
        .route(
            "/notifications/templates",
            post(notifications::handle_create_template).get(notifications::handle_list_templates),
        )
        .route(
            "/notifications/templates/{id}",
            get(notifications::handle_get_template).delete(notifications::handle_delete_template),
        )
        .route(
            "/notifications/send",
            post(notifications::handle_send_notification),
        )
        .route(
            "/notifications/{id}",
            get(notifications::handle_get_notification),
        )
        .route(
            "/notifications/{id}/cancel",
            post(notifications::handle_cancel_notification),
        )
        .route("/events/subscribe", post(events::handle_subscribe))
        .route(
            "/events/subscriptions",
            get(events::handle_list_subscriptions),
        )
        .route(
            "/events/subscriptions/{id}",
            delete(events::handle_unsubscribe),
        )
        .route("/events/publish", post(events::handle_publish))
        .route("/events", get(events::handle_events_in_range))
        .route(
            "/reports/templates",
            post(reports::handle_create_report_template),
        )
        .route(
            "/reports/templates/{id}",
            get(reports::handle_get_report_template)
                .delete(reports::handle_delete_report_template),
        )
        .route(
            "/reports",
            post(reports::handle_create_report).get(reports::handle_list_reports),
        )
        .route(
            "/reports/{id}",
            get(reports::handle_get_report)
                .put(reports::handle_update_report)
                .delete(reports::handle_delete_report),
        )
        .route("/reports/{id}/run", post(reports::handle_run_report))
        .route(
            "/reports/{id}/executions",
            get(reports::handle_report_executions),
        )
        .route(
            "/reports/executions/{id}/cancel",
            post(reports::handle_cancel_execution),
        );

    let validator = state.token_validator();
    let protected = protected.layer(middleware::from_fn_with_state(
        (validator, REALM.to_string()),
        utils::http::auth::require_bearer_identity,
    ));

    let public = public.with_state(state.clone());
    let protected = protected.with_state(state);

    let mut router = public.merge(protected).fallback(handle_not_found);

    if let Some(cors) = cors_layer(&config) {
        router = router.layer(cors);
    }

    Ok(router)
}

fn cors_layer(config: &Config) -> Option<CorsLayer> {
    let patterns: Vec<WildMatch> = config
        .cors_allowed_origins
        .iter()
        .map(|origin| WildMatch::new(origin))
        .collect();
    if patterns.is_empty() {
        return None;
    }

    // origins are configured as wildcards, which rules out a static
    // allow-list; match each request's Origin against the patterns
    let allow_origin = tower_http::cors::AllowOrigin::predicate(move |origin, _parts| {
        origin
            .to_str()
            .is_ok_and(|origin| patterns.iter().any(|pattern| pattern.matches(origin)))
    });

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
    )
}
