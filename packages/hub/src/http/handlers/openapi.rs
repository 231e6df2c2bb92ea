use super::*;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        integrations::handle_create_integration,
        integrations::handle_get_integration,
        integrations::handle_list_integrations,
        integrations::handle_update_integration,
        integrations::handle_delete_integration,
        integrations::handle_test_integration,
        integrations::handle_execute_integration,
        integrations::handle_integration_capabilities,
        webhooks::handle_create_webhook,
        webhooks::handle_get_webhook,
        webhooks::handle_list_webhooks,
        webhooks::handle_update_webhook,
        webhooks::handle_delete_webhook,
        webhooks::handle_deliver,
        webhooks::handle_delivery_history,
        webhooks::handle_cancel_delivery,
        notifications::handle_create_template,
        notifications::handle_list_templates,
        notifications::handle_get_template,
        notifications::handle_delete_template,
        notifications::handle_send_notification,
        notifications::handle_get_notification,
        notifications::handle_cancel_notification,
        events::handle_subscribe,
        events::handle_list_subscriptions,
        events::handle_unsubscribe,
        events::handle_publish,
        events::handle_events_in_range,
        reports::handle_create_report_template,
        reports::handle_get_report_template,
        reports::handle_delete_report_template,
        reports::handle_create_report,
        reports::handle_list_reports,
        reports::handle_get_report,
        reports::handle_update_report,
        reports::handle_delete_report,
        reports::handle_run_report,
        reports::handle_report_executions,
        reports::handle_cancel_execution,
        health::handle_health,
        health::handle_ready,
        health::handle_metrics,
        info::handle_info,
    ),
    info(
        title = "Vertex Hub API",
        description = "API documentation for the Vertex integration hub"
    )
)]
pub struct ApiDoc;
