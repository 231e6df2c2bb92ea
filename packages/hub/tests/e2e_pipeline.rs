mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use common::{fast_config, member, start_sink, test_hub, wait_for};
use serde_json::json;
use utils::context::AppContext;
use vertex_hub::init_tracing_tests;
use vertex_hub::subsystems::integrations::{IntegrationPatch, NewIntegration};
use vertex_hub::subsystems::notifications::{NewTemplate, SendNotification};
use vertex_hub::subsystems::reports::{NewReport, NewReportTemplate};
use vertex_hub::subsystems::webhooks::NewWebhook;
use vertex_types::{
    Channel, ExecutionStatus, IntegrationKind, NotificationStatus, OutputFormat, Priority,
    RecipientStatus, ReportSchedule, RetryPolicy,
};

/// One recipient's transport fails on the first cycle: the delivery goes
/// partial, the retry drains the failure, and the final status is sent.
#[test]
fn notification_partial_failure_recovers() {
    init_tracing_tests();

    let ctx = AppContext::new();
    let (hub, gateway) = ctx.rt.block_on(async {
        // the email gateway rejects b@x once, then accepts
        let b_failures = Arc::new(AtomicUsize::new(0));
        let gateway = start_sink(move |recorded, _| {
            if recorded.json()["recipient"] == "b@x"
                && b_failures.fetch_add(1, Ordering::SeqCst) == 0
            {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            }
        })
        .await;

        let mut config = fast_config();
        config
            .notifications
            .gateways
            .insert("email".to_string(), gateway.url("/email"));
        let hub = test_hub(&config);
        (hub, gateway)
    });
    hub.start(ctx.clone());

    ctx.rt.block_on(async {
        let auth = member("alice");
        let template = hub
            .create_template(
                &auth,
                NewTemplate {
                    name: "greeting".to_string(),
                    channel: Channel::Email,
                    subject: None,
                    body: "Hello {{name}}".to_string(),
                    required_params: vec!["name".to_string()],
                    category: None,
                },
            )
            .await
            .unwrap();

        let delivery = hub
            .send_notification(
                &auth,
                SendNotification {
                    template_id: template.id,
                    recipients: vec!["a@x".to_string(), "b@x".to_string()],
                    params: [("name".to_string(), "Ada".to_string())].into_iter().collect(),
                    priority: Priority::Normal,
                    scheduled_at: None,
                },
            )
            .unwrap();

        wait_for("the retry to recover the delivery", Duration::from_secs(5), || {
            hub.get_notification(&auth, &delivery.id)
                .map(|d| d.status == NotificationStatus::Sent)
                .unwrap_or(false)
        })
        .await;

        let settled = hub.get_notification(&auth, &delivery.id).unwrap();
        let a = &settled.results["a@x"];
        let b = &settled.results["b@x"];
        assert_eq!(a.status, RecipientStatus::Sent);
        assert_eq!(a.attempts, 1);
        assert_eq!(b.status, RecipientStatus::Sent);
        assert_eq!(b.attempts, 2);

        // rendered body reached the gateway
        let bodies: Vec<serde_json::Value> =
            gateway.seen().iter().map(|r| r.json()).collect();
        assert!(bodies.iter().all(|b| b["body"] == "Hello Ada"));
        // a@x once, b@x twice
        assert_eq!(gateway.hits(), 3);
    });

    ctx.kill();
}

/// Full report loop: the cron tick fires the report, the execution
/// writes an artifact, recipients get notified through the engine, and
/// `report.completed` reaches a subscribed webhook.
#[test]
fn scheduled_report_end_to_end() {
    init_tracing_tests();

    let ctx = AppContext::new();
    let (hub, gateway, sink, config) = ctx.rt.block_on(async {
        let gateway = start_sink(|_, _| StatusCode::OK).await;
        let sink = start_sink(|_, _| StatusCode::OK).await;

        let mut config = fast_config();
        config
            .notifications
            .gateways
            .insert("email".to_string(), gateway.url("/email"));
        let hub = test_hub(&config);
        (hub, gateway, sink, config)
    });
    hub.start(ctx.clone());

    ctx.rt.block_on(async {
        let auth = member("alice");

        // observe report.completed through the webhook path
        hub.create_webhook(
            &auth,
            NewWebhook {
                name: "report-events".to_string(),
                url: sink.url("/events"),
                events: vec!["report.*".to_string()],
                secret: None,
                retry: Some(RetryPolicy {
                    base_delay_ms: 10,
                    max_delay_ms: 100,
                    max_attempts: 3,
                    jitter: 0.2,
                }),
            },
        )
        .await
        .unwrap();

        let template = hub
            .create_report_template(
                &auth,
                NewReportTemplate {
                    name: "usage".to_string(),
                    content: "Usage for {{period}} generated at {{generated_at}}".to_string(),
                    required_params: vec!["period".to_string()],
                    supported_formats: vec![],
                    category: None,
                },
            )
            .await
            .unwrap();

        let report = hub
            .create_report(
                &auth,
                NewReport {
                    template_id: template.id,
                    name: "weekly-usage".to_string(),
                    params: [("period".to_string(), "this week".to_string())]
                        .into_iter()
                        .collect(),
                    schedule: Some(ReportSchedule {
                        cron: "* * * * * *".to_string(),
                        timezone: "UTC".to_string(),
                    }),
                    recipients: vec!["ops@x".to_string()],
                    format: OutputFormat::Html,
                },
            )
            .await
            .unwrap();

        wait_for("a completed execution", Duration::from_secs(10), || {
            hub.report_executions(&auth, &report.id)
                .map(|e| e.iter().any(|e| e.status == ExecutionStatus::Completed))
                .unwrap_or(false)
        })
        .await;

        let executions = hub.report_executions(&auth, &report.id).unwrap();
        let completed = executions
            .iter()
            .find(|e| e.status == ExecutionStatus::Completed)
            .unwrap();

        // artifact on disk, under the configured output dir
        let path = completed.output_path.clone().unwrap();
        assert!(path.starts_with(config.report_output_dir().to_string_lossy().as_ref()));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("Usage for this week"));
        assert_eq!(completed.bytes, content.len() as u64);

        // last_generated moved
        assert!(hub.get_report(&auth, &report.id).unwrap().last_generated.is_some());

        // the completion notification went out over the email gateway
        wait_for("the completion notification", Duration::from_secs(10), || {
            gateway.hits() >= 1
        })
        .await;
        let notification = gateway.seen().remove(0).json();
        assert_eq!(notification["recipient"], "ops@x");
        assert!(notification["body"]
            .as_str()
            .unwrap()
            .contains("weekly-usage"));

        // and report.completed reached the subscribed webhook
        wait_for("the lifecycle delivery", Duration::from_secs(10), || {
            sink.seen()
                .iter()
                .any(|r| r.header("x-event-type") == "report.completed")
        })
        .await;

        // stop firing when deactivated
        hub.update_report(
            &auth,
            &report.id,
            vertex_hub::subsystems::reports::ReportPatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let count_after_stop = hub.report_executions(&auth, &report.id).unwrap().len();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let executions = hub.report_executions(&auth, &report.id).unwrap();
        assert!(executions.len() <= count_after_stop + 1);
    });

    ctx.kill();
}

/// Config changes must evict the live connector: after pointing the
/// integration at a different endpoint, the very next execute hits the
/// new one.
#[test]
fn integration_update_evicts_connector() {
    init_tracing_tests();

    let config = fast_config();
    let hub = test_hub(&config);
    let ctx = AppContext::new();
    hub.start(ctx.clone());

    ctx.rt.block_on(async {
        let old_chat = start_sink(|_, _| StatusCode::OK).await;
        let new_chat = start_sink(|_, _| StatusCode::OK).await;
        let auth = member("alice");

        let integration = hub
            .create_integration(
                &auth,
                NewIntegration {
                    kind: IntegrationKind::Chat,
                    name: "team-chat".to_string(),
                    config: [("webhook_url".to_string(), json!(old_chat.url("/hook")))]
                        .into_iter()
                        .collect(),
                    credential_ref: "k1".to_string(),
                    tags: vec![],
                },
            )
            .await
            .unwrap();

        hub.execute_integration(&auth, &integration.id, "post_message", &json!({"text": "one"}))
            .await
            .unwrap();
        assert_eq!(old_chat.hits(), 1);

        hub.update_integration(
            &auth,
            &integration.id,
            IntegrationPatch {
                config: Some(
                    [("webhook_url".to_string(), json!(new_chat.url("/hook")))]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        hub.execute_integration(&auth, &integration.id, "post_message", &json!({"text": "two"}))
            .await
            .unwrap();

        // the stale instance never saw the second message
        assert_eq!(old_chat.hits(), 1);
        assert_eq!(new_chat.hits(), 1);
        assert_eq!(new_chat.seen()[0].json()["text"], "two");
    });

    ctx.kill();
}
