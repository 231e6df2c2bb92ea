mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{fast_config, member, start_sink, test_hub, wait_for};
use serde_json::json;
use utils::context::AppContext;
use vertex_hub::init_tracing_tests;
use vertex_hub::subsystems::webhooks::NewWebhook;
use vertex_types::{signature, DeliveryStatus, EventId, RetryPolicy};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay_ms: 10,
        max_delay_ms: 100,
        max_attempts: 3,
        jitter: 0.2,
    }
}

/// A matching event produces exactly one signed POST and a `delivered`
/// record with attempts=1.
#[test]
fn webhook_happy_path() {
    init_tracing_tests();

    let config = fast_config();
    let hub = test_hub(&config);
    let ctx = AppContext::new();
    hub.start(ctx.clone());

    ctx.rt.block_on(async {
        let sink = start_sink(|_, _| StatusCode::OK).await;
        let auth = member("alice");

        let webhook = hub
            .create_webhook(
                &auth,
                NewWebhook {
                    name: "sink".to_string(),
                    url: sink.url("/ok"),
                    events: vec!["foo.bar".to_string()],
                    secret: Some("s".to_string()),
                    retry: Some(fast_retry()),
                },
            )
            .await
            .unwrap();

        let outcome = hub
            .publish_event(
                &auth,
                Some(EventId::new("e1").unwrap()),
                "foo.bar".to_string(),
                None,
                json!({"x": 1}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.webhook_deliveries, 1);

        wait_for("the sink to receive the delivery", Duration::from_secs(5), || {
            sink.hits() >= 1
        })
        .await;

        let recorded = sink.seen().remove(0);
        assert_eq!(recorded.path, "/ok");
        assert_eq!(recorded.header("x-event-id"), "e1");
        assert_eq!(recorded.header("x-event-type"), "foo.bar");
        assert_eq!(recorded.header("x-attempt"), "1");
        assert_eq!(recorded.header("content-type"), "application/json");
        assert!(!recorded.header("x-delivered-at").is_empty());

        // canonical body, and the signature receivers would recompute
        assert_eq!(recorded.body, br#"{"x":1}"#);
        let expected = format!("sha256={}", signature::sign(b"s", br#"{"x":1}"#));
        assert_eq!(recorded.header("x-signature"), expected);
        assert!(signature::verify(
            b"s",
            &recorded.body,
            recorded.header("x-signature")
        ));

        wait_for("the delivery record to settle", Duration::from_secs(5), || {
            hub.delivery_history(&auth, &webhook.id, 0, 10)
                .map(|h| {
                    h.first()
                        .map(|d| d.status == DeliveryStatus::Delivered && d.attempt == 1)
                        .unwrap_or(false)
                })
                .unwrap_or(false)
        })
        .await;

        // at-least-once, not more: no extra attempt shows up afterwards
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.hits(), 1);
    });

    ctx.kill();
}

/// A target that keeps failing consumes all allowed attempts and the
/// delivery finishes `exhausted` with three recorded attempts.
#[test]
fn webhook_retry_to_exhaust() {
    init_tracing_tests();

    let config = fast_config();
    let hub = test_hub(&config);
    let ctx = AppContext::new();
    hub.start(ctx.clone());

    ctx.rt.block_on(async {
        let sink = start_sink(|_, _| StatusCode::INTERNAL_SERVER_ERROR).await;
        let auth = member("alice");

        let webhook = hub
            .create_webhook(
                &auth,
                NewWebhook {
                    name: "broken-sink".to_string(),
                    url: sink.url("/fail"),
                    events: vec!["foo.bar".to_string()],
                    secret: Some("s".to_string()),
                    retry: Some(fast_retry()),
                },
            )
            .await
            .unwrap();

        hub.publish_event(
            &auth,
            None,
            "foo.bar".to_string(),
            None,
            json!({"x": 1}),
            None,
        )
        .await
        .unwrap();

        wait_for("the delivery to exhaust", Duration::from_secs(5), || {
            hub.delivery_history(&auth, &webhook.id, 0, 10)
                .map(|h| {
                    h.first()
                        .map(|d| d.status == DeliveryStatus::Exhausted)
                        .unwrap_or(false)
                })
                .unwrap_or(false)
        })
        .await;

        let delivery = hub
            .delivery_history(&auth, &webhook.id, 0, 10)
            .unwrap()
            .remove(0);
        assert_eq!(delivery.attempt, 3);
        // last response body is retained for history
        assert!(delivery.response_summary.unwrap().starts_with("500"));

        assert_eq!(sink.hits(), 3);
        let attempts: Vec<String> = sink
            .seen()
            .iter()
            .map(|r| r.header("x-attempt").to_string())
            .collect();
        assert_eq!(attempts, vec!["1", "2", "3"]);

        // the event id stayed stable across retries for receiver dedup
        let ids: Vec<String> = sink
            .seen()
            .iter()
            .map(|r| r.header("x-event-id").to_string())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        // exhausted is terminal: no further attempts arrive
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sink.hits(), 3);
    });

    ctx.kill();
}

/// Pending deliveries can be cancelled; terminal ones cannot.
#[test]
fn webhook_cancel_pending_delivery() {
    init_tracing_tests();

    let mut config = fast_config();
    // slow polling so the delivery stays pending long enough to cancel
    config.webhooks.poll_interval_ms = 5_000;
    let hub = test_hub(&config);
    let ctx = AppContext::new();
    hub.start(ctx.clone());

    ctx.rt.block_on(async {
        let sink = start_sink(|_, _| StatusCode::OK).await;
        let auth = member("alice");

        let webhook = hub
            .create_webhook(
                &auth,
                NewWebhook {
                    name: "sink".to_string(),
                    url: sink.url("/ok"),
                    events: vec!["foo.*".to_string()],
                    secret: None,
                    retry: None,
                },
            )
            .await
            .unwrap();

        let delivery = hub
            .deliver(&auth, &webhook.id, None, json!({"x": 1}))
            .unwrap();

        let cancelled = hub.cancel_delivery(&auth, &delivery.id).unwrap();
        assert_eq!(cancelled.status, DeliveryStatus::Cancelled);

        // a second cancel hits the terminal-state guard
        assert!(hub.cancel_delivery(&auth, &delivery.id).is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.hits(), 0);
    });

    ctx.kill();
}

/// Subscription fan-out with payload predicates: the glob subscription
/// sees everything under `foo.`, the filtered one only `foo.bar` with
/// `x == 1`.
#[test]
fn event_fan_out_with_filter() {
    init_tracing_tests();

    let config = fast_config();
    let hub = test_hub(&config);
    let ctx = AppContext::new();
    hub.start(ctx.clone());

    ctx.rt.block_on(async {
        let sink = start_sink(|_, _| StatusCode::OK).await;
        let auth = member("alice");

        // callbacks land on webhooks whose own patterns never match, so
        // every delivery here came through a subscription
        let w1 = hub
            .create_webhook(
                &auth,
                NewWebhook {
                    name: "wide".to_string(),
                    url: sink.url("/wide"),
                    events: vec!["subscription.only".to_string()],
                    secret: None,
                    retry: Some(fast_retry()),
                },
            )
            .await
            .unwrap();
        let w2 = hub
            .create_webhook(
                &auth,
                NewWebhook {
                    name: "narrow".to_string(),
                    url: sink.url("/narrow"),
                    events: vec!["subscription.only".to_string()],
                    secret: None,
                    retry: Some(fast_retry()),
                },
            )
            .await
            .unwrap();

        hub.subscribe(
            &auth,
            vertex_hub::subsystems::events::NewSubscription {
                pattern: "foo.*".to_string(),
                filters: Default::default(),
                callback: vertex_types::Callback::Webhook { webhook_id: w1.id },
            },
        )
        .await
        .unwrap();
        hub.subscribe(
            &auth,
            vertex_hub::subsystems::events::NewSubscription {
                pattern: "foo.bar".to_string(),
                filters: [("x".to_string(), json!(1))].into_iter().collect(),
                callback: vertex_types::Callback::Webhook { webhook_id: w2.id },
            },
        )
        .await
        .unwrap();

        let both = hub
            .publish_event(&auth, None, "foo.bar".into(), None, json!({"x": 1}), None)
            .await
            .unwrap();
        assert_eq!(both.matched, 2);

        let wide_only = hub
            .publish_event(&auth, None, "foo.baz".into(), None, json!({"x": 1}), None)
            .await
            .unwrap();
        assert_eq!(wide_only.matched, 1);

        let filter_miss = hub
            .publish_event(&auth, None, "foo.bar".into(), None, json!({"x": 2}), None)
            .await
            .unwrap();
        assert_eq!(filter_miss.matched, 1);

        wait_for("all four deliveries", Duration::from_secs(5), || sink.hits() >= 4).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let wide_hits = sink.seen().iter().filter(|r| r.path == "/wide").count();
        let narrow_hits = sink.seen().iter().filter(|r| r.path == "/narrow").count();
        assert_eq!(wide_hits, 3);
        assert_eq!(narrow_hits, 1);
    });

    ctx.kill();
}
