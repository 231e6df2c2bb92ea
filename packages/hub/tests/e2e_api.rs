mod common;

use common::{fast_config, test_hub};
use serde_json::json;
use utils::context::AppContext;
use utils::telemetry::Metrics;
use vertex_hub::config::{Config, TokenEntry};
use vertex_hub::health::{create_shared_health_status, mark_subsystems_started};
use vertex_hub::http::server::make_router;
use vertex_hub::init_tracing_tests;
use vertex_types::Role;

fn with_tokens(mut config: Config) -> Config {
    config.tokens = vec![
        TokenEntry {
            token: "alice-token".to_string(),
            user: "alice".to_string(),
            organization: None,
            role: Role::Member,
        },
        TokenEntry {
            token: "bob-token".to_string(),
            user: "bob".to_string(),
            organization: None,
            role: Role::Member,
        },
        TokenEntry {
            token: "viewer-token".to_string(),
            user: "carol".to_string(),
            organization: None,
            role: Role::Viewer,
        },
    ];
    config
}

async fn serve(config: Config, ctx: AppContext) -> String {
    let hub = test_hub(&config);
    hub.start(ctx.clone());

    let health_status = create_shared_health_status();
    mark_subsystems_started(&health_status);

    let metrics = Metrics::new(opentelemetry::global::meter("e2e-api"));
    let router = make_router(config, hub, ctx, health_status, metrics.http).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    format!("http://{}", addr)
}

#[test]
fn api_auth_and_ownership() {
    init_tracing_tests();

    let ctx = AppContext::new();
    ctx.rt.clone().block_on(async {
        let base = serve(with_tokens(fast_config()), ctx.clone()).await;
        let client = reqwest::Client::new();

        // operational routes are open
        let health = client.get(format!("{}/health", base)).send().await.unwrap();
        assert_eq!(health.status(), 200);
        let ready = client.get(format!("{}/ready", base)).send().await.unwrap();
        assert_eq!(ready.status(), 200);

        // everything else requires a bearer token
        let unauthorized = client
            .get(format!("{}/webhooks", base))
            .send()
            .await
            .unwrap();
        assert_eq!(unauthorized.status(), 401);
        assert!(unauthorized
            .headers()
            .get("www-authenticate")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("Bearer"));

        let webhook_body = json!({
            "name": "ci-hook",
            "url": "http://sink.example/hook",
            "events": ["ci.*"],
            "secret": "s"
        });

        // create as alice
        let created = client
            .post(format!("{}/webhooks", base))
            .bearer_auth("alice-token")
            .json(&webhook_body)
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), 201);
        let webhook: serde_json::Value = created.json().await.unwrap();
        let webhook_id = webhook["id"].as_str().unwrap().to_string();

        // duplicate name for the same owner conflicts
        let duplicate = client
            .post(format!("{}/webhooks", base))
            .bearer_auth("alice-token")
            .json(&webhook_body)
            .send()
            .await
            .unwrap();
        assert_eq!(duplicate.status(), 409);

        // bob can't see or touch alice's webhook
        let cross_get = client
            .get(format!("{}/webhooks/{}", base, webhook_id))
            .bearer_auth("bob-token")
            .send()
            .await
            .unwrap();
        assert_eq!(cross_get.status(), 403);

        let cross_delete = client
            .delete(format!("{}/webhooks/{}", base, webhook_id))
            .bearer_auth("bob-token")
            .send()
            .await
            .unwrap();
        assert_eq!(cross_delete.status(), 403);

        // viewers can't create
        let viewer_create = client
            .post(format!("{}/webhooks", base))
            .bearer_auth("viewer-token")
            .json(&json!({
                "name": "viewer-hook",
                "url": "http://sink.example/hook",
                "events": ["x.*"]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(viewer_create.status(), 403);

        // missing entity is 404, bad body is 400
        let missing = client
            .get(format!(
                "{}/webhooks/00000000-0000-7000-8000-000000000000",
                base
            ))
            .bearer_auth("alice-token")
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
        let error_body: serde_json::Value = missing.json().await.unwrap();
        assert_eq!(error_body["code"], "not_found");

        let invalid = client
            .post(format!("{}/webhooks", base))
            .bearer_auth("alice-token")
            .json(&json!({"name": "x", "url": "not a url", "events": ["a"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(invalid.status(), 400);
    });

    ctx.kill();
}

#[test]
fn api_publish_and_payload_limit() {
    init_tracing_tests();

    let ctx = AppContext::new();
    ctx.rt.clone().block_on(async {
        let mut config = with_tokens(fast_config());
        // canonical form of {"d":"<n chars>"} is 8 + n bytes
        config.webhooks.max_payload_bytes = 64;
        let base = serve(config, ctx.clone()).await;
        let client = reqwest::Client::new();

        // publish is accepted-but-async
        let accepted = client
            .post(format!("{}/events/publish", base))
            .bearer_auth("alice-token")
            .json(&json!({"type": "foo.bar", "payload": {"x": 1}}))
            .send()
            .await
            .unwrap();
        assert_eq!(accepted.status(), 202);
        let outcome: serde_json::Value = accepted.json().await.unwrap();
        assert_eq!(outcome["matched"], 0);

        // a payload at exactly the cap is accepted
        let at_limit = client
            .post(format!("{}/events/publish", base))
            .bearer_auth("alice-token")
            .json(&json!({"type": "foo.bar", "payload": {"d": "x".repeat(56)}}))
            .send()
            .await
            .unwrap();
        assert_eq!(at_limit.status(), 202);

        // one byte over is rejected
        let over_limit = client
            .post(format!("{}/events/publish", base))
            .bearer_auth("alice-token")
            .json(&json!({"type": "foo.bar", "payload": {"d": "x".repeat(57)}}))
            .send()
            .await
            .unwrap();
        assert_eq!(over_limit.status(), 400);
        let error_body: serde_json::Value = over_limit.json().await.unwrap();
        assert_eq!(error_body["code"], "validation_error");

        // an empty type is rejected too
        let empty_kind = client
            .post(format!("{}/events/publish", base))
            .bearer_auth("alice-token")
            .json(&json!({"type": "", "payload": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(empty_kind.status(), 400);

        // operational metrics snapshot is reachable without auth
        let metrics = client.get(format!("{}/metrics", base)).send().await.unwrap();
        assert_eq!(metrics.status(), 200);
        let snapshot: serde_json::Value = metrics.json().await.unwrap();
        assert!(snapshot["scheduled_reports"].is_number());
    });

    ctx.kill();
}
