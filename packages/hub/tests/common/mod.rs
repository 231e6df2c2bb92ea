// each test binary uses a different slice of these helpers
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use utils::secrets::StaticSecretResolver;
use utils::telemetry::Metrics;
use vertex_hub::config::Config;
use vertex_hub::dispatcher::Hub;
use vertex_types::{AuthContext, OwnerId, Role};

/// One request the sink saw: lowercased headers plus the raw body.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

type Responder = dyn Fn(&Recorded, usize) -> StatusCode + Send + Sync;

struct SinkState {
    seen: Mutex<Vec<Recorded>>,
    responder: Box<Responder>,
}

/// A live HTTP endpoint recording everything POSTed at it. The responder
/// decides the status per request (given the request and its 0-based
/// index), which is how tests simulate flaky or broken receivers.
#[derive(Clone)]
pub struct Sink {
    pub addr: SocketAddr,
    state: Arc<SinkState>,
}

impl Sink {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn seen(&self) -> Vec<Recorded> {
        self.state.seen.lock().unwrap().clone()
    }

    pub fn hits(&self) -> usize {
        self.state.seen.lock().unwrap().len()
    }
}

async fn record(State(state): State<Arc<SinkState>>, req: axum::extract::Request) -> impl IntoResponse {
    let path = req.uri().path().to_string();
    let headers = req
        .headers()
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_ascii_lowercase(),
                v.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();
    let body = axum::body::to_bytes(req.into_body(), 1024 * 1024)
        .await
        .unwrap_or_default()
        .to_vec();

    let recorded = Recorded {
        path,
        headers,
        body,
    };

    let mut seen = state.seen.lock().unwrap();
    let index = seen.len();
    let status = (state.responder)(&recorded, index);
    seen.push(recorded);
    status
}

/// Spawns the sink onto the current runtime and returns once it accepts
/// connections.
pub async fn start_sink<F>(responder: F) -> Sink
where
    F: Fn(&Recorded, usize) -> StatusCode + Send + Sync + 'static,
{
    let state = Arc::new(SinkState {
        seen: Mutex::new(Vec::new()),
        responder: Box::new(responder),
    });

    let router = axum::Router::new()
        .fallback(record)
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Sink { addr, state }
}

/// Config tuned for tests: millisecond-scale polling and retries.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.data = tempfile::tempdir().unwrap().keep();
    config.webhooks.workers = 2;
    config.webhooks.poll_interval_ms = 25;
    config.webhooks.rate_limit_per_minute = 0;
    config.notifications.workers = 2;
    config.notifications.retry_base_delay_ms = 20;
    config.notifications.retry_max_delay_ms = 100;
    config.reports.tick_secs = 1;
    config
}

pub fn test_hub(config: &Config) -> Arc<Hub> {
    let secrets = StaticSecretResolver::new();
    secrets.insert("k1", "token-1");
    secrets.insert("k2", "token-2");

    let metrics = Metrics::new(opentelemetry::global::meter("e2e"));
    Arc::new(Hub::new(config, Arc::new(secrets), metrics.hub))
}

pub fn member(user: &str) -> AuthContext {
    AuthContext::new(OwnerId::new(user).unwrap(), None, Role::Member)
}

/// Polls until the predicate holds or the deadline passes.
pub async fn wait_for<F>(what: &str, timeout: Duration, mut predicate: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}
