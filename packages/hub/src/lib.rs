#![allow(clippy::uninlined_format_args)]
#![allow(clippy::result_large_err)]

pub mod args;
pub mod config;
pub mod dispatcher; // the Hub composition layer
pub mod health;
pub mod http;
pub mod stores;
pub mod subsystems; // subsystems: integrations, webhooks, notifications, events, and reports

use std::sync::Arc;

use config::Config;
use dispatcher::Hub;
use health::SharedHealthStatus;
use utils::context::AppContext;
use utils::telemetry::HttpMetrics;

/// Brings up the whole service: subsystem workers first, then the HTTP
/// server on the calling thread. Used by main and the e2e tests.
pub fn run_server(
    ctx: AppContext,
    config: Config,
    hub: Arc<Hub>,
    metrics: HttpMetrics,
    health_status: SharedHealthStatus,
) {
    let _ = ctrlc::set_handler({
        let ctx = ctx.clone();
        move || {
            ctx.kill();
        }
    });

    // subsystem workers run on the shared runtime
    hub.start(ctx.clone());
    health::mark_subsystems_started(&health_status);

    // the http server owns the calling thread until shutdown
    http::server::start(ctx, config, hub, health_status, metrics).unwrap();
}

/// Installs a plain fmt subscriber so test output carries tracing logs.
/// Config-driven setup is deliberately skipped here: parallel tests
/// mutate configs freely, and only the first caller installs anything.
pub fn init_tracing_tests() {
    use std::sync::Once;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt::init();
    });
}
