use std::sync::Arc;

use clap::Parser;
use opentelemetry::global;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::{
    context::AppContext,
    secrets::EnvSecretResolver,
    telemetry::{setup_metrics, setup_tracing, Metrics},
};
use vertex_hub::{
    args::CliArgs,
    config::{Config, ConfigBuilder},
    dispatcher::Hub,
    health::create_shared_health_status,
};

fn main() {
    let args = CliArgs::parse();
    let config: Config = ConfigBuilder::new(args).build().unwrap();

    let ctx = AppContext::new();

    // tracing goes to OTLP when a collector is configured, otherwise to
    // a bare console subscriber
    let tracer_provider = match config.jaeger.as_ref() {
        Some(collector) => {
            let filters = config.tracing_env_filter().unwrap();
            Some(
                ctx.rt
                    .block_on(async { setup_tracing(collector, "vertex-hub", filters) }),
            )
        }
        None => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .without_time()
                        .with_target(false),
                )
                .with(config.tracing_env_filter().unwrap())
                .try_init()
                .unwrap();
            None
        }
    };

    let meter_provider = config
        .prometheus
        .as_ref()
        .map(|collector| setup_metrics(collector, "vertex_hub_metrics"));
    let meter = global::meter("vertex_hub_metrics");
    let metrics = Metrics::new(meter);

    let secrets = Arc::new(EnvSecretResolver::default());
    let hub = Arc::new(Hub::new(&config, secrets, metrics.hub));
    let health_status = create_shared_health_status();

    vertex_hub::run_server(ctx, config, hub, metrics.http, health_status);

    // flush whatever telemetry is still buffered; at this point there is
    // nowhere useful to report a flush failure
    if let Some(tracer) = tracer_provider {
        let _ = tracer.shutdown();
    }
    if let Some(meter) = meter_provider {
        let _ = meter.shutdown();
    }
}
