use opentelemetry::{global, trace::TracerProvider as _, KeyValue};
use opentelemetry_otlp::{Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::SdkMeterProvider,
    resource::Resource,
    trace::{self, Sampler, SdkTracerProvider},
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn otlp_resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_owned())
        .build()
}

/// Wires span export to an OTLP collector and installs the global
/// tracing subscriber (console + OTLP layers). The returned provider
/// must be shut down at exit so buffered spans flush.
pub fn setup_tracing(
    collector: &str,
    service_name: &str,
    filters: tracing_subscriber::EnvFilter,
) -> SdkTracerProvider {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(format!("{collector}/v1/traces"))
        .build()
        .expect("span exporter construction");

    let provider = SdkTracerProvider::builder()
        .with_span_processor(trace::BatchSpanProcessor::builder(exporter).build())
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(otlp_resource(service_name))
        .build();

    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(opentelemetry_jaeger_propagator::Propagator::new());

    let otel_layer = tracing_opentelemetry::layer()
        .with_tracer(provider.tracer(format!("{service_name}-tracer")));
    tracing_subscriber::registry()
        .with(filters)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .init();

    tracing::info!("Span export wired to {}", collector);
    provider
}

/// Wires periodic metric export to an OTLP collector and installs the
/// global meter provider. Same flush caveat as [`setup_tracing`].
pub fn setup_metrics(collector: &str, service_name: &str) -> SdkMeterProvider {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(format!("{collector}/api/v1/otlp/v1/metrics"))
        .build()
        .expect("metric exporter construction");

    let provider = SdkMeterProvider::builder()
        .with_resource(otlp_resource(service_name))
        .with_periodic_exporter(exporter)
        .build();

    global::set_meter_provider(provider.clone());

    tracing::info!("Metric export wired to {}", collector);
    provider
}

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, UpDownCounter};

pub struct Metrics {
    pub http: HttpMetrics,
    pub hub: HubMetrics,
}

impl Metrics {
    pub fn new(meter: Meter) -> Self {
        Self {
            http: HttpMetrics::init(&meter),
            hub: HubMetrics::init(&meter),
        }
    }
}

#[derive(Clone, Debug)]
pub struct HttpMetrics {
    pub requests_total: Counter<u64>,
}

impl HttpMetrics {
    pub const LABEL: &'static str = "http";

    pub fn init(meter: &Meter) -> Self {
        Self {
            requests_total: meter
                .u64_counter(format!("{}_requests_total", Self::LABEL))
                .with_description("Total number of API requests handled")
                .build(),
        }
    }

    pub fn record_request(&self, route: &str) {
        self.requests_total
            .add(1, &[KeyValue::new("route", route.to_owned())]);
    }
}

#[derive(Clone, Debug)]
pub struct HubMetrics {
    pub integration: IntegrationMetrics,
    pub webhook: WebhookMetrics,
    pub notification: NotificationMetrics,
    pub event: EventMetrics,
    pub report: ReportMetrics,
    pub cache: CacheMetrics,
}

impl HubMetrics {
    pub fn init(meter: &Meter) -> Self {
        Self {
            integration: IntegrationMetrics::init(meter),
            webhook: WebhookMetrics::init(meter),
            notification: NotificationMetrics::init(meter),
            event: EventMetrics::init(meter),
            report: ReportMetrics::init(meter),
            cache: CacheMetrics::init(meter),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IntegrationMetrics {
    pub registered: UpDownCounter<i64>,
    pub operations_total: Counter<u64>,
    pub operation_errors: Counter<u64>,
    pub instances_built: Counter<u64>,
    pub instances_evicted: Counter<u64>,
}

impl IntegrationMetrics {
    pub const LABEL: &'static str = "integration";

    pub fn init(meter: &Meter) -> Self {
        Self {
            registered: meter
                .i64_up_down_counter(format!("{}_registered", Self::LABEL))
                .with_description("Number of integrations currently registered")
                .build(),
            operations_total: meter
                .u64_counter(format!("{}_operations_total", Self::LABEL))
                .with_description("Total connector operations executed")
                .build(),
            operation_errors: meter
                .u64_counter(format!("{}_operation_errors", Self::LABEL))
                .with_description("Total connector operations that returned an error")
                .build(),
            instances_built: meter
                .u64_counter(format!("{}_instances_built", Self::LABEL))
                .with_description("Total connector instances constructed")
                .build(),
            instances_evicted: meter
                .u64_counter(format!("{}_instances_evicted", Self::LABEL))
                .with_description("Total connector instances evicted from the cache")
                .build(),
        }
    }

    pub fn record_operation(&self, kind: &str, operation: &str) {
        self.operations_total.add(
            1,
            &[
                KeyValue::new("kind", kind.to_owned()),
                KeyValue::new("operation", operation.to_owned()),
            ],
        );
    }

    pub fn record_operation_error(&self, kind: &str, reason: &str) {
        self.operation_errors.add(
            1,
            &[
                KeyValue::new("kind", kind.to_owned()),
                KeyValue::new("reason", reason.to_owned()),
            ],
        );
    }
}

#[derive(Clone, Debug)]
pub struct WebhookMetrics {
    pub deliveries_created: Counter<u64>,
    pub attempts_total: Counter<u64>,
    pub delivered_total: Counter<u64>,
    pub exhausted_total: Counter<u64>,
    pub rate_limited_total: Counter<u64>,
    pub attempt_duration: Histogram<f64>,
    pub pending_deliveries: Gauge<i64>,
}

impl WebhookMetrics {
    pub const LABEL: &'static str = "webhook";

    pub fn init(meter: &Meter) -> Self {
        Self {
            deliveries_created: meter
                .u64_counter(format!("{}_deliveries_created", Self::LABEL))
                .with_description("Total webhook deliveries created")
                .build(),
            attempts_total: meter
                .u64_counter(format!("{}_attempts_total", Self::LABEL))
                .with_description("Total webhook delivery attempts")
                .build(),
            delivered_total: meter
                .u64_counter(format!("{}_delivered_total", Self::LABEL))
                .with_description("Total webhook deliveries that succeeded")
                .build(),
            exhausted_total: meter
                .u64_counter(format!("{}_exhausted_total", Self::LABEL))
                .with_description("Total webhook deliveries that ran out of attempts")
                .build(),
            rate_limited_total: meter
                .u64_counter(format!("{}_rate_limited_total", Self::LABEL))
                .with_description("Total delivery attempts deferred by the dispatch rate limit")
                .build(),
            attempt_duration: meter
                .f64_histogram(format!("{}_attempt_duration_seconds", Self::LABEL))
                .with_description("Wall-clock duration of delivery attempts")
                .build(),
            pending_deliveries: meter
                .i64_gauge(format!("{}_pending_deliveries", Self::LABEL))
                .with_description("Deliveries currently waiting for an attempt")
                .build(),
        }
    }

    pub fn record_attempt(&self, outcome: &str, seconds: f64) {
        self.attempts_total
            .add(1, &[KeyValue::new("outcome", outcome.to_owned())]);
        self.attempt_duration.record(seconds, &[]);
    }
}

#[derive(Clone, Debug)]
pub struct NotificationMetrics {
    pub enqueued_total: Counter<u64>,
    pub sent_total: Counter<u64>,
    pub failed_total: Counter<u64>,
    pub recipient_failures: Counter<u64>,
    pub queue_depth: Gauge<i64>,
}

impl NotificationMetrics {
    pub const LABEL: &'static str = "notification";

    pub fn init(meter: &Meter) -> Self {
        Self {
            enqueued_total: meter
                .u64_counter(format!("{}_enqueued_total", Self::LABEL))
                .with_description("Total notification deliveries enqueued")
                .build(),
            sent_total: meter
                .u64_counter(format!("{}_sent_total", Self::LABEL))
                .with_description("Total notification deliveries fully sent")
                .build(),
            failed_total: meter
                .u64_counter(format!("{}_failed_total", Self::LABEL))
                .with_description("Total notification deliveries that failed for all recipients")
                .build(),
            recipient_failures: meter
                .u64_counter(format!("{}_recipient_failures", Self::LABEL))
                .with_description("Total per-recipient send failures")
                .build(),
            queue_depth: meter
                .i64_gauge(format!("{}_queue_depth", Self::LABEL))
                .with_description("Notifications currently queued")
                .build(),
        }
    }

    pub fn record_sent(&self, channel: &str) {
        self.sent_total
            .add(1, &[KeyValue::new("channel", channel.to_owned())]);
    }

    pub fn record_recipient_failure(&self, channel: &str) {
        self.recipient_failures
            .add(1, &[KeyValue::new("channel", channel.to_owned())]);
    }
}

#[derive(Clone, Debug)]
pub struct EventMetrics {
    pub published_total: Counter<u64>,
    pub matched_total: Counter<u64>,
    pub dropped_events: Counter<u64>,
    pub handler_errors: Counter<u64>,
}

impl EventMetrics {
    pub const LABEL: &'static str = "event";

    pub fn init(meter: &Meter) -> Self {
        Self {
            published_total: meter
                .u64_counter(format!("{}_published_total", Self::LABEL))
                .with_description("Total events accepted by the broker")
                .build(),
            matched_total: meter
                .u64_counter(format!("{}_matched_total", Self::LABEL))
                .with_description("Total subscription matches across all events")
                .build(),
            dropped_events: meter
                .u64_counter(format!("{}_dropped_events", Self::LABEL))
                .with_description("Events dropped because a subscription queue stayed full")
                .build(),
            handler_errors: meter
                .u64_counter(format!("{}_handler_errors", Self::LABEL))
                .with_description("In-process handler invocations that returned an error")
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReportMetrics {
    pub executions_started: Counter<u64>,
    pub executions_completed: Counter<u64>,
    pub executions_failed: Counter<u64>,
    pub executions_skipped: Counter<u64>,
    pub execution_duration: Histogram<f64>,
    pub artifact_bytes: Histogram<u64>,
}

impl ReportMetrics {
    pub const LABEL: &'static str = "report";

    pub fn init(meter: &Meter) -> Self {
        Self {
            executions_started: meter
                .u64_counter(format!("{}_executions_started", Self::LABEL))
                .with_description("Total report executions started")
                .build(),
            executions_completed: meter
                .u64_counter(format!("{}_executions_completed", Self::LABEL))
                .with_description("Total report executions that completed")
                .build(),
            executions_failed: meter
                .u64_counter(format!("{}_executions_failed", Self::LABEL))
                .with_description("Total report executions that failed")
                .build(),
            executions_skipped: meter
                .u64_counter(format!("{}_executions_skipped", Self::LABEL))
                .with_description("Scheduler ticks skipped because a run was already in flight")
                .build(),
            execution_duration: meter
                .f64_histogram(format!("{}_execution_duration_seconds", Self::LABEL))
                .with_description("Wall-clock duration of report executions")
                .build(),
            artifact_bytes: meter
                .u64_histogram(format!("{}_artifact_bytes", Self::LABEL))
                .with_description("Size of generated report artifacts")
                .build(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CacheMetrics {
    pub hits: Counter<u64>,
    pub misses: Counter<u64>,
    pub evictions: Counter<u64>,
}

impl CacheMetrics {
    pub const LABEL: &'static str = "cache";

    pub fn init(meter: &Meter) -> Self {
        Self {
            hits: meter
                .u64_counter(format!("{}_hits", Self::LABEL))
                .with_description("Cache lookups served from a tier")
                .build(),
            misses: meter
                .u64_counter(format!("{}_misses", Self::LABEL))
                .with_description("Cache lookups that found nothing usable")
                .build(),
            evictions: meter
                .u64_counter(format!("{}_evictions", Self::LABEL))
                .with_description("Entries evicted from the local tier")
                .build(),
        }
    }
}
