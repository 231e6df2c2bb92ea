#![allow(clippy::uninlined_format_args)]

pub mod cache;
pub mod context;
pub mod http;
pub mod secrets;
pub mod storage;
pub mod telemetry;

/// Installs a plain fmt subscriber so test output carries tracing logs.
/// Tests run in one process, so only the first caller installs anything;
/// the rest are no-ops.
pub fn init_tracing_tests() {
    use std::sync::Once;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt::init();
    });
}
