//! Tracing/metrics bootstrap shared by every binary: `tracing-subscriber`
//! for structured log output and the bare `opentelemetry` API (global meter)
//! for counters/histograms.

mod telemetry;

pub use telemetry::DppTelemetry;

use opentelemetry::{global, metrics::Meter};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initializes the process-wide tracing subscriber. Call once at the top of
/// every `main.rs`, before any `tracing::info!` call.
pub fn init_tracing(service_name: &'static str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    // Setting the global default more than once (e.g. in tests) is harmless;
    // ignore the error rather than panicking the process.
    let _ = tracing::subscriber::set_global_default(subscriber);
    tracing::info!(service = service_name, "tracing initialized");
}

/// Returns the global OpenTelemetry meter scoped to `service_name`, used by
/// each binary's telemetry module to build its counters/histograms.
pub fn meter(service_name: &'static str) -> Meter {
    global::meter(service_name)
}
