//! Telemetry helpers for structured logging and tracing.

/// Initialize tracing/telemetry. Host applications can install their own
/// subscriber; this helper installs a default env-based subscriber if none
/// is set. Filtering defaults to `pressgang=info` when `RUST_LOG` is unset.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pressgang=info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
