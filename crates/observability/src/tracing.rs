//! Tracing/logging initialization.
//!
//! JSON-formatted structured logs so every authorization decision span
//! (`check_permission`, store queries, audit appends) lands in the log
//! pipeline with its fields intact.

use tracing_subscriber::EnvFilter;

/// Initialize tracing/logging for the process.
///
/// The filter comes from `RUST_LOG` when set, otherwise `info`. Safe to
/// call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    install(filter);
}

/// Initialize with an explicit filter directive, ignoring the environment.
///
/// Useful in tests and embedded deployments that pin their own verbosity,
/// e.g. `init_with_filter("sentra_engine=debug,info")`.
pub fn init_with_filter(directive: &str) {
    install(EnvFilter::new(directive));
}

fn install(filter: EnvFilter) {
    // JSON logs + timestamps; repeated installs are no-ops.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
