//! Shared tracing and logging setup for the authorization services.

/// Initialize process-wide observability with the default filter.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
