//! Tracing and logging setup shared by everything that hosts a ledger.

/// Initialize process-wide tracing with the default `info` filter.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Initialize process-wide tracing, falling back to `default_filter` when
/// `RUST_LOG` is not set (typically `PayablesConfig::log_filter`).
pub fn init_with_filter(default_filter: &str) {
    tracing::init(default_filter);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
