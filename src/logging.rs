//! Tracing bootstrap for binaries and test harnesses embedding the crate.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize a global subscriber honoring `RUST_LOG`, defaulting to `info`
/// for this crate. Safe to call more than once; later calls are no-ops.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Convenience wrapper used by tests.
pub fn init_default() {
    init("scholar_pipeline=info");
}
