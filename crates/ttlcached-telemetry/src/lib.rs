//! Structured logging and metrics shared by every ttlcached process.
//!
//! - Structured `tracing` output to stderr
//! - Prometheus metrics for cache operations

pub mod logging;
pub mod metrics;

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with the default level (`info`).
///
/// Call this once, from the acceptor process, before any `fork`. Forked
/// children inherit the process's stderr and the already-installed
/// `tracing` dispatcher keeps working across the fork — there is no need,
/// and no opportunity, to call this again from a child.
pub fn init() {
    init_with_level(Level::INFO);
}

/// Initialize logging with an explicit minimum level.
pub fn init_with_level(level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();

    tracing::info!("ttlcached telemetry initialized");
}
