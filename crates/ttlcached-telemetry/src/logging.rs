//! Logging configuration shared by the acceptor, worker, and janitor processes.

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Controls how the process-wide `tracing` subscriber is assembled.
///
/// Every ttlcached process shares the same fields: log level, and whether
/// to annotate events with their source file/line (useful in development,
/// noisy in production).
pub struct LoggingConfig {
    pub level: Level,
    pub file: bool,
    pub line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LoggingConfig {
    /// Verbose: debug level, source location on every event.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            file: true,
            line_number: true,
        }
    }

    /// Quiet: info level, no source location.
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            file: false,
            line_number: false,
        }
    }

    /// Install this configuration as the global `tracing` subscriber.
    ///
    /// Like [`crate::init`], call this exactly once per OS process, before
    /// `fork` — the acceptor is the only process that should call it.
    pub fn install(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.to_string()));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_file(self.file)
            .with_line_number(self.line_number);

        tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    }
}
