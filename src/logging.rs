//! Structured logging configuration.
//!
//! JSON output for log aggregation in production, pretty output for
//! development. `RUST_LOG` overrides the configured level when set.

use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Logging format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty human-readable output (default for development)
    #[default]
    Pretty,
    /// JSON output for log aggregation
    Json,
    /// Compact single-line output
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format.
    pub format: LogFormat,
    /// Minimum log level when `RUST_LOG` is unset.
    pub level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: Level::INFO,
        }
    }
}

impl LogConfig {
    /// Config for JSON logging (production).
    pub const fn json() -> Self {
        Self {
            format: LogFormat::Json,
            level: Level::INFO,
        }
    }
}

/// Initializes the global tracing subscriber.
///
/// Call once at startup, before the first log line. A second call returns
/// an error from the subscriber registry and is ignored in tests.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wafden={},info", config.level)));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => {
            let _ = registry
                .with(fmt::layer().json().with_target(true))
                .try_init();
        }
        LogFormat::Pretty => {
            let _ = registry.with(fmt::layer().with_target(true)).try_init();
        }
        LogFormat::Compact => {
            let _ = registry
                .with(fmt::layer().compact().with_target(false))
                .try_init();
        }
    }
}
