//! Tracing subscriber setup.
//!
//! Console output for development and JSON structured logging for
//! production, filtered through an `EnvFilter`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output (for development).
    Console,
    /// JSON structured logging (for production).
    Json,
}

impl TracingFormat {
    /// Parse `"console"` or `"json"`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "console" => Some(TracingFormat::Console),
            "json" => Some(TracingFormat::Json),
            _ => None,
        }
    }
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter (e.g., "info", "remora_control=debug").
    pub log_level: String,
    /// Output format (console or JSON).
    pub format: TracingFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: TracingFormat::Console,
        }
    }
}

impl TracingConfig {
    pub fn new(log_level: String, format: TracingFormat) -> Self {
        Self { log_level, format }
    }

    /// Create config from environment variables.
    ///
    /// Environment variables:
    /// - `RUST_LOG`: Log level (default: "info")
    /// - `REMORA_LOG_FORMAT`: "console" or "json" (default: "console")
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let format = std::env::var("REMORA_LOG_FORMAT")
            .ok()
            .and_then(|f| TracingFormat::parse(&f))
            .unwrap_or(TracingFormat::Console);

        Self { log_level, format }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: TracingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = match config.format {
        TracingFormat::Console => fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .boxed(),
        TracingFormat::Json => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .json()
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::info!(format = ?config.format, "Tracing initialized");
    Ok(())
}

/// Initialize tracing with default configuration from environment.
pub fn init_default_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing(TracingConfig::from_env())
}
