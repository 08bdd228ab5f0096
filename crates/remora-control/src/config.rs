//! Configuration management for the remora control layer.
//!
//! Supports loading configuration from:
//! 1. Configuration files (YAML)
//! 2. Environment variables (with REMORA_ prefix)
//! 3. .env files
//!
//! Configuration precedence (highest to lowest):
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::names::ChannelNames;
use crate::tracing_config::{TracingConfig, TracingFormat};

/// Complete control-layer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Broker connection and naming
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Delivery retry
    #[serde(default)]
    pub retry: RetryConfig,

    /// Action handling
    #[serde(default)]
    pub actions: ActionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker URL (e.g., "memory://")
    #[serde(default = "default_broker_url")]
    pub url: String,

    /// Profile name; channel names are prefixed with `remora-<profile>`
    #[serde(default = "default_profile")]
    pub profile: String,
}

/// Retry of undeliverable messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retry publishes that the broker could not deliver
    #[serde(default)]
    pub enabled: bool,

    /// Delay before the second attempt, in milliseconds
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Total number of attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Action handling settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// How long blocking calls wait for a response, in seconds; no limit
    /// when unset
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "console" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_broker_url() -> String {
    "memory://".to_string()
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_initial_interval_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "console".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            profile: default_profile(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_interval_ms: default_initial_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml_ng::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with the following precedence:
    /// 1. Load .env file if it exists
    /// 2. Load from file if provided
    /// 3. Apply environment variable overrides
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };

        let config = config.merge_env();
        config.validate()?;
        Ok(config)
    }

    fn merge_env(self) -> Self {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    /// Override fields with the `REMORA_*` variables `lookup` returns.
    ///
    /// Variables that are absent, or that do not parse, leave the
    /// corresponding fields unchanged.
    pub fn merge_vars<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // Broker
        if let Some(v) = lookup("REMORA_BROKER_URL") {
            self.broker.url = v;
        }
        if let Some(v) = lookup("REMORA_PROFILE") {
            self.broker.profile = v;
        }

        // Retry
        if let Some(v) = lookup("REMORA_RETRY_ENABLED") {
            if let Ok(val) = v.parse() {
                self.retry.enabled = val;
            }
        }
        if let Some(v) = lookup("REMORA_RETRY_INITIAL_INTERVAL_MS") {
            if let Ok(val) = v.parse() {
                self.retry.initial_interval_ms = val;
            }
        }
        if let Some(v) = lookup("REMORA_RETRY_MAX_ATTEMPTS") {
            if let Ok(val) = v.parse() {
                self.retry.max_attempts = val;
            }
        }

        // Actions
        if let Some(v) = lookup("REMORA_ACTION_TIMEOUT") {
            if let Ok(val) = v.parse() {
                self.actions.timeout_seconds = Some(val);
            }
        }

        // Logging
        if let Some(v) = lookup("REMORA_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("REMORA_LOG_FORMAT") {
            self.logging.format = v;
        }

        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.url.is_empty() {
            return Err(ConfigError::ValidationError(
                "broker url must not be empty".to_string(),
            ));
        }

        let profile = &self.broker.profile;
        if profile.is_empty() {
            return Err(ConfigError::ValidationError(
                "broker profile must not be empty".to_string(),
            ));
        }
        if profile.contains(|c: char| c == '.' || c.is_whitespace()) {
            return Err(ConfigError::ValidationError(format!(
                "broker profile '{profile}' must not contain dots or whitespace"
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.actions.timeout_seconds == Some(0) {
            return Err(ConfigError::ValidationError(
                "actions timeout_seconds must be greater than 0; omit it to wait indefinitely"
                    .to_string(),
            ));
        }

        // Validate log level
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {other}"
                )));
            }
        }

        // Validate log format
        if TracingFormat::parse(&self.logging.format).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format: {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Channel names for the configured profile.
    pub fn channel_names(&self) -> ChannelNames {
        ChannelNames::for_profile(&self.broker.profile)
    }

    /// Initial interval and attempt count, if delivery retry is enabled.
    pub fn retry_policy(&self) -> Option<(Duration, u32)> {
        self.retry.enabled.then(|| {
            (
                Duration::from_millis(self.retry.initial_interval_ms),
                self.retry.max_attempts,
            )
        })
    }

    pub fn action_timeout(&self) -> Option<Duration> {
        self.actions.timeout_seconds.map(Duration::from_secs)
    }

    /// Tracing settings matching the logging section.
    pub fn tracing_config(&self) -> TracingConfig {
        TracingConfig::new(
            self.logging.level.clone(),
            TracingFormat::parse(&self.logging.format).unwrap_or(TracingFormat::Console),
        )
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
