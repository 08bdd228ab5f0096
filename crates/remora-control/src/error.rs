//! Error handling for the control layer.

use remora_runtime::RuntimeError;
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for control operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors surfaced to callers of the control panels.
///
/// The type is `Clone` because every clone of a pending action handle
/// observes the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// The remote process handled the action and reported a failure.
    #[error("Remote process failed: {0}")]
    RemoteFailure(String),

    /// The broker could not deliver the message.
    #[error("Message delivery failed: {0}")]
    DeliveryFailed(String),

    /// The caller stopped waiting for the response.
    #[error("Wait interrupted: {0}")]
    Interrupted(String),

    #[error("No response within {0}")]
    Timeout(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ControlError {
    /// Only delivery failures are worth another attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ControlError::DeliveryFailed(_))
    }
}

impl From<RuntimeError> for ControlError {
    fn from(err: RuntimeError) -> Self {
        ControlError::Runtime(err.to_string())
    }
}

impl From<serde_json::Error> for ControlError {
    fn from(err: serde_json::Error) -> Self {
        ControlError::Encoding(err.to_string())
    }
}

impl From<ConfigError> for ControlError {
    fn from(err: ConfigError) -> Self {
        ControlError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_delivery_failures_are_retriable() {
        assert!(ControlError::DeliveryFailed("nack".into()).is_retriable());
        assert!(!ControlError::RemoteFailure("boom".into()).is_retriable());
        assert!(!ControlError::Timeout("5s".into()).is_retriable());
    }

    #[test]
    fn test_runtime_error_conversion() {
        let err: ControlError = RuntimeError::UnexpectedResult.into();
        assert!(matches!(err, ControlError::Runtime(_)));
    }
}
