//! Error handling for the runtime primitives.

use thiserror::Error;

/// Result type for runtime primitive operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors raised by the runtime primitives themselves.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// No object is registered under the key and no constructor was given.
    #[error("Object not found and no constructor given: {0}")]
    NotFound(String),

    /// An interruptable future was completed with a value while a caller was
    /// waiting for an interruption.
    #[error("Interruptable future resolved with a value instead of an interruption")]
    UnexpectedResult,

    /// The task driving an interruptable future went away without completing it.
    #[error("Interruptable future abandoned: {0}")]
    Abandoned(String),
}
