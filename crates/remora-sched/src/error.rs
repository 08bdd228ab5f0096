//! Error handling for the job lifecycle and submission layer.

use thiserror::Error;

use crate::state::{JobState, format_states};

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur while tracking or submitting a job.
#[derive(Error, Debug)]
pub enum SchedError {
    /// A mutation was attempted outside the states that allow it.
    #[error("Cannot {operation}: job must be in one of [{expected}], it is instead {found}")]
    IllegalState {
        operation: String,
        expected: String,
        found: String,
    },

    /// Missing or inconsistent computer, code or MPI declaration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed option value, resource request or copy-list entry.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The calculation plugin produced an inconsistent submission manifest.
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// The option name is not declared in the options table.
    #[error("Unknown option: {0}")]
    UnknownOption(String),

    /// The option value does not have the declared type.
    #[error("Invalid value for option {option}: expected {expected}, found {found}")]
    InvalidOptionType {
        option: String,
        expected: String,
        found: String,
    },

    /// Job not found in the store.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Computer not found in the registry.
    #[error("Computer not found: {0}")]
    ComputerNotFound(String),

    /// The parser did not produce a result under that name.
    #[error("Parser '{parser}' produced no result named '{name}'")]
    ResultNotFound { parser: String, name: String },

    /// The stored record was changed by another writer.
    #[error("State conflict on job {job_id}: expected {expected}, found {found}")]
    StateConflict {
        job_id: String,
        expected: String,
        found: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SchedError {
    /// Build an [`SchedError::IllegalState`] for `operation`.
    pub fn illegal_state(operation: &str, allowed: &[JobState], found: Option<JobState>) -> Self {
        SchedError::IllegalState {
            operation: operation.to_string(),
            expected: format_states(allowed),
            found: found.map_or_else(|| "unset".to_string(), |s| s.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedError::JobNotFound("job-123".to_string());
        assert_eq!(err.to_string(), "Job not found: job-123");

        let err = SchedError::illegal_state(
            "set the job id",
            &[JobState::Submitting],
            Some(JobState::New),
        );
        assert_eq!(
            err.to_string(),
            "Cannot set the job id: job must be in one of [SUBMITTING], it is instead NEW"
        );

        let err = SchedError::ResultNotFound {
            parser: "pw".to_string(),
            name: "energy".to_string(),
        };
        assert_eq!(err.to_string(), "Parser 'pw' produced no result named 'energy'");
    }

    #[test]
    fn test_illegal_state_unset() {
        let err = SchedError::illegal_state(
            "attach an output link",
            &[JobState::Submitting, JobState::Retrieving, JobState::Parsing],
            None,
        );
        assert!(err.to_string().ends_with("[SUBMITTING, RETRIEVING, PARSING], it is instead unset"));
    }
}
