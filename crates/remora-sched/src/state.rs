//! Lifecycle states of a remote job and their exit statuses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchedError;

/// Lifecycle state of a job.
///
/// A job moves forward along
/// `NEW → TOSUBMIT → SUBMITTING → WITHSCHEDULER → COMPUTED → RETRIEVING → PARSING → FINISHED`
/// and may drop into one of the failure states on the way. `IMPORTED` is an
/// overlay for records brought in from another installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    New,
    #[serde(rename = "TOSUBMIT")]
    ToSubmit,
    Submitting,
    #[serde(rename = "WITHSCHEDULER")]
    WithScheduler,
    Computed,
    Retrieving,
    Parsing,
    Finished,
    SubmissionFailed,
    RetrievalFailed,
    ParsingFailed,
    Failed,
    Imported,
}

impl JobState {
    /// Every state, in lifecycle order.
    pub const ALL: [JobState; 13] = [
        JobState::New,
        JobState::ToSubmit,
        JobState::Submitting,
        JobState::WithScheduler,
        JobState::Computed,
        JobState::Retrieving,
        JobState::Parsing,
        JobState::Finished,
        JobState::SubmissionFailed,
        JobState::RetrievalFailed,
        JobState::ParsingFailed,
        JobState::Failed,
        JobState::Imported,
    ];

    /// States in which the job is being handled by the daemon or the scheduler.
    pub const RUNNING: [JobState; 6] = [
        JobState::ToSubmit,
        JobState::Submitting,
        JobState::WithScheduler,
        JobState::Computed,
        JobState::Retrieving,
        JobState::Parsing,
    ];

    /// Terminal failure states.
    pub const FAILED: [JobState; 4] = [
        JobState::SubmissionFailed,
        JobState::RetrievalFailed,
        JobState::ParsingFailed,
        JobState::Failed,
    ];

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "NEW",
            JobState::ToSubmit => "TOSUBMIT",
            JobState::Submitting => "SUBMITTING",
            JobState::WithScheduler => "WITHSCHEDULER",
            JobState::Computed => "COMPUTED",
            JobState::Retrieving => "RETRIEVING",
            JobState::Parsing => "PARSING",
            JobState::Finished => "FINISHED",
            JobState::SubmissionFailed => "SUBMISSION_FAILED",
            JobState::RetrievalFailed => "RETRIEVAL_FAILED",
            JobState::ParsingFailed => "PARSING_FAILED",
            JobState::Failed => "FAILED",
            JobState::Imported => "IMPORTED",
        }
    }

    pub fn is_running(&self) -> bool {
        Self::RUNNING.contains(self)
    }

    /// Terminated successfully.
    pub fn is_finished_ok(&self) -> bool {
        *self == JobState::Finished
    }

    pub fn is_failed(&self) -> bool {
        Self::FAILED.contains(self)
    }

    /// No lifecycle transition leaves this state (except into `IMPORTED`).
    pub fn is_terminal(&self) -> bool {
        self.is_finished_ok() || self.is_failed()
    }

    /// The exit status recorded when the job reaches this state.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            JobState::Finished => Some(ExitStatus::Finished),
            JobState::SubmissionFailed => Some(ExitStatus::SubmissionFailed),
            JobState::RetrievalFailed => Some(ExitStatus::RetrievalFailed),
            JobState::ParsingFailed => Some(ExitStatus::ParsingFailed),
            JobState::Failed => Some(ExitStatus::Failed),
            _ => None,
        }
    }

    /// Whether the lifecycle graph has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;

        if next == Imported {
            return *self != Imported;
        }
        match (*self, next) {
            (New, ToSubmit)
            | (ToSubmit, Submitting)
            | (Submitting, WithScheduler)
            | (WithScheduler, Computed)
            | (Computed, Retrieving)
            | (Retrieving, Parsing)
            | (Parsing, Finished) => true,
            (ToSubmit | Submitting, SubmissionFailed) => true,
            (Retrieving, RetrievalFailed) => true,
            (Parsing, ParsingFailed) => true,
            (from, Failed) => !from.is_terminal() && from != Imported,
            _ => false,
        }
    }

    /// States from which `next` can be reached in one step.
    pub fn predecessors(next: JobState) -> Vec<JobState> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| SchedError::Validation(format!("Job state '{s}' is not valid")))
    }
}

/// Render a state set as `A, B, C` for error messages.
pub(crate) fn format_states(states: &[JobState]) -> String {
    states
        .iter()
        .map(JobState::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Exit status recorded when a job terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitStatus {
    Finished = 0,
    SubmissionFailed = 100,
    RetrievalFailed = 200,
    ParsingFailed = 300,
    Failed = 400,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitStatus::Finished),
            100 => Some(ExitStatus::SubmissionFailed),
            200 => Some(ExitStatus::RetrievalFailed),
            300 => Some(ExitStatus::ParsingFailed),
            400 => Some(ExitStatus::Failed),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExitStatus::Finished => "FINISHED",
            ExitStatus::SubmissionFailed => "SUBMISSION_FAILED",
            ExitStatus::RetrievalFailed => "RETRIEVAL_FAILED",
            ExitStatus::ParsingFailed => "PARSING_FAILED",
            ExitStatus::Failed => "FAILED",
        }
    }

    /// Label for an arbitrary code, `UNKNOWN` outside the enumeration.
    pub fn label_for(code: i32) -> &'static str {
        Self::from_code(code).map_or("UNKNOWN", |status| status.label())
    }
}
