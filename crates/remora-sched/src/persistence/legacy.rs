//! Compatibility view over records that keep their state twice.
//!
//! Older records carry a dedicated state column and, for imported jobs, a
//! free-form `state` attribute holding the state the job had on the system
//! it came from. [`StateView`] folds both into the single state the core
//! lifecycle works with. Nothing outside the storage boundary should see the
//! two representations.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::job::Job;
use crate::state::JobState;

/// Raw state fields as read from a legacy record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateView {
    /// Value of the dedicated state column.
    #[serde(default)]
    pub recorded: Option<String>,
    /// Value of the free-form `state` attribute.
    #[serde(default)]
    pub attribute: Option<String>,
}

impl StateView {
    pub fn new(recorded: Option<&str>, attribute: Option<&str>) -> Self {
        Self {
            recorded: recorded.map(str::to_string),
            attribute: attribute.map(str::to_string),
        }
    }

    /// Build the legacy view of a job.
    pub fn from_job(job: &Job) -> Self {
        let recorded = job.state().map(|s| s.as_str().to_string());
        let attribute = match job.state() {
            Some(JobState::Imported) => job.imported_from().map(str::to_string),
            _ => recorded.clone(),
        };
        Self { recorded, attribute }
    }

    /// Resolve to the lifecycle state and, for imported records, the state
    /// the job had before import.
    ///
    /// The dedicated column wins when it holds a known state. An unknown
    /// column value falls back to the attribute.
    pub fn resolve(&self) -> (Option<JobState>, Option<String>) {
        if let Some(recorded) = self.recorded.as_deref() {
            match recorded.parse::<JobState>() {
                Ok(JobState::Imported) => {
                    return (Some(JobState::Imported), self.attribute.clone());
                }
                Ok(state) => return (Some(state), None),
                Err(_) => warn!(value = recorded, "Unknown recorded job state, using attribute"),
            }
        }

        match self.attribute.as_deref() {
            Some(attribute) => match attribute.parse::<JobState>() {
                Ok(state) => (Some(state), None),
                Err(_) => {
                    warn!(value = attribute, "Unknown job state attribute, state left unset");
                    (None, None)
                }
            },
            None => (None, None),
        }
    }

    /// Display string of the resolved state: `IMPORTED/<original>` for
    /// imported records, `IMPORTED/NOTFOUND` when the original is missing.
    pub fn state_string(&self) -> Option<String> {
        match self.resolve() {
            (Some(JobState::Imported), original) => Some(format!(
                "{}/{}",
                JobState::Imported,
                original.as_deref().unwrap_or("NOTFOUND")
            )),
            (state, _) => state.map(|s| s.to_string()),
        }
    }

    /// Overwrite the state of `job` with the resolved state.
    pub fn apply_to(&self, job: &mut Job) {
        let (state, imported_from) = self.resolve();
        job.restore_state(state, imported_from);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_state_wins() {
        let view = StateView::new(Some("FINISHED"), Some("PARSING"));
        assert_eq!(view.resolve(), (Some(JobState::Finished), None));
        assert_eq!(view.state_string().as_deref(), Some("FINISHED"));
    }

    #[test]
    fn test_imported_keeps_original() {
        let view = StateView::new(Some("IMPORTED"), Some("FINISHED"));
        assert_eq!(
            view.resolve(),
            (Some(JobState::Imported), Some("FINISHED".to_string()))
        );
        assert_eq!(view.state_string().as_deref(), Some("IMPORTED/FINISHED"));

        let orphan = StateView::new(Some("IMPORTED"), None);
        assert_eq!(orphan.state_string().as_deref(), Some("IMPORTED/NOTFOUND"));
    }

    #[test]
    fn test_attribute_fallback() {
        let view = StateView::new(None, Some("WITHSCHEDULER"));
        assert_eq!(view.resolve(), (Some(JobState::WithScheduler), None));

        let garbled = StateView::new(Some("bogus"), Some("FAILED"));
        assert_eq!(garbled.resolve(), (Some(JobState::Failed), None));

        let unknown = StateView::new(None, Some("bogus"));
        assert_eq!(unknown.resolve(), (None, None));
        assert_eq!(unknown.state_string(), None);
    }

    #[test]
    fn test_apply_and_round_trip_through_job() {
        let mut job = Job::new("imported");
        StateView::new(Some("IMPORTED"), Some("FINISHED")).apply_to(&mut job);

        assert_eq!(job.state(), Some(JobState::Imported));
        assert_eq!(job.imported_from(), Some("FINISHED"));
        assert_eq!(job.state_string().as_deref(), Some("IMPORTED/FINISHED"));

        let view = StateView::from_job(&job);
        assert_eq!(view, StateView::new(Some("IMPORTED"), Some("FINISHED")));
    }

    #[test]
    fn test_apply_terminal_sets_exit_status() {
        let mut job = Job::new("done");
        StateView::new(Some("FAILED"), None).apply_to(&mut job);
        assert!(job.failed());
        assert!(job.exit_status().is_some());
    }
}
