//! Job records and the guards on their mutations.
//!
//! A [`Job`] carries exactly one lifecycle state. Every setter checks the
//! state first and leaves the record untouched when the check fails, so a
//! rejected call never has a partial effect.
//!
//! | Operation | Allowed states |
//! |---|---|
//! | attach / replace / remove an input link, set options | NEW |
//! | attach an output link | SUBMITTING, RETRIEVING, PARSING |
//! | set a retrieve list | NEW, TOSUBMIT |
//! | store the raw input folder | TOSUBMIT |
//! | set the remote workdir or the scheduler job id | SUBMITTING |
//! | set scheduler state, last job info | any |
//!
//! A job that was never stored has no state and counts as NEW.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::calcinfo::{RetrieveEntry, SinglefileEntry};
use crate::computer::Code;
use crate::error::{SchedError, SchedResult};
use crate::options::JobOptions;
use crate::state::{ExitStatus, JobState};

/// Unique identifier of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A reference to a data record linked as input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRef {
    pub uuid: Uuid,
    pub node_type: String,
}

impl DataRef {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            node_type: node_type.into(),
        }
    }
}

/// Record linked into a job under a label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "link", rename_all = "snake_case")]
pub enum InputNode {
    Code(Code),
    Data(DataRef),
}

impl InputNode {
    pub fn uuid(&self) -> Uuid {
        match self {
            InputNode::Code(code) => code.uuid,
            InputNode::Data(data) => data.uuid,
        }
    }

    pub fn as_code(&self) -> Option<&Code> {
        match self {
            InputNode::Code(code) => Some(code),
            InputNode::Data(_) => None,
        }
    }
}

/// Record produced by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLink {
    pub label: String,
    pub target: DataRef,
}

const INPUT_STATES: &[JobState] = &[JobState::New];
const OUTPUT_STATES: &[JobState] = &[JobState::Submitting, JobState::Retrieving, JobState::Parsing];
const RETRIEVE_STATES: &[JobState] = &[JobState::New, JobState::ToSubmit];
const RAW_INPUT_STATES: &[JobState] = &[JobState::ToSubmit];
const SUBMITTING_STATES: &[JobState] = &[JobState::Submitting];

/// A computational task run on a remote batch scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    label: String,
    state: Option<JobState>,
    /// State recorded before the job was imported; reported as `IMPORTED/<state>`.
    #[serde(default)]
    imported_from: Option<String>,
    #[serde(default)]
    options: JobOptions,
    #[serde(default)]
    inputs: BTreeMap<String, InputNode>,
    #[serde(default)]
    outputs: Vec<OutputLink>,
    job_id: Option<String>,
    remote_workdir: Option<String>,
    retrieve_list: Option<Vec<RetrieveEntry>>,
    retrieve_temporary_list: Option<Vec<RetrieveEntry>>,
    retrieve_singlefile_list: Option<Vec<SinglefileEntry>>,
    raw_input_folder: Option<PathBuf>,
    scheduler_state: Option<String>,
    scheduler_last_check_time: Option<DateTime<Utc>>,
    last_job_info: Option<Value>,
    exit_status: Option<i32>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl Job {
    /// Create an unstored job.
    pub fn new(label: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            label: label.into(),
            state: None,
            imported_from: None,
            options: JobOptions::new(),
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            job_id: None,
            remote_workdir: None,
            retrieve_list: None,
            retrieve_temporary_list: None,
            retrieve_singlefile_list: None,
            raw_input_folder: None,
            scheduler_state: None,
            scheduler_last_check_time: None,
            last_job_info: None,
            exit_status: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    // ---- lifecycle ----

    /// Current state, `None` until the job is first stored.
    pub fn state(&self) -> Option<JobState> {
        self.state
    }

    /// Mark the record as stored. An unset state becomes NEW; a stored job
    /// keeps its state.
    pub fn store(&mut self) {
        if self.state.is_none() {
            self.state = Some(JobState::New);
            self.touch();
            info!(job = %self.id, label = %self.label, "Job stored");
        }
    }

    /// Move the job along the lifecycle graph.
    ///
    /// Reaching a terminal state records its exit status. Moving to
    /// `IMPORTED` keeps the previous state as the imported original.
    pub fn set_state(&mut self, next: JobState) -> SchedResult<()> {
        let current = match self.state {
            None if next == JobState::New => {
                self.store();
                return Ok(());
            }
            None => JobState::New,
            Some(current) if current == next => {
                return Err(SchedError::IllegalState {
                    operation: format!("set the state to {next}"),
                    expected: "a different state".to_string(),
                    found: format!("{current} (already set)"),
                });
            }
            Some(current) => current,
        };

        if !current.can_transition_to(next) {
            return Err(SchedError::illegal_state(
                &format!("set the state to {next}"),
                &JobState::predecessors(next),
                self.state,
            ));
        }

        if next == JobState::Imported {
            self.imported_from = self.state.map(|s| s.to_string());
        }
        if let Some(status) = next.exit_status() {
            self.exit_status = Some(status.code());
        }
        self.state = Some(next);
        self.touch();
        info!(job = %self.id, from = %current, to = %next, "Job state changed");
        Ok(())
    }

    /// State for display; `IMPORTED/<original>` (or `IMPORTED/NOTFOUND`) for
    /// imported records.
    pub fn state_string(&self) -> Option<String> {
        match self.state? {
            JobState::Imported => Some(format!(
                "IMPORTED/{}",
                self.imported_from.as_deref().unwrap_or("NOTFOUND")
            )),
            state => Some(state.to_string()),
        }
    }

    pub fn imported_from(&self) -> Option<&str> {
        self.imported_from.as_deref()
    }

    /// NEW, or not stored yet.
    pub fn is_new(&self) -> bool {
        matches!(self.state, None | Some(JobState::New))
    }

    pub fn is_running(&self) -> bool {
        self.state.is_some_and(|s| s.is_running())
    }

    pub fn finished_ok(&self) -> bool {
        self.state.is_some_and(|s| s.is_finished_ok())
    }

    pub fn failed(&self) -> bool {
        self.state.is_some_and(|s| s.is_failed())
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    /// Label of the exit status, `UNKNOWN` for codes outside the enumeration.
    pub fn exit_status_label(&self) -> Option<&'static str> {
        self.exit_status.map(ExitStatus::label_for)
    }

    pub(crate) fn restore_state(&mut self, state: Option<JobState>, imported_from: Option<String>) {
        self.state = state;
        self.imported_from = imported_from;
        if let Some(status) = state.and_then(|s| s.exit_status()) {
            self.exit_status = Some(status.code());
        }
    }

    fn guard(&self, operation: &str, allowed: &[JobState]) -> SchedResult<()> {
        let current = self.state.unwrap_or(JobState::New);
        if allowed.contains(&current) {
            Ok(())
        } else {
            Err(SchedError::illegal_state(operation, allowed, self.state))
        }
    }

    fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    // ---- options ----

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn get_option(&self, name: &str) -> SchedResult<Option<Value>> {
        self.options.get(name, false)
    }

    pub fn set_option(&mut self, name: &str, value: Value) -> SchedResult<()> {
        self.guard("set an option", INPUT_STATES)?;
        self.options.set(name, value)?;
        self.touch();
        Ok(())
    }

    /// Set several options; nothing is applied if any of them is rejected.
    pub fn set_options<I, K>(&mut self, options: I) -> SchedResult<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.guard("set an option", INPUT_STATES)?;
        let mut updated = self.options.clone();
        updated.set_all(options)?;
        self.options = updated;
        self.touch();
        Ok(())
    }

    // ---- links ----

    pub fn inputs(&self) -> &BTreeMap<String, InputNode> {
        &self.inputs
    }

    /// Linked codes, in label order.
    pub fn codes(&self) -> impl Iterator<Item = &Code> {
        self.inputs.values().filter_map(InputNode::as_code)
    }

    pub fn add_input(&mut self, label: impl Into<String>, node: InputNode) -> SchedResult<()> {
        self.guard("add an input link", INPUT_STATES)?;
        let label = label.into();
        if self.inputs.contains_key(&label) {
            return Err(SchedError::Validation(format!(
                "input link label '{label}' is already used"
            )));
        }
        debug!(job = %self.id, label = %label, "Input linked");
        self.inputs.insert(label, node);
        self.touch();
        Ok(())
    }

    pub fn replace_input(&mut self, label: &str, node: InputNode) -> SchedResult<InputNode> {
        self.guard("replace an input link", INPUT_STATES)?;
        let Some(slot) = self.inputs.get_mut(label) else {
            return Err(SchedError::Validation(format!(
                "no input link labelled '{label}'"
            )));
        };
        let previous = std::mem::replace(slot, node);
        self.touch();
        Ok(previous)
    }

    pub fn remove_input(&mut self, label: &str) -> SchedResult<InputNode> {
        self.guard("remove an input link", INPUT_STATES)?;
        let removed = self.inputs.remove(label).ok_or_else(|| {
            SchedError::Validation(format!("no input link labelled '{label}'"))
        })?;
        self.touch();
        Ok(removed)
    }

    pub fn outputs(&self) -> &[OutputLink] {
        &self.outputs
    }

    pub fn add_output(&mut self, label: impl Into<String>, target: DataRef) -> SchedResult<()> {
        self.guard("add an output link", OUTPUT_STATES)?;
        self.outputs.push(OutputLink {
            label: label.into(),
            target,
        });
        self.touch();
        Ok(())
    }

    // ---- retrieve lists ----

    pub fn retrieve_list(&self) -> Option<&[RetrieveEntry]> {
        self.retrieve_list.as_deref()
    }

    pub fn retrieve_temporary_list(&self) -> Option<&[RetrieveEntry]> {
        self.retrieve_temporary_list.as_deref()
    }

    pub fn retrieve_singlefile_list(&self) -> Option<&[SinglefileEntry]> {
        self.retrieve_singlefile_list.as_deref()
    }

    pub fn set_retrieve_list(&mut self, list: Vec<RetrieveEntry>) -> SchedResult<()> {
        self.guard("set the retrieve list", RETRIEVE_STATES)?;
        self.retrieve_list = Some(list);
        self.touch();
        Ok(())
    }

    pub fn set_retrieve_temporary_list(&mut self, list: Vec<RetrieveEntry>) -> SchedResult<()> {
        self.guard("set the retrieve temporary list", RETRIEVE_STATES)?;
        self.retrieve_temporary_list = Some(list);
        self.touch();
        Ok(())
    }

    pub fn set_retrieve_singlefile_list(&mut self, list: Vec<SinglefileEntry>) -> SchedResult<()> {
        self.guard("set the retrieve singlefile list", RETRIEVE_STATES)?;
        self.retrieve_singlefile_list = Some(list);
        self.touch();
        Ok(())
    }

    // ---- submission ----

    pub fn raw_input_folder(&self) -> Option<&Path> {
        self.raw_input_folder.as_deref()
    }

    /// Record the deployment folder the submission was built in.
    pub fn store_raw_input(&mut self, folder: impl Into<PathBuf>) -> SchedResult<()> {
        self.guard("store the raw input folder", RAW_INPUT_STATES)?;
        self.raw_input_folder = Some(folder.into());
        self.touch();
        Ok(())
    }

    pub fn remote_workdir(&self) -> Option<&str> {
        self.remote_workdir.as_deref()
    }

    pub fn set_remote_workdir(&mut self, workdir: impl Into<String>) -> SchedResult<()> {
        self.guard("set the remote workdir", SUBMITTING_STATES)?;
        self.remote_workdir = Some(workdir.into());
        self.touch();
        Ok(())
    }

    /// Scheduler-assigned job id.
    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Set the scheduler job id. Only once, and only while SUBMITTING.
    pub fn set_job_id(&mut self, job_id: impl Into<String>) -> SchedResult<()> {
        self.guard("set the job id", SUBMITTING_STATES)?;
        if let Some(existing) = &self.job_id {
            return Err(SchedError::Validation(format!(
                "job id is already set to '{existing}'"
            )));
        }
        self.job_id = Some(job_id.into());
        self.touch();
        Ok(())
    }

    // ---- scheduler feedback ----

    pub fn scheduler_state(&self) -> Option<&str> {
        self.scheduler_state.as_deref()
    }

    pub fn scheduler_last_check_time(&self) -> Option<DateTime<Utc>> {
        self.scheduler_last_check_time
    }

    /// Record the status reported by the scheduler and the time of the check.
    pub fn set_scheduler_state(&mut self, state: impl Into<String>) {
        let now = Utc::now();
        self.scheduler_state = Some(state.into());
        self.scheduler_last_check_time = Some(now);
        self.modified_at = now;
    }

    pub fn last_job_info(&self) -> Option<&Value> {
        self.last_job_info.as_ref()
    }

    pub fn set_last_job_info(&mut self, info: Value) {
        self.last_job_info = Some(info);
        self.touch();
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Filter by state.
    pub states: Option<Vec<JobState>>,

    /// Filter by label substring.
    pub label_pattern: Option<String>,

    /// Filter by creation time range.
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,

    /// Include only running jobs.
    pub running_only: bool,

    /// Include only failed jobs.
    pub failed_only: bool,

    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Create a filter for running jobs.
    pub fn running() -> Self {
        Self {
            running_only: true,
            ..Default::default()
        }
    }

    /// Create a filter for failed jobs.
    pub fn failed() -> Self {
        Self {
            failed_only: true,
            ..Default::default()
        }
    }

    /// Filter by state.
    pub fn with_states(mut self, states: impl IntoIterator<Item = JobState>) -> Self {
        self.states = Some(states.into_iter().collect());
        self
    }

    /// Filter by label substring.
    pub fn with_label(mut self, pattern: impl Into<String>) -> Self {
        self.label_pattern = Some(pattern.into());
        self
    }

    /// Limit results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if a job matches this filter.
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(ref states) = self.states {
            if !job.state.is_some_and(|s| states.contains(&s)) {
                return false;
            }
        }

        if self.running_only && !job.is_running() {
            return false;
        }

        if self.failed_only && !job.failed() {
            return false;
        }

        if let Some(after) = self.created_after {
            if job.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if job.created_at > before {
                return false;
            }
        }

        if let Some(ref pattern) = self.label_pattern {
            if !job.label.contains(pattern) {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_in(state: JobState) -> Job {
        let mut job = Job::new("test");
        job.restore_state(Some(state), None);
        job
    }

    #[test]
    fn test_job_id() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);

        let parsed = JobId::parse(&id1.to_string()).unwrap();
        assert_eq!(id1, parsed);
    }

    #[test]
    fn test_store_starts_new() {
        let mut job = Job::new("relax");
        assert_eq!(job.state(), None);
        assert!(job.is_new());

        job.store();
        assert_eq!(job.state(), Some(JobState::New));

        job.set_state(JobState::ToSubmit).unwrap();
        job.store();
        assert_eq!(job.state(), Some(JobState::ToSubmit));
    }

    #[test]
    fn test_walk_happy_path() {
        let mut job = Job::new("scf");
        job.store();
        for next in [
            JobState::ToSubmit,
            JobState::Submitting,
            JobState::WithScheduler,
            JobState::Computed,
            JobState::Retrieving,
            JobState::Parsing,
            JobState::Finished,
        ] {
            job.set_state(next).unwrap();
        }
        assert!(job.finished_ok());
        assert_eq!(job.exit_status(), Some(0));
        assert_eq!(job.exit_status_label(), Some("FINISHED"));
    }

    #[test]
    fn test_backward_and_repeated_transitions_rejected() {
        let mut job = job_in(JobState::Submitting);

        let err = job.set_state(JobState::ToSubmit).unwrap_err();
        assert!(matches!(err, SchedError::IllegalState { .. }));
        assert_eq!(job.state(), Some(JobState::Submitting));

        let err = job.set_state(JobState::Submitting).unwrap_err();
        assert!(err.to_string().contains("already set"));
    }

    #[test]
    fn test_failure_records_exit_status() {
        let mut job = job_in(JobState::Retrieving);
        job.set_state(JobState::RetrievalFailed).unwrap();
        assert!(job.failed());
        assert_eq!(job.exit_status(), Some(200));

        assert!(job.set_state(JobState::Failed).is_err());
    }

    #[test]
    fn test_imported_overlay() {
        let mut job = job_in(JobState::Finished);
        job.set_state(JobState::Imported).unwrap();
        assert_eq!(job.state_string().as_deref(), Some("IMPORTED/FINISHED"));

        let mut job = Job::new("unstored");
        job.set_state(JobState::Imported).unwrap();
        assert_eq!(job.state_string().as_deref(), Some("IMPORTED/NOTFOUND"));
    }

    #[test]
    fn test_input_links_only_while_new() {
        let mut job = Job::new("links");
        job.add_input("structure", InputNode::Data(DataRef::new("structure")))
            .unwrap();
        assert!(job
            .add_input("structure", InputNode::Data(DataRef::new("structure")))
            .is_err());

        job.store();
        job.replace_input("structure", InputNode::Data(DataRef::new("cif")))
            .unwrap();
        job.set_state(JobState::ToSubmit).unwrap();

        let err = job
            .add_input("parameters", InputNode::Data(DataRef::new("dict")))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot add an input link: job must be in one of [NEW], it is instead TOSUBMIT"
        );
        assert!(job.remove_input("structure").is_err());
        assert_eq!(job.inputs().len(), 1);
    }

    #[test]
    fn test_output_links() {
        let mut job = job_in(JobState::WithScheduler);
        assert!(job.add_output("remote_folder", DataRef::new("remote")).is_err());

        let mut job = job_in(JobState::Submitting);
        job.add_output("remote_folder", DataRef::new("remote")).unwrap();
        assert_eq!(job.outputs()[0].label, "remote_folder");
    }

    #[test]
    fn test_job_id_and_workdir_only_while_submitting() {
        let mut job = job_in(JobState::ToSubmit);
        assert!(job.set_job_id("1234").is_err());
        assert!(job.set_remote_workdir("/scratch/ab/cd").is_err());
        assert_eq!(job.job_id(), None);

        let mut job = job_in(JobState::Submitting);
        job.set_job_id("1234").unwrap();
        job.set_remote_workdir("/scratch/ab/cd").unwrap();
        assert_eq!(job.job_id(), Some("1234"));
        assert!(job.set_job_id("5678").is_err());
        assert_eq!(job.job_id(), Some("1234"));
    }

    #[test]
    fn test_retrieve_lists_and_raw_input() {
        let mut job = Job::new("retrieve");
        job.set_retrieve_list(vec![RetrieveEntry::path("out.log")])
            .unwrap();
        assert!(job.store_raw_input("/tmp/deploy").is_err());

        job.store();
        job.set_state(JobState::ToSubmit).unwrap();
        job.set_retrieve_temporary_list(vec![RetrieveEntry::nested("*.xml", ".", 0)])
            .unwrap();
        job.store_raw_input("/tmp/deploy").unwrap();

        job.set_state(JobState::Submitting).unwrap();
        assert!(job
            .set_retrieve_singlefile_list(vec![SinglefileEntry::new("a", "singlefile", "a.txt")])
            .is_err());
        assert_eq!(job.retrieve_list().map(<[_]>::len), Some(1));
    }

    #[test]
    fn test_scheduler_state_any_time() {
        let mut job = job_in(JobState::Finished);
        job.set_scheduler_state("DONE");
        job.set_last_job_info(json!({"exit_code": 0}));
        assert_eq!(job.scheduler_state(), Some("DONE"));
        assert!(job.scheduler_last_check_time().is_some());
        assert_eq!(job.last_job_info(), Some(&json!({"exit_code": 0})));
    }

    #[test]
    fn test_set_options_is_all_or_nothing() {
        let mut job = Job::new("opts");
        let err = job
            .set_options([("queue_name", json!("debug")), ("withmpi", json!("yes"))])
            .unwrap_err();
        assert!(matches!(err, SchedError::InvalidOptionType { .. }));
        assert_eq!(job.options().get("queue_name", true).unwrap(), None);

        job.store();
        job.set_state(JobState::ToSubmit).unwrap();
        assert!(job.set_option("queue_name", json!("debug")).is_err());
    }

    #[test]
    fn test_job_round_trips_through_json() {
        let mut job = Job::new("persist");
        job.set_option("max_wallclock_seconds", json!(600)).unwrap();
        job.store();

        let json = serde_json::to_string(&job).unwrap();
        let restored: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, job);
    }

    #[test]
    fn test_job_filter() {
        let job = job_in(JobState::WithScheduler);

        assert!(JobFilter::running().matches(&job));
        assert!(!JobFilter::failed().matches(&job));
        assert!(JobFilter::default()
            .with_states([JobState::WithScheduler])
            .matches(&job));
        assert!(!JobFilter::default().with_label("relax").matches(&job));
    }
}
