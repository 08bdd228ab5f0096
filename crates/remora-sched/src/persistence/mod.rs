//! Persistence layer for job records.

mod json_store;
pub mod legacy;
mod memory_store;

pub use json_store::JsonStore;
pub use memory_store::MemoryStore;

use async_trait::async_trait;

use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobFilter, JobId};
use crate::state::JobState;

/// Trait for persistent job storage.
///
/// Implementations must make [`update_job_if_state`](JobStore::update_job_if_state)
/// atomic: the state comparison and the write happen under one lock so that
/// two writers cannot both advance the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Save a job, replacing any stored record with the same id.
    async fn save_job(&self, job: &Job) -> SchedResult<()>;

    /// Load a job from the store.
    async fn load_job(&self, job_id: &JobId) -> SchedResult<Option<Job>>;

    /// Replace the stored record only if its state is still `expected`.
    ///
    /// Fails with [`SchedError::StateConflict`] when another writer changed
    /// the state and with [`SchedError::JobNotFound`] when there is no record.
    async fn update_job_if_state(&self, job: &Job, expected: Option<JobState>) -> SchedResult<()>;

    /// Delete a job from the store.
    async fn delete_job(&self, job_id: &JobId) -> SchedResult<bool>;

    /// List jobs matching a filter, oldest first.
    async fn list_jobs(&self, filter: &JobFilter) -> SchedResult<Vec<Job>>;
}

/// Load `job_id`, move it to `next` and write it back if nobody else moved
/// it in the meantime.
pub async fn advance_state(store: &dyn JobStore, job_id: &JobId, next: JobState) -> SchedResult<Job> {
    let mut job = store
        .load_job(job_id)
        .await?
        .ok_or_else(|| SchedError::JobNotFound(job_id.to_string()))?;
    let expected = job.state();
    job.set_state(next)?;
    store.update_job_if_state(&job, expected).await?;
    Ok(job)
}

pub(crate) fn state_conflict(job_id: &JobId, expected: Option<JobState>, found: Option<JobState>) -> SchedError {
    let name = |state: Option<JobState>| state.map_or_else(|| "unset".to_string(), |s| s.to_string());
    SchedError::StateConflict {
        job_id: job_id.to_string(),
        expected: name(expected),
        found: name(found),
    }
}

pub(crate) fn sort_and_limit(jobs: &mut Vec<Job>, filter: &JobFilter) {
    jobs.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(&b.id()))
    });
    if let Some(limit) = filter.limit {
        jobs.truncate(limit);
    }
}
