//! In-process job store.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use super::{JobStore, sort_and_limit, state_conflict};
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobFilter, JobId};
use crate::state::JobState;

/// Job store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<FxHashMap<JobId, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save_job(&self, job: &Job) -> SchedResult<()> {
        self.jobs.write().await.insert(job.id(), job.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: &JobId) -> SchedResult<Option<Job>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn update_job_if_state(&self, job: &Job, expected: Option<JobState>) -> SchedResult<()> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job.id())
            .ok_or_else(|| SchedError::JobNotFound(job.id().to_string()))?;
        if stored.state() != expected {
            return Err(state_conflict(&job.id(), expected, stored.state()));
        }
        *stored = job.clone();
        Ok(())
    }

    async fn delete_job(&self, job_id: &JobId) -> SchedResult<bool> {
        Ok(self.jobs.write().await.remove(job_id).is_some())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> SchedResult<Vec<Job>> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        sort_and_limit(&mut jobs, filter);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::advance_state;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryStore::new();
        let mut job = Job::new("scf");
        job.store();
        let job_id = job.id();

        store.save_job(&job).await.unwrap();
        assert_eq!(store.len().await, 1);

        let loaded = store.load_job(&job_id).await.unwrap().unwrap();
        assert_eq!(loaded.label(), "scf");

        assert!(store.delete_job(&job_id).await.unwrap());
        assert!(!store.delete_job(&job_id).await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_if_state_detects_concurrent_writer() {
        let store = MemoryStore::new();
        let mut job = Job::new("race");
        job.store();
        store.save_job(&job).await.unwrap();

        // Two writers load the same NEW record.
        let mut first = store.load_job(&job.id()).await.unwrap().unwrap();
        let mut second = first.clone();

        first.set_state(JobState::ToSubmit).unwrap();
        store
            .update_job_if_state(&first, Some(JobState::New))
            .await
            .unwrap();

        second.set_state(JobState::Failed).unwrap();
        let err = store
            .update_job_if_state(&second, Some(JobState::New))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::StateConflict { .. }));

        let stored = store.load_job(&job.id()).await.unwrap().unwrap();
        assert_eq!(stored.state(), Some(JobState::ToSubmit));
    }

    #[tokio::test]
    async fn test_advance_state() {
        let store = MemoryStore::new();
        let mut job = Job::new("advance");
        job.store();
        store.save_job(&job).await.unwrap();

        let advanced = advance_state(&store, &job.id(), JobState::ToSubmit).await.unwrap();
        assert_eq!(advanced.state(), Some(JobState::ToSubmit));

        let err = advance_state(&store, &job.id(), JobState::Finished).await.unwrap_err();
        assert!(matches!(err, SchedError::IllegalState { .. }));

        let missing = advance_state(&store, &JobId::new(), JobState::ToSubmit).await.unwrap_err();
        assert!(matches!(missing, SchedError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_jobs_filter_and_limit() {
        let store = MemoryStore::new();
        for label in ["a", "b", "c"] {
            let mut job = Job::new(label);
            job.store();
            store.save_job(&job).await.unwrap();
        }
        let mut running = Job::new("running");
        running.store();
        running.set_state(JobState::ToSubmit).unwrap();
        store.save_job(&running).await.unwrap();

        let jobs = store.list_jobs(&JobFilter::running()).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].label(), "running");

        let jobs = store
            .list_jobs(&JobFilter::default().with_states([JobState::New]).with_limit(2))
            .await
            .unwrap();
        assert_eq!(jobs.len(), 2);
    }
}
