//! JSON file-based persistence for development and testing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::fs;
use tokio::sync::RwLock;

use super::{JobStore, sort_and_limit, state_conflict};
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobFilter, JobId};
use crate::state::JobState;

/// JSON file-based job store.
///
/// Stores each job as a separate JSON file under `<base>/jobs/` with an
/// in-memory cache in front. Suitable for development and single-process
/// deployments.
pub struct JsonStore {
    /// Base directory for storage.
    base_dir: PathBuf,

    /// In-memory cache of jobs.
    cache: RwLock<FxHashMap<JobId, Job>>,
}

impl JsonStore {
    /// Create a new JSON store at the given path, loading existing records.
    pub async fn new(base_dir: impl AsRef<Path>) -> SchedResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(base_dir.join("jobs")).await?;

        let store = Self {
            base_dir,
            cache: RwLock::new(FxHashMap::default()),
        };
        store.load_all_jobs().await?;
        Ok(store)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn job_path(&self, job_id: &JobId) -> PathBuf {
        self.base_dir.join("jobs").join(format!("{job_id}.json"))
    }

    async fn write_job(&self, job: &Job) -> SchedResult<()> {
        let path = self.job_path(&job.id());
        let json = serde_json::to_string_pretty(job)?;
        fs::write(&path, json).await?;
        Ok(())
    }

    async fn load_all_jobs(&self) -> SchedResult<()> {
        let jobs_dir = self.base_dir.join("jobs");
        let mut cache = self.cache.write().await;

        let mut entries = fs::read_dir(&jobs_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match fs::read_to_string(&path).await {
                    Ok(content) => match serde_json::from_str::<Job>(&content) {
                        Ok(job) => {
                            cache.insert(job.id(), job);
                        }
                        Err(e) => {
                            tracing::warn!("Failed to parse job file {:?}: {}", path, e);
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Failed to read job file {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::debug!(jobs = cache.len(), dir = %jobs_dir.display(), "Job store loaded");
        Ok(())
    }
}

#[async_trait]
impl JobStore for JsonStore {
    async fn save_job(&self, job: &Job) -> SchedResult<()> {
        let mut cache = self.cache.write().await;
        self.write_job(job).await?;
        cache.insert(job.id(), job.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: &JobId) -> SchedResult<Option<Job>> {
        // Check cache first
        let cache = self.cache.read().await;
        if let Some(job) = cache.get(job_id) {
            return Ok(Some(job.clone()));
        }
        drop(cache);

        // Load from file
        let path = self.job_path(job_id);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let job: Job = serde_json::from_str(&content)?;
                let mut cache = self.cache.write().await;
                cache.insert(job.id(), job.clone());
                Ok(Some(job))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SchedError::IoError(e)),
        }
    }

    async fn update_job_if_state(&self, job: &Job, expected: Option<JobState>) -> SchedResult<()> {
        // The write lock is held across the comparison and the file write.
        let mut cache = self.cache.write().await;
        let stored = cache
            .get(&job.id())
            .ok_or_else(|| SchedError::JobNotFound(job.id().to_string()))?;
        if stored.state() != expected {
            return Err(state_conflict(&job.id(), expected, stored.state()));
        }

        self.write_job(job).await?;
        cache.insert(job.id(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, job_id: &JobId) -> SchedResult<bool> {
        let path = self.job_path(job_id);

        let mut cache = self.cache.write().await;
        let was_present = cache.remove(job_id).is_some();

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(was_present),
            Err(e) => Err(SchedError::IoError(e)),
        }
    }

    async fn list_jobs(&self, filter: &JobFilter) -> SchedResult<Vec<Job>> {
        let cache = self.cache.read().await;

        let mut jobs: Vec<_> = cache
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        sort_and_limit(&mut jobs, filter);
        Ok(jobs)
    }
}
