//! Submission packaging.
//!
//! [`SubmissionBuilder::build`] assembles a [`SubmissionPackage`] from a job,
//! its computer and the [`CalcInfo`] a [`CalculationPlugin`] produced.
//! [`SubmissionBuilder::presubmit`] runs the whole step against a deployment
//! folder, and [`SubmissionBuilder::submit_test`] does the same in a fresh
//! dry-run folder without touching the job.

mod builder;
mod deploy;

pub use builder::SubmissionBuilder;
pub use deploy::DryRun;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calcinfo::{CalcInfo, RetrieveEntry, SinglefileEntry};
use crate::error::SchedResult;
use crate::job::Job;
use crate::scheduler::JobTemplate;

/// Name of the submission script in the deployment folder.
pub const SUBMIT_SCRIPT_NAME: &str = "_remorasubmit.sh";
/// Subfolder holding the serialized template and calc-info.
pub const MANIFEST_FOLDER: &str = ".remora";
pub const JOB_TEMPLATE_FILE: &str = "job_tmpl.json";
pub const CALCINFO_FILE: &str = "calcinfo.json";
/// Scheduler stdout, relative to the remote workdir.
pub const SCHED_OUTPUT_FILE: &str = "_scheduler-stdout.txt";
/// Scheduler stderr, relative to the remote workdir.
pub const SCHED_ERROR_FILE: &str = "_scheduler-stderr.txt";
/// Dry-run description of remote copies.
pub const REMOTE_COPY_LIST_FILE: &str = "_remora_remote_copy_list.txt";
/// Dry-run description of remote symlinks.
pub const REMOTE_SYMLINK_LIST_FILE: &str = "_remora_remote_symlink_list.txt";
/// Single-file kinds accepted in retrieve singlefile lists by default.
pub const DEFAULT_SINGLEFILE_KINDS: &[&str] = &["singlefile"];

/// Writes the input files of a job and describes how to run it.
#[async_trait]
pub trait CalculationPlugin: Send + Sync {
    /// Fill `folder` with input files and return the calc-info for `job`.
    async fn prepare_for_submission(&self, folder: &Path, job: &Job) -> SchedResult<CalcInfo>;
}

/// A local file copied into the remote working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCopy {
    pub source: PathBuf,
    pub destination: String,
}

/// A file already on some computer, copied or linked into the remote
/// working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCopy {
    pub computer: Uuid,
    pub computer_name: String,
    pub source: String,
    pub destination: String,
}

/// Everything needed to deploy one submission attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionPackage {
    pub script_filename: String,
    pub script: String,
    pub template: JobTemplate,
    /// Calc-info with resolved code invocations and retrieve lists.
    pub calcinfo: CalcInfo,
    pub local_copies: Vec<LocalCopy>,
    pub remote_copies: Vec<RemoteCopy>,
    pub remote_symlinks: Vec<RemoteCopy>,
}

impl SubmissionPackage {
    pub fn retrieve_list(&self) -> &[RetrieveEntry] {
        &self.calcinfo.retrieve_list
    }

    pub fn retrieve_temporary_list(&self) -> &[RetrieveEntry] {
        &self.calcinfo.retrieve_temporary_list
    }

    pub fn retrieve_singlefile_list(&self) -> &[SinglefileEntry] {
        &self.calcinfo.retrieve_singlefile_list
    }
}
