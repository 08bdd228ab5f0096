//! Remora job lifecycle and submission packaging
//!
//! This crate models a calculation job that is prepared locally and run on a
//! remote batch scheduler.
//!
//! # Overview
//!
//! A job moves through a fixed lifecycle:
//! 1. **NEW**: options and input links can still be edited
//! 2. **TOSUBMIT / SUBMITTING**: the submission folder is built and uploaded
//! 3. **WITHSCHEDULER / COMPUTED**: the scheduler owns the job
//! 4. **RETRIEVING / PARSING**: outputs come back and are parsed
//! 5. **FINISHED** or one of the failure states
//!
//! Every mutating operation on [`Job`] checks the current state and fails
//! with [`SchedError::IllegalState`] outside its allowed set, leaving the
//! record untouched.
//!
//! # Key Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`Job`] | Lifecycle, options and links of one calculation |
//! | [`JobOptions`] | Typed option table with defaults |
//! | [`SubmissionBuilder`] | Turns a plugin's [`CalcInfo`] into a [`SubmissionPackage`] |
//! | [`JobStore`] | Persistence with set-if-state-matches updates |
//! | [`ParsedResults`] | Named parser output |
//!
//! # Example
//!
//! ```ignore
//! use remora_sched::{Job, JobState, SubmissionBuilder};
//! use serde_json::json;
//!
//! let mut job = Job::new("relax");
//! job.set_option("resources", json!({"num_machines": 2}))?;
//! job.set_option("max_wallclock_seconds", json!(3600))?;
//! job.store();
//! job.set_state(JobState::ToSubmit)?;
//!
//! let builder = SubmissionBuilder::new(&slurm, &computers);
//! let package = builder.presubmit(&mut job, &computer, &plugin, folder).await?;
//! println!("{}", package.script);
//! ```

pub mod calcinfo;
pub mod computer;
pub mod error;
pub mod job;
pub mod options;
pub mod persistence;
pub mod results;
pub mod scheduler;
pub mod state;
pub mod submission;

pub use calcinfo::{CalcInfo, CodeInfo, CodeRunMode, RetrieveEntry, SinglefileEntry};
pub use computer::{Code, CodeLocation, Computer, ComputerLookup, ComputerRegistry};
pub use error::{SchedError, SchedResult};
pub use job::{DataRef, InputNode, Job, JobFilter, JobId, OutputLink};
pub use options::{JobOptions, OptionSpec, OptionType};
pub use persistence::{JobStore, JsonStore, MemoryStore, advance_state};
pub use results::{ParsedResults, ResultParser};
pub use scheduler::{JobTemplate, ResourceSpec, SchedulerAdapter};
pub use state::{ExitStatus, JobState};
pub use submission::{
    CalculationPlugin, DryRun, LocalCopy, RemoteCopy, SubmissionBuilder, SubmissionPackage,
};
