//! Seam to the batch scheduler.
//!
//! The core never speaks a scheduler's syntax itself. A [`SchedulerAdapter`]
//! turns the `resources` option into a [`ResourceSpec`] and a filled-in
//! [`JobTemplate`] into the text of a submission script.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::calcinfo::{CodeInfo, CodeRunMode};
use crate::error::SchedResult;

/// Resource request validated by a scheduler adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceSpec {
    fields: Map<String, Value>,
}

impl ResourceSpec {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.fields.get(name).and_then(Value::as_u64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// Everything a scheduler adapter needs to render a submission script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub shebang: String,
    pub submit_as_hold: bool,
    pub rerunnable: bool,
    pub job_environment: BTreeMap<String, String>,
    pub job_name: String,
    pub sched_output_path: Option<String>,
    pub sched_error_path: Option<String>,
    /// Standard output and error go to the same file.
    pub sched_join_files: bool,
    pub queue_name: Option<String>,
    pub account: Option<String>,
    pub qos: Option<String>,
    pub priority: Option<String>,
    pub max_memory_kb: Option<u64>,
    pub max_wallclock_seconds: Option<u64>,
    pub custom_scheduler_commands: String,
    pub import_sys_environment: bool,
    pub job_resource: ResourceSpec,
    pub prepend_text: String,
    pub append_text: String,
    pub codes_info: Vec<CodeInfo>,
    pub codes_run_mode: Option<CodeRunMode>,
}

/// Translates resource requests and job templates for one batch system.
pub trait SchedulerAdapter: Send + Sync {
    /// Adapter name, e.g. `"slurm"`.
    fn name(&self) -> &str;

    /// Validate the `resources` option. Errors are reported to the caller as
    /// validation failures.
    fn build_resource_spec(&self, resources: &Map<String, Value>) -> SchedResult<ResourceSpec>;

    /// Total MPI process count requested by `spec`.
    fn total_process_count(&self, spec: &ResourceSpec) -> u64;

    /// Render the full submission script.
    fn render_script(&self, template: &JobTemplate) -> SchedResult<String>;
}
