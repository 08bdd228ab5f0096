//! Computers and codes referenced by a job.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{SchedError, SchedResult};

/// A remote resource jobs are submitted to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computer {
    pub uuid: Uuid,
    pub name: String,
    pub hostname: String,
    /// Scheduler adapter name (e.g. `"slurm"`), resolved outside this crate.
    pub scheduler_type: String,
    pub shebang: String,
    /// MPI launcher argv; elements may contain `{tot_num_mpiprocs}` or any
    /// resource field as a placeholder.
    pub mpirun_command: Vec<String>,
    pub default_mpiprocs_per_machine: Option<u32>,
    pub prepend_text: String,
    pub append_text: String,
}

impl Computer {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.into(),
            hostname: hostname.into(),
            scheduler_type: "direct".to_string(),
            shebang: "#!/bin/bash".to_string(),
            mpirun_command: vec![
                "mpirun".to_string(),
                "-np".to_string(),
                "{tot_num_mpiprocs}".to_string(),
            ],
            default_mpiprocs_per_machine: None,
            prepend_text: String::new(),
            append_text: String::new(),
        }
    }

    pub fn with_scheduler(mut self, scheduler_type: impl Into<String>) -> Self {
        self.scheduler_type = scheduler_type.into();
        self
    }

    pub fn with_mpirun_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mpirun_command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_mpiprocs_per_machine(mut self, procs: u32) -> Self {
        self.default_mpiprocs_per_machine = Some(procs);
        self
    }

    pub fn with_prepend_text(mut self, text: impl Into<String>) -> Self {
        self.prepend_text = text.into();
        self
    }

    pub fn with_append_text(mut self, text: impl Into<String>) -> Self {
        self.append_text = text.into();
        self
    }
}

/// Resolves computer references found in copy lists.
pub trait ComputerLookup: Send + Sync {
    /// Fails with [`SchedError::ComputerNotFound`] for unknown UUIDs.
    fn get_computer(&self, uuid: &Uuid) -> SchedResult<Computer>;
}

/// In-memory computer registry.
#[derive(Debug, Clone, Default)]
pub struct ComputerRegistry {
    computers: FxHashMap<Uuid, Computer>,
}

impl ComputerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, computer: Computer) {
        self.computers.insert(computer.uuid, computer);
    }

    pub fn with(mut self, computer: Computer) -> Self {
        self.insert(computer);
        self
    }

    pub fn len(&self) -> usize {
        self.computers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.computers.is_empty()
    }
}

impl ComputerLookup for ComputerRegistry {
    fn get_computer(&self, uuid: &Uuid) -> SchedResult<Computer> {
        self.computers
            .get(uuid)
            .cloned()
            .ok_or_else(|| SchedError::ComputerNotFound(uuid.to_string()))
    }
}

/// Where a code's executable lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeLocation {
    /// Installed on a computer.
    Remote { computer: Uuid, executable_path: String },
    /// Shipped with every submission; the executable is copied into the
    /// deployment folder.
    Local { executable: String },
}

/// An executable a job invokes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Code {
    pub uuid: Uuid,
    pub label: String,
    pub location: CodeLocation,
    pub prepend_text: String,
    pub append_text: String,
}

impl Code {
    pub fn remote(label: impl Into<String>, computer: Uuid, executable_path: impl Into<String>) -> Self {
        Self::with_location(
            label,
            CodeLocation::Remote {
                computer,
                executable_path: executable_path.into(),
            },
        )
    }

    pub fn local(label: impl Into<String>, executable: impl Into<String>) -> Self {
        Self::with_location(
            label,
            CodeLocation::Local {
                executable: executable.into(),
            },
        )
    }

    fn with_location(label: impl Into<String>, location: CodeLocation) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            label: label.into(),
            location,
            prepend_text: String::new(),
            append_text: String::new(),
        }
    }

    pub fn with_prepend_text(mut self, text: impl Into<String>) -> Self {
        self.prepend_text = text.into();
        self
    }

    pub fn with_append_text(mut self, text: impl Into<String>) -> Self {
        self.append_text = text.into();
        self
    }

    pub fn is_local(&self) -> bool {
        matches!(self.location, CodeLocation::Local { .. })
    }

    /// Name of the executable inside the deployment folder, for local codes.
    pub fn local_executable(&self) -> Option<&str> {
        match &self.location {
            CodeLocation::Local { executable } => Some(executable),
            CodeLocation::Remote { .. } => None,
        }
    }

    /// What the submission script invokes.
    pub fn execname(&self) -> String {
        match &self.location {
            CodeLocation::Remote { executable_path, .. } => executable_path.clone(),
            CodeLocation::Local { executable } => format!("./{executable}"),
        }
    }
}
