//! Assembly of the job template and copy lists.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::{
    DEFAULT_SINGLEFILE_KINDS, LocalCopy, RemoteCopy, SCHED_ERROR_FILE, SCHED_OUTPUT_FILE,
    SUBMIT_SCRIPT_NAME, SubmissionPackage,
};
use crate::calcinfo::{CalcInfo, CodeInfo, CodeRunMode, RetrieveEntry};
use crate::computer::{Code, Computer, ComputerLookup};
use crate::error::{SchedError, SchedResult};
use crate::job::Job;
use crate::scheduler::{JobTemplate, ResourceSpec, SchedulerAdapter};

/// Builds submission packages for one scheduler adapter.
pub struct SubmissionBuilder<'a> {
    adapter: &'a dyn SchedulerAdapter,
    computers: &'a dyn ComputerLookup,
    singlefile_kinds: Vec<String>,
    sched_output_file: String,
    sched_error_file: String,
}

impl<'a> SubmissionBuilder<'a> {
    pub fn new(adapter: &'a dyn SchedulerAdapter, computers: &'a dyn ComputerLookup) -> Self {
        Self {
            adapter,
            computers,
            singlefile_kinds: DEFAULT_SINGLEFILE_KINDS.iter().map(|s| s.to_string()).collect(),
            sched_output_file: SCHED_OUTPUT_FILE.to_string(),
            sched_error_file: SCHED_ERROR_FILE.to_string(),
        }
    }

    /// Replace the accepted single-file kinds.
    pub fn with_singlefile_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.singlefile_kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    /// Override the scheduler stdout/stderr file names. Equal names request
    /// joined streams.
    pub fn with_scheduler_files(mut self, output: impl Into<String>, error: impl Into<String>) -> Self {
        self.sched_output_file = output.into();
        self.sched_error_file = error.into();
        self
    }

    /// Check that the job's resources are acceptable on `computer`.
    pub fn validate(&self, job: &Job, computer: &Computer) -> SchedResult<()> {
        self.resource_spec(job, computer)?;
        job.options().get_as::<bool>("withmpi")?;
        Ok(())
    }

    /// Assemble the package. `folder_contents` lists the file names the
    /// plugin wrote into the deployment folder.
    pub fn build(
        &self,
        job: &Job,
        computer: &Computer,
        mut calcinfo: CalcInfo,
        folder_contents: &[String],
    ) -> SchedResult<SubmissionPackage> {
        let codes: Vec<&Code> = job.codes().collect();

        for code in &codes {
            if let Some(executable) = code.local_executable() {
                if folder_contents.iter().any(|name| name == executable) {
                    return Err(SchedError::Plugin(format!(
                        "the plugin created a file '{executable}' that is also the executable name"
                    )));
                }
            }
        }

        let mut template = JobTemplate {
            shebang: computer.shebang.clone(),
            job_name: format!("remora-{}", job.id()),
            sched_output_path: Some(self.sched_output_file.clone()),
            ..Default::default()
        };
        if self.sched_error_file == self.sched_output_file {
            template.sched_join_files = true;
        } else {
            template.sched_error_path = Some(self.sched_error_file.clone());
        }

        for path in [&template.sched_output_path, &template.sched_error_path]
            .into_iter()
            .flatten()
        {
            let present = calcinfo
                .retrieve_list
                .iter()
                .any(|entry| matches!(entry, RetrieveEntry::Path(p) if p == path));
            if !present {
                calcinfo.retrieve_list.push(RetrieveEntry::Path(path.clone()));
            }
        }

        for entry in &calcinfo.retrieve_singlefile_list {
            if !self.singlefile_kinds.contains(&entry.file_kind) {
                return Err(SchedError::Plugin(format!(
                    "retrieve_singlefile_list entry '{}' uses unknown single-file kind '{}'",
                    entry.link_name, entry.file_kind
                )));
            }
        }

        let option_prepend: String = job.options().get_as("prepend_text")?.unwrap_or_default();
        let option_append: String = job.options().get_as("append_text")?.unwrap_or_default();
        let calc_prepend = calcinfo.prepend_text.clone().unwrap_or_default();
        let calc_append = calcinfo.append_text.clone().unwrap_or_default();

        template.prepend_text = join_text(
            std::iter::once(computer.prepend_text.as_str())
                .chain(codes.iter().map(|c| c.prepend_text.as_str()))
                .chain([calc_prepend.as_str(), option_prepend.as_str()]),
        );
        template.append_text = join_text(
            [option_append.as_str(), calc_append.as_str()]
                .into_iter()
                .chain(codes.iter().rev().map(|c| c.append_text.as_str()))
                .chain(std::iter::once(computer.append_text.as_str())),
        );

        let resources = self.resource_spec(job, computer)?;
        let codes_info = self.resolve_codes(job, computer, &codes, &calcinfo.codes_info, &resources)?;
        calcinfo.codes_info = codes_info.clone();
        template.codes_info = codes_info;

        template.codes_run_mode = if codes.len() > 1 {
            Some(calcinfo.codes_run_mode.ok_or_else(|| {
                SchedError::Plugin(format!(
                    "job links {} codes but the calc-info does not set the run mode (serial or parallel)",
                    codes.len()
                ))
            })?)
        } else {
            Some(CodeRunMode::Serial)
        };

        let options = job.options();
        template.custom_scheduler_commands = options
            .get_as("custom_scheduler_commands")?
            .unwrap_or_default();
        template.import_sys_environment = options.get_as("import_sys_environment")?.unwrap_or(true);
        template.job_environment = options
            .get_as::<BTreeMap<String, String>>("environment_variables")?
            .unwrap_or_default();
        template.queue_name = options.get_as("queue_name")?;
        template.account = options.get_as("account")?;
        template.qos = options.get_as("qos")?;
        template.priority = options.get_as("priority")?;
        template.max_memory_kb = options.get_as("max_memory_kb")?;
        template.max_wallclock_seconds = options.get_as("max_wallclock_seconds")?;
        template.job_resource = resources;

        let local_copies = calcinfo
            .local_copy_list
            .iter()
            .map(|row| match row.as_slice() {
                [source, destination] => {
                    check_relative("local_copy_list", destination)?;
                    Ok(LocalCopy {
                        source: source.into(),
                        destination: destination.clone(),
                    })
                }
                _ => Err(SchedError::Validation(format!(
                    "local_copy_list entry {row:?} must have 2 fields (source, destination), found {}",
                    row.len()
                ))),
            })
            .collect::<SchedResult<Vec<_>>>()?;
        let remote_copies = self.remote_entries("remote_copy_list", &calcinfo.remote_copy_list)?;
        let remote_symlinks =
            self.remote_entries("remote_symlink_list", &calcinfo.remote_symlink_list)?;

        calcinfo.uuid = Some(job.id().0);
        let script = self.adapter.render_script(&template)?;

        debug!(
            job = %job.id(),
            scheduler = self.adapter.name(),
            codes = template.codes_info.len(),
            "Submission package assembled"
        );

        Ok(SubmissionPackage {
            script_filename: SUBMIT_SCRIPT_NAME.to_string(),
            script,
            template,
            calcinfo,
            local_copies,
            remote_copies,
            remote_symlinks,
        })
    }

    fn resource_spec(&self, job: &Job, computer: &Computer) -> SchedResult<ResourceSpec> {
        let mut resources: Map<String, Value> = job.options().get_as("resources")?.unwrap_or_default();
        if let Some(procs) = computer.default_mpiprocs_per_machine {
            resources.insert("default_mpiprocs_per_machine".to_string(), Value::from(procs));
        }
        self.adapter.build_resource_spec(&resources).map_err(|e| {
            SchedError::Validation(format!(
                "invalid resources for the {} scheduler of computer '{}': {e}",
                self.adapter.name(),
                computer.name
            ))
        })
    }

    fn resolve_codes(
        &self,
        job: &Job,
        computer: &Computer,
        codes: &[&Code],
        codes_info: &[CodeInfo],
        resources: &ResourceSpec,
    ) -> SchedResult<Vec<CodeInfo>> {
        let mut placeholders = resources.fields().clone();
        placeholders.insert(
            "tot_num_mpiprocs".to_string(),
            Value::from(self.adapter.total_process_count(resources)),
        );
        let mpi_args = computer
            .mpirun_command
            .iter()
            .map(|arg| substitute(arg, &placeholders))
            .collect::<SchedResult<Vec<_>>>()?;
        let extra_params: Vec<String> = job.options().get_as("mpirun_extra_params")?.unwrap_or_default();
        let default_withmpi: bool = job.options().get_as("withmpi")?.unwrap_or(true);

        let mut resolved = Vec::with_capacity(codes_info.len());
        for info in codes_info {
            let uuid = info.code_uuid.ok_or_else(|| {
                SchedError::Plugin("calc-info entry does not name the code to launch".to_string())
            })?;
            let code = find_code(codes, uuid).ok_or_else(|| {
                SchedError::Plugin(format!("code {uuid} is not linked to job {}", job.id()))
            })?;

            let withmpi = match info.withmpi {
                Some(withmpi) => withmpi,
                None if codes_info.len() > 1 => {
                    return Err(SchedError::Configuration(format!(
                        "withmpi must be declared for every code of a job running {} codes (code '{}' leaves it unset)",
                        codes_info.len(),
                        code.label
                    )));
                }
                None => default_withmpi,
            };

            let mut argv = Vec::new();
            if withmpi {
                argv.extend(mpi_args.iter().cloned());
                argv.extend(extra_params.iter().cloned());
            }
            argv.push(code.execname());
            argv.extend(info.cmdline_params.iter().cloned());

            resolved.push(CodeInfo {
                cmdline_params: argv,
                withmpi: Some(withmpi),
                ..info.clone()
            });
        }
        Ok(resolved)
    }

    fn remote_entries(&self, list: &str, rows: &[Vec<String>]) -> SchedResult<Vec<RemoteCopy>> {
        rows.iter()
            .map(|row| {
                let [computer, source, destination] = row.as_slice() else {
                    return Err(SchedError::Validation(format!(
                        "{list} entry {row:?} must have 3 fields (computer uuid, source, destination), found {}",
                        row.len()
                    )));
                };
                let uuid = Uuid::parse_str(computer).map_err(|e| {
                    SchedError::Configuration(format!(
                        "{list} refers to computer '{computer}' which is not a valid UUID: {e}"
                    ))
                })?;
                let remote = self.computers.get_computer(&uuid).map_err(|_| {
                    SchedError::Configuration(format!(
                        "{list} requires a computer with UUID {uuid} but no such computer is known"
                    ))
                })?;
                check_relative(list, destination)?;
                Ok(RemoteCopy {
                    computer: uuid,
                    computer_name: remote.name,
                    source: source.clone(),
                    destination: destination.clone(),
                })
            })
            .collect()
    }
}

fn find_code<'c>(codes: &[&'c Code], uuid: Uuid) -> Option<&'c Code> {
    codes.iter().copied().find(|code| code.uuid == uuid)
}

fn check_relative(list: &str, destination: &str) -> SchedResult<()> {
    if Path::new(destination).is_absolute() {
        return Err(SchedError::Validation(format!(
            "{list} destination '{destination}' is absolute, it must be relative to the working directory"
        )));
    }
    Ok(())
}

/// Join non-empty text blocks with a blank line.
fn join_text<'s>(segments: impl IntoIterator<Item = &'s str>) -> String {
    segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Replace `{name}` placeholders with values from `values`.
fn substitute(template: &str, values: &Map<String, Value>) -> SchedResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(SchedError::Configuration(format!(
                "unterminated placeholder in MPI command argument '{template}'"
            )));
        };
        let key = &after[..end];
        match values.get(key) {
            Some(Value::String(s)) => out.push_str(s),
            Some(other) => out.push_str(&other.to_string()),
            None => {
                return Err(SchedError::Configuration(format!(
                    "MPI command argument '{template}' uses unknown placeholder '{key}'"
                )));
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_text_skips_empty_segments() {
        assert_eq!(join_text(["", "module load qe", "", "export X=1"]), "module load qe\n\nexport X=1");
        assert_eq!(join_text(["", ""]), "");
    }

    #[test]
    fn test_substitute_placeholders() {
        let Value::Object(values) = json!({"tot_num_mpiprocs": 8, "queue": "debug"}) else {
            unreachable!()
        };
        assert_eq!(substitute("{tot_num_mpiprocs}", &values).unwrap(), "8");
        assert_eq!(substitute("--partition={queue}", &values).unwrap(), "--partition=debug");
        assert_eq!(substitute("mpirun", &values).unwrap(), "mpirun");

        let err = substitute("{num_gpus}", &values).unwrap_err();
        assert!(matches!(err, SchedError::Configuration(msg) if msg.contains("num_gpus")));
        assert!(substitute("{oops", &values).is_err());
    }

    #[test]
    fn test_check_relative() {
        assert!(check_relative("remote_copy_list", "pseudo/Si.upf").is_ok());
        let err = check_relative("remote_copy_list", "/scratch/Si.upf").unwrap_err();
        assert!(matches!(err, SchedError::Validation(_)));
    }
}
