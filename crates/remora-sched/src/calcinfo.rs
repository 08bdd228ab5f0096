//! Submission manifest produced by a calculation plugin.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A path to fetch back from the remote working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetrieveEntry {
    /// Path relative to the remote working directory, kept as is.
    Path(String),
    /// `(remote glob, local folder, depth)`: keep the last `depth` components
    /// of every match under `local`.
    Nested(String, String, u32),
}

impl RetrieveEntry {
    pub fn path(path: impl Into<String>) -> Self {
        RetrieveEntry::Path(path.into())
    }

    pub fn nested(remote: impl Into<String>, local: impl Into<String>, depth: u32) -> Self {
        RetrieveEntry::Nested(remote.into(), local.into(), depth)
    }

    pub fn remote_path(&self) -> &str {
        match self {
            RetrieveEntry::Path(path) | RetrieveEntry::Nested(path, _, _) => path,
        }
    }
}

impl From<&str> for RetrieveEntry {
    fn from(path: &str) -> Self {
        RetrieveEntry::Path(path.to_string())
    }
}

/// A remote file stored as a single-file record after retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinglefileEntry {
    pub link_name: String,
    /// Kind of single-file record to create.
    pub file_kind: String,
    pub file_name: String,
}

impl SinglefileEntry {
    pub fn new(
        link_name: impl Into<String>,
        file_kind: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            link_name: link_name.into(),
            file_kind: file_kind.into(),
            file_name: file_name.into(),
        }
    }
}

/// How several codes of one job are launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeRunMode {
    Serial,
    Parallel,
}

impl fmt::Display for CodeRunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeRunMode::Serial => f.write_str("serial"),
            CodeRunMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// Invocation of one code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeInfo {
    pub code_uuid: Option<Uuid>,
    /// Arguments after the executable. After packaging this holds the full
    /// argv including the MPI launcher and the executable.
    #[serde(default)]
    pub cmdline_params: Vec<String>,
    pub stdin_name: Option<String>,
    pub stdout_name: Option<String>,
    pub stderr_name: Option<String>,
    #[serde(default)]
    pub join_files: bool,
    /// `None` defers to the job's `withmpi` option; only allowed for
    /// single-code jobs.
    pub withmpi: Option<bool>,
}

impl CodeInfo {
    pub fn new(code_uuid: Uuid) -> Self {
        Self {
            code_uuid: Some(code_uuid),
            ..Default::default()
        }
    }

    pub fn with_cmdline_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmdline_params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stdin(mut self, name: impl Into<String>) -> Self {
        self.stdin_name = Some(name.into());
        self
    }

    pub fn with_stdout(mut self, name: impl Into<String>) -> Self {
        self.stdout_name = Some(name.into());
        self
    }

    pub fn with_withmpi(mut self, withmpi: bool) -> Self {
        self.withmpi = Some(withmpi);
        self
    }
}

/// Everything a plugin decides about one submission.
///
/// Copy lists are kept as raw string rows exactly as the plugin produced
/// them; the submission builder checks their shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalcInfo {
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub codes_info: Vec<CodeInfo>,
    pub codes_run_mode: Option<CodeRunMode>,
    /// `[local absolute source, relative destination]` rows.
    #[serde(default)]
    pub local_copy_list: Vec<Vec<String>>,
    /// `[computer uuid, absolute remote source, relative destination]` rows.
    #[serde(default)]
    pub remote_copy_list: Vec<Vec<String>>,
    /// Same shape as `remote_copy_list`, linked instead of copied.
    #[serde(default)]
    pub remote_symlink_list: Vec<Vec<String>>,
    #[serde(default)]
    pub retrieve_list: Vec<RetrieveEntry>,
    #[serde(default)]
    pub retrieve_temporary_list: Vec<RetrieveEntry>,
    #[serde(default)]
    pub retrieve_singlefile_list: Vec<SinglefileEntry>,
    pub prepend_text: Option<String>,
    pub append_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retrieve_entry_wire_shape() {
        let entries = vec![
            RetrieveEntry::path("aiida.out"),
            RetrieveEntry::nested("out/*.xml", "xml", 1),
        ];
        assert_eq!(
            serde_json::to_value(&entries).unwrap(),
            json!(["aiida.out", ["out/*.xml", "xml", 1]])
        );

        let parsed: Vec<RetrieveEntry> =
            serde_json::from_value(json!(["a", ["b", "c", 2]])).unwrap();
        assert_eq!(parsed[1].remote_path(), "b");
    }

    #[test]
    fn test_calcinfo_defaults_from_sparse_json() {
        let info: CalcInfo = serde_json::from_value(json!({
            "uuid": null,
            "codes_info": [{"code_uuid": "67e55044-10b1-426f-9247-bb680e5fe0c8"}],
            "codes_run_mode": "parallel"
        }))
        .unwrap();

        assert_eq!(info.codes_run_mode, Some(CodeRunMode::Parallel));
        assert_eq!(info.codes_info[0].withmpi, None);
        assert!(info.local_copy_list.is_empty());
    }
}
