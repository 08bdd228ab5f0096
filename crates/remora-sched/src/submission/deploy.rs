//! Writing submission artifacts to disk.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::fs;
use tracing::info;

use super::{
    CALCINFO_FILE, CalculationPlugin, JOB_TEMPLATE_FILE, MANIFEST_FOLDER, REMOTE_COPY_LIST_FILE,
    REMOTE_SYMLINK_LIST_FILE, RemoteCopy, SubmissionBuilder, SubmissionPackage,
};
use crate::computer::Computer;
use crate::error::SchedResult;
use crate::job::Job;

/// Result of a dry-run submission.
#[derive(Debug, Clone)]
pub struct DryRun {
    /// Folder the package was written to.
    pub folder: PathBuf,
    pub package: SubmissionPackage,
}

impl SubmissionPackage {
    /// Write the script and the manifest into `folder`.
    pub async fn write_to(&self, folder: &Path) -> SchedResult<()> {
        fs::write(folder.join(&self.script_filename), &self.script).await?;

        let manifest = folder.join(MANIFEST_FOLDER);
        fs::create_dir_all(&manifest).await?;
        fs::write(
            manifest.join(JOB_TEMPLATE_FILE),
            serde_json::to_string_pretty(&self.template)?,
        )
        .await?;
        fs::write(
            manifest.join(CALCINFO_FILE),
            serde_json::to_string_pretty(&self.calcinfo)?,
        )
        .await?;
        Ok(())
    }
}

impl SubmissionBuilder<'_> {
    /// Prepare `folder` for submission of `job`.
    ///
    /// Runs the plugin, builds the package, records the retrieve lists on the
    /// job and writes the artifacts. The job must still be NEW or TOSUBMIT.
    pub async fn presubmit(
        &self,
        job: &mut Job,
        computer: &Computer,
        plugin: &dyn CalculationPlugin,
        folder: &Path,
    ) -> SchedResult<SubmissionPackage> {
        let calcinfo = plugin.prepare_for_submission(folder, job).await?;
        let contents = folder_contents(folder).await?;
        let package = self.build(job, computer, calcinfo, &contents)?;

        job.set_retrieve_list(package.retrieve_list().to_vec())?;
        job.set_retrieve_temporary_list(package.retrieve_temporary_list().to_vec())?;
        job.set_retrieve_singlefile_list(package.retrieve_singlefile_list().to_vec())?;

        package.write_to(folder).await?;
        info!(
            job = %job.id(),
            folder = %folder.display(),
            computer = %computer.name,
            "Submission prepared"
        );
        Ok(package)
    }

    /// Build the submission of `job` in a fresh `<name>-<NNNNN>` subfolder of
    /// `base` without modifying the job.
    ///
    /// `subfolder_name` defaults to today's date as `yyyymmdd`. Local copies
    /// are performed; remote copies and symlinks are only described in text
    /// files next to the script.
    pub async fn submit_test(
        &self,
        job: &Job,
        computer: &Computer,
        plugin: &dyn CalculationPlugin,
        base: &Path,
        subfolder_name: Option<&str>,
    ) -> SchedResult<DryRun> {
        fs::create_dir_all(base).await?;
        let basename = subfolder_name
            .map_or_else(|| Local::now().format("%Y%m%d").to_string(), str::to_string);
        let folder = create_numbered_subfolder(base, &basename).await?;

        let mut scratch = job.clone();
        let package = self.presubmit(&mut scratch, computer, plugin, &folder).await?;

        for copy in &package.local_copies {
            let destination = folder.join(&copy.destination);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(&copy.source, &destination).await?;
        }

        if !package.remote_copies.is_empty() {
            let text = describe_remote(&package.remote_copies, "I WOULD REMOTELY COPY FILES/DIRS");
            fs::write(folder.join(REMOTE_COPY_LIST_FILE), text).await?;
        }
        if !package.remote_symlinks.is_empty() {
            let text = describe_remote(
                &package.remote_symlinks,
                "I WOULD PUT SYMBOLIC LINKS FOR FILES/DIRS",
            );
            fs::write(folder.join(REMOTE_SYMLINK_LIST_FILE), text).await?;
        }

        info!(job = %job.id(), folder = %folder.display(), "Test submission written");
        Ok(DryRun { folder, package })
    }
}

async fn folder_contents(folder: &Path) -> SchedResult<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(folder).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

async fn create_numbered_subfolder(base: &Path, basename: &str) -> SchedResult<PathBuf> {
    let mut counter = 0u32;
    loop {
        counter += 1;
        let path = base.join(format!("{basename}-{counter:05}"));
        match fs::create_dir(&path).await {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn describe_remote(entries: &[RemoteCopy], action: &str) -> String {
    let mut text = String::new();
    for entry in entries {
        let _ = writeln!(
            text,
            "* {action} FROM COMPUTER {} (UUID {}) FROM {} TO {}",
            entry.computer_name, entry.computer, entry.source, entry.destination
        );
    }
    text
}
