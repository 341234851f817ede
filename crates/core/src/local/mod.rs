//! Local subprocess backend.
//!
//! Runs the reconstruction pipeline on this machine. Upload copies the
//! staged input into the pipeline workspace, submit runs the job script to
//! completion (so polling reports `Finished` straight away), and fetch copies
//! the well-known result file back into the download directory.

pub mod runner;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::backend::{BackendError, BackendKind, BackendRun, ExecutionBackend, JobHandle, Liveness};
use crate::params::JobParams;
use crate::staging::{clear_directory, first_file};

/// Handle reported for local runs; there is no scheduler id.
const LOCAL_HANDLE: &str = "local";

/// Layout of the local pipeline workspace.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// Pipeline workspace root, e.g. `../splat_workspace`.
    pub workspace: PathBuf,
    /// Job script, relative to the workspace.
    pub script: PathBuf,
    /// Interpreter used to run the script.
    pub interpreter: String,
    /// Directory the gateway stages uploads into.
    pub upload_dir: PathBuf,
    /// Name of the result file the pipeline writes.
    pub result_file_name: String,
}

impl LocalConfig {
    pub fn new(
        workspace: impl Into<PathBuf>,
        upload_dir: impl Into<PathBuf>,
        result_file_name: impl Into<String>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            script: PathBuf::from("local_job.sh"),
            interpreter: "bash".to_string(),
            upload_dir: upload_dir.into(),
            result_file_name: result_file_name.into(),
        }
    }

    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = script.into();
        self
    }

    /// Where the pipeline expects its input video.
    pub fn input_dir(&self) -> PathBuf {
        self.workspace.join("input_data")
    }

    /// Where the pipeline leaves its result.
    pub fn result_path(&self) -> PathBuf {
        self.workspace.join("result_data").join(&self.result_file_name)
    }

    pub fn script_path(&self) -> PathBuf {
        self.workspace.join(&self.script)
    }
}

/// [`ExecutionBackend`] that runs the pipeline as a local subprocess.
pub struct LocalBackend {
    config: LocalConfig,
}

impl LocalBackend {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn connect(&self) -> Result<Box<dyn BackendRun>, BackendError> {
        Ok(Box::new(LocalRun {
            config: self.config.clone(),
        }))
    }
}

struct LocalRun {
    config: LocalConfig,
}

#[async_trait]
impl BackendRun for LocalRun {
    /// Copy the first file of the upload directory into the workspace.
    ///
    /// The upload directory holds exactly one file after admission; the
    /// lexicographic pick only matters if an operator left extra files.
    async fn upload(&mut self, _input: &Path) -> Result<(), BackendError> {
        let source = first_file(&self.config.upload_dir)
            .await
            .map_err(|e| BackendError::Transfer(format!("cannot read upload directory: {e}")))?
            .ok_or_else(|| BackendError::Transfer("No files found in upload directory".into()))?;

        let input_dir = self.config.input_dir();
        tokio::fs::create_dir_all(&input_dir).await?;
        clear_directory(&input_dir).await;

        let file_name = source
            .file_name()
            .ok_or_else(|| BackendError::Transfer(format!("invalid input {}", source.display())))?;
        let dest = input_dir.join(file_name);
        tokio::fs::copy(&source, &dest)
            .await
            .map_err(|e| BackendError::Transfer(format!("copy to {}: {e}", dest.display())))?;

        tracing::info!(
            source = %source.display(),
            dest = %dest.display(),
            "Input copied into local workspace",
        );

        // A result left by an earlier job must not pass for this one's.
        let stale = self.config.result_path();
        match tokio::fs::remove_file(&stale).await {
            Ok(()) => tracing::debug!(path = %stale.display(), "Removed previous result"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(BackendError::Transfer(format!(
                    "cannot remove previous result {}: {e}",
                    stale.display()
                )))
            }
        }
        Ok(())
    }

    /// Run the job script to completion.
    ///
    /// A non-zero exit is only logged: whether the job succeeded is decided
    /// by the presence of the result file at fetch time.
    async fn submit(&mut self, params: &JobParams) -> Result<JobHandle, BackendError> {
        let script = self.config.script_path();
        let args = params.positional_args();
        tracing::info!(
            script = %script.display(),
            args = %args.join(" "),
            "Starting local job script",
        );

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&script).args(&args);

        let status = runner::run_streaming(&mut cmd).await.map_err(|e| {
            BackendError::Submission(format!("failed to run {}: {e}", script.display()))
        })?;

        if status.success() {
            tracing::info!("Local job script finished");
        } else {
            tracing::warn!(
                exit_code = status.code().unwrap_or(-1),
                "Local job script exited with error",
            );
        }
        Ok(JobHandle::new(LOCAL_HANDLE))
    }

    /// The script has already exited by the time submit returns.
    async fn poll(&mut self, _handle: &JobHandle) -> Result<Liveness, BackendError> {
        Ok(Liveness::Finished)
    }

    async fn fetch(&mut self, _handle: &JobHandle, dest: &Path) -> Result<(), BackendError> {
        let source = self.config.result_path();
        match tokio::fs::copy(&source, dest).await {
            Ok(bytes) => {
                tracing::info!(
                    source = %source.display(),
                    dest = %dest.display(),
                    bytes,
                    "Result copied to download directory",
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                BackendError::ResultMissing(format!("{} does not exist", source.display())),
            ),
            Err(e) => Err(BackendError::Transfer(format!(
                "copy {}: {e}",
                source.display()
            ))),
        }
    }

    async fn close(self: Box<Self>) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
