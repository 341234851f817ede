//! Remote execution backend for a SLURM-managed HPC cluster.
//!
//! One SSH session is opened per job and owned by that job's
//! [`BackendRun`]. The input video is copied over SFTP to a fixed path in
//! the remote workspace, the batch script is submitted with `sbatch`, the
//! job is polled with `squeue`, and the result file is fetched back over
//! SFTP. The session is disconnected when the run is closed.

pub mod scheduler;
pub mod session;
pub mod transfer;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use splatscan_core::backend::{
    BackendError, BackendKind, BackendRun, ExecutionBackend, JobHandle, Liveness,
};
use splatscan_core::params::JobParams;
use ssh2::Session;

use crate::session::blocking;
use crate::transfer::{Download, ProgressLog};

/// File name the batch script reads its input from.
pub const REMOTE_INPUT_NAME: &str = "Source_Video.mp4";

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Login for the cluster. Held in memory only.
#[derive(Clone)]
pub struct ClusterCredentials {
    pub username: String,
    password: String,
}

impl ClusterCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for ClusterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and how to reach the cluster.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub credentials: ClusterCredentials,
    /// Remote home directory containing `splat_workspace/`.
    pub cluster_path: String,
    pub result_file_name: String,
    /// Timeout for each blocking SSH call.
    pub timeout: Duration,
}

impl RemoteConfig {
    fn workspace_path(&self, relative: &str) -> String {
        format!(
            "{}/splat_workspace/{relative}",
            self.cluster_path.trim_end_matches('/')
        )
    }

    /// Remote path the input video is uploaded to.
    pub fn remote_input_path(&self) -> String {
        self.workspace_path(&format!("input_data/{REMOTE_INPUT_NAME}"))
    }

    /// Remote path the batch job leaves its result at.
    pub fn remote_result_path(&self) -> String {
        self.workspace_path(&format!("result_data/{}", self.result_file_name))
    }

    /// Batch script submitted with `sbatch`.
    pub fn job_script_path(&self) -> String {
        self.workspace_path("gpu_job.sbatch")
    }
}

/// [`ExecutionBackend`] that runs the pipeline on the cluster.
pub struct RemoteBackend {
    config: Arc<RemoteConfig>,
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl ExecutionBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn connect(&self) -> Result<Box<dyn BackendRun>, BackendError> {
        let config = Arc::clone(&self.config);
        let ssh = blocking(move || session::connect(&config)).await?;
        Ok(Box::new(RemoteRun {
            session: ssh,
            config: Arc::clone(&self.config),
        }))
    }
}

/// One job's SSH session and scheduler correlation.
struct RemoteRun {
    session: Session,
    config: Arc<RemoteConfig>,
}

#[async_trait]
impl BackendRun for RemoteRun {
    async fn upload(&mut self, input: &Path) -> Result<(), BackendError> {
        let ssh = self.session.clone();
        let local = input.to_path_buf();
        let remote = self.config.remote_input_path();
        tracing::info!(local = %local.display(), %remote, "Starting upload to cluster");

        let bytes = blocking(move || {
            let mut progress = ProgressLog::new();
            transfer::upload(&ssh, &local, &remote, |done, total| {
                progress.update(done, total);
            })
            .map_err(|e| BackendError::Transfer(format!("upload {} -> {remote}: {e}", local.display())))
        })
        .await?;

        tracing::info!(bytes, "Upload to cluster finished");
        Ok(())
    }

    async fn submit(&mut self, params: &JobParams) -> Result<JobHandle, BackendError> {
        let ssh = self.session.clone();
        let command = scheduler::submit_command(&self.config.job_script_path(), params);
        tracing::info!(%command, "Submitting batch job");

        let output = blocking(move || {
            session::exec(&ssh, &command)
                .map_err(|e| BackendError::Submission(format!("`{command}` failed: {e}")))
        })
        .await?;
        tracing::debug!(stdout = %output.stdout.trim(), "Job submission output");

        let handle = scheduler::interpret_submission(&output)?;
        tracing::info!(job_id = %handle, "Monitoring batch job");
        Ok(handle)
    }

    async fn poll(&mut self, handle: &JobHandle) -> Result<Liveness, BackendError> {
        let ssh = self.session.clone();
        let command = scheduler::queue_command(handle);

        let output = blocking(move || {
            session::exec(&ssh, &command)
                .map_err(|e| BackendError::Connect(format!("lost connection while polling: {e}")))
        })
        .await?;

        Ok(if scheduler::queue_lists_job(&output.stdout, handle) {
            Liveness::Running
        } else {
            Liveness::Finished
        })
    }

    async fn fetch(&mut self, _handle: &JobHandle, dest: &Path) -> Result<(), BackendError> {
        let ssh = self.session.clone();
        let remote = self.config.remote_result_path();
        let local: PathBuf = dest.to_path_buf();

        let result = blocking(move || {
            transfer::download(&ssh, &remote, &local).map_err(|e| {
                BackendError::Transfer(format!(
                    "download {remote} -> {}: {e}",
                    local.display()
                ))
            })
        })
        .await?;

        match result {
            Download::Copied(bytes) => {
                tracing::info!(dest = %dest.display(), bytes, "Downloaded result from cluster");
                Ok(())
            }
            Download::Missing => Err(BackendError::ResultMissing(format!(
                "{} does not exist on the cluster",
                self.config.remote_result_path()
            ))),
        }
    }

    async fn close(self: Box<Self>) {
        let ssh = self.session;
        if let Err(e) = blocking(move || {
            session::disconnect(&ssh);
            Ok(())
        })
        .await
        {
            tracing::warn!(error = %e, "SSH session close task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cluster_path: &str) -> RemoteConfig {
        RemoteConfig {
            host: "login.cluster.example".into(),
            port: DEFAULT_SSH_PORT,
            credentials: ClusterCredentials::new("alice", "s3cret"),
            cluster_path: cluster_path.into(),
            result_file_name: "splat.ply".into(),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn remote_paths_are_derived_from_cluster_path() {
        let config = config("/dss/home/alice/");
        assert_eq!(
            config.remote_input_path(),
            "/dss/home/alice/splat_workspace/input_data/Source_Video.mp4"
        );
        assert_eq!(
            config.remote_result_path(),
            "/dss/home/alice/splat_workspace/result_data/splat.ply"
        );
        assert_eq!(
            config.job_script_path(),
            "/dss/home/alice/splat_workspace/gpu_job.sbatch"
        );
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", config("/home/alice"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("s3cret"));
    }

    #[test]
    fn backend_reports_remote_kind() {
        let backend = RemoteBackend::new(config("/home/alice"));
        assert_eq!(backend.kind(), BackendKind::Remote);
    }
}
