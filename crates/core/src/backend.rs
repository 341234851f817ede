//! Execution backend abstraction.
//!
//! An [`ExecutionBackend`] opens one [`BackendRun`] per job. The run owns
//! whatever per-job correlation state the backend needs (an SSH session and
//! scheduler job id for the cluster, nothing much for the local pipeline) and
//! is driven through the four stages upload, submit, poll and fetch by the
//! orchestrator, which closes it on every exit path.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::params::JobParams;

/// Errors raised inside a backend run.
///
/// All of these are fatal to the job and never reach an HTTP caller; the
/// orchestrator logs them and records the job as failed.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Connection or authentication failure, including a connection lost
    /// while polling.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Input or output file transfer failure.
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// The submission command failed or its output could not be parsed.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// The computation ended without producing a result artifact.
    #[error("Result missing: {0}")]
    ResultMissing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The process is shutting down.
    #[error("Job cancelled")]
    Cancelled,

    #[error("Job still running after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// Which backend variant is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => f.write_str("local"),
            BackendKind::Remote => f.write_str("remote"),
        }
    }
}

/// Backend-specific handle returned by submission and used for polling.
///
/// For the cluster this is the scheduler-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Answer to a liveness query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    Finished,
}

/// Factory for per-job backend runs. Selected once at startup.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Open the per-job run (for the cluster: connect and authenticate).
    async fn connect(&self) -> Result<Box<dyn BackendRun>, BackendError>;
}

/// One job's exclusive conversation with a backend.
#[async_trait]
pub trait BackendRun: Send {
    /// Hand the staged input artifact to the backend.
    async fn upload(&mut self, input: &Path) -> Result<(), BackendError>;

    /// Start the long-running computation.
    async fn submit(&mut self, params: &JobParams) -> Result<JobHandle, BackendError>;

    /// Query whether the computation is still running.
    async fn poll(&mut self, handle: &JobHandle) -> Result<Liveness, BackendError>;

    /// Retrieve the produced artifact to `dest`.
    async fn fetch(&mut self, handle: &JobHandle, dest: &Path) -> Result<(), BackendError>;

    /// Release per-job resources. Called exactly once, whatever happened
    /// before.
    async fn close(self: Box<Self>);
}
