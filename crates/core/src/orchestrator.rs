//! Background job orchestrator.
//!
//! Drives one [`ExecutionBackend`] through upload, submit, poll and fetch for
//! the job admitted by the [`JobSlot`](crate::job::JobSlot). Runs on its own
//! Tokio task, never on a request path. Every failure is absorbed here and
//! turned into a single failed completion of the job lease.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, BackendRun, ExecutionBackend, Liveness};
use crate::job::{JobLease, JobOutcome};
use crate::params::JobParams;
use crate::staging::StagingDirs;

/// Default interval between liveness queries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct Orchestrator {
    backend: Arc<dyn ExecutionBackend>,
    staging: StagingDirs,
    poll_interval: Duration,
    /// Upper bound on the poll stage. `None` waits indefinitely.
    wait_limit: Option<Duration>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with the default poll interval, no wait limit
    /// and a cancellation token that is never triggered.
    pub fn new(backend: Arc<dyn ExecutionBackend>, staging: StagingDirs) -> Self {
        Self {
            backend,
            staging,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wait_limit: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_wait_limit(mut self, wait_limit: Option<Duration>) -> Self {
        self.wait_limit = wait_limit;
        self
    }

    /// Token that, once cancelled, aborts the running job as failed.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    pub fn staging(&self) -> &StagingDirs {
        &self.staging
    }

    /// Start [`run`](Self::run) on a new Tokio task and return immediately.
    pub fn spawn(self: &Arc<Self>, lease: JobLease, input: PathBuf, params: JobParams) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(lease, input, params).await })
    }

    /// Run the full stage sequence and complete the lease exactly once.
    pub async fn run(&self, lease: JobLease, input: PathBuf, params: JobParams) {
        let generation = lease.generation();
        let started = Instant::now();
        tracing::info!(
            generation,
            backend = %self.backend.kind(),
            input = %input.display(),
            ?params,
            "Job started",
        );

        let outcome = match self.execute(generation, &input, &params).await {
            Ok(result) => {
                tracing::info!(
                    generation,
                    result = %result.display(),
                    elapsed_secs = started.elapsed().as_secs(),
                    "Job succeeded",
                );
                JobOutcome::Succeeded(result)
            }
            Err(e) => {
                tracing::error!(
                    generation,
                    error = %e,
                    elapsed_secs = started.elapsed().as_secs(),
                    "Job failed",
                );
                JobOutcome::Failed
            }
        };

        lease.complete(outcome);
    }

    async fn execute(
        &self,
        generation: u64,
        input: &Path,
        params: &JobParams,
    ) -> Result<PathBuf, BackendError> {
        let mut run = self.backend.connect().await?;

        let result = tokio::select! {
            result = self.drive(generation, run.as_mut(), input, params) => result,
            () = self.cancel.cancelled() => Err(BackendError::Cancelled),
        };

        run.close().await;
        tracing::debug!(generation, "Backend run closed");
        result
    }

    async fn drive(
        &self,
        generation: u64,
        run: &mut dyn BackendRun,
        input: &Path,
        params: &JobParams,
    ) -> Result<PathBuf, BackendError> {
        // 1. Upload.
        run.upload(input).await?;
        tracing::info!(generation, "Input uploaded");

        // 2. Submit.
        let handle = run.submit(params).await?;
        tracing::info!(generation, handle = %handle, "Computation submitted");

        // 3. Poll until the backend reports the computation has ended.
        let waiting_since = Instant::now();
        loop {
            match run.poll(&handle).await? {
                Liveness::Finished => {
                    tracing::info!(generation, handle = %handle, "Computation finished");
                    break;
                }
                Liveness::Running => {
                    tracing::debug!(generation, handle = %handle, "Computation still running");
                }
            }

            if let Some(limit) = self.wait_limit {
                if waiting_since.elapsed() >= limit {
                    return Err(BackendError::TimedOut(limit));
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        // 4. Fetch.
        let dest = self.staging.result_path();
        run.fetch(&handle, &dest).await?;

        match tokio::fs::metadata(&dest).await {
            Ok(meta) if meta.is_file() => Ok(dest),
            _ => Err(BackendError::ResultMissing(format!(
                "{} was not produced",
                dest.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
