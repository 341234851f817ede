//! Viewer launcher hooks invoked when a job has succeeded.
//!
//! The viewer itself is an external browser application. This module only
//! decides when to notify it ([`ViewerNotifier`]) and provides two
//! launchers: one that reports the staged result, and one that copies the
//! result into the viewer's model directory, starts the viewer's development
//! server and waits for it to come up.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::job::{JobPhase, JobSnapshot};

/// How long [`DevServerViewer`] waits for the viewer URL to answer.
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Interval between readiness checks.
const READY_PROBE_INTERVAL: Duration = Duration::from_secs(2);

/// Second name the viewer loads the model under.
pub const MODEL_ALIAS_NAME: &str = "IDF.ply";

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("failed to start viewer: {0}")]
    Spawn(std::io::Error),

    #[error("failed to inspect staged result: {0}")]
    Inspect(std::io::Error),

    #[error("failed to copy result into viewer model directory: {0}")]
    Stage(std::io::Error),

    #[error("viewer command is empty")]
    EmptyCommand,
}

/// Stages a successful result for an external viewer.
#[async_trait]
pub trait ViewerLauncher: Send + Sync {
    async fn launch(&self, result: &Path) -> Result<(), ViewerError>;
}

/// When the status surface should invoke the launcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerTrigger {
    /// Once per successful job.
    Once,
    /// On every status poll that observes a successful job.
    EveryPoll,
}

/// Invokes a [`ViewerLauncher`] from the status surface according to a
/// [`ViewerTrigger`]. Launch failures are logged, never surfaced.
pub struct ViewerNotifier {
    launcher: Arc<dyn ViewerLauncher>,
    trigger: ViewerTrigger,
    /// Generation of the last job the viewer was launched for.
    launched: Mutex<Option<u64>>,
}

impl ViewerNotifier {
    pub fn new(launcher: Arc<dyn ViewerLauncher>, trigger: ViewerTrigger) -> Self {
        Self {
            launcher,
            trigger,
            launched: Mutex::new(None),
        }
    }

    /// Launch the viewer if `snapshot` shows a success that still needs it.
    ///
    /// Returns whether the launcher was invoked.
    pub async fn on_status(&self, snapshot: &JobSnapshot) -> bool {
        let (JobPhase::Succeeded, Some(result)) = (snapshot.phase, snapshot.result.as_ref()) else {
            return false;
        };

        let mut launched = self.launched.lock().await;
        if self.trigger == ViewerTrigger::Once && *launched == Some(snapshot.generation) {
            return false;
        }

        if let Err(e) = self.launcher.launch(result).await {
            tracing::error!(generation = snapshot.generation, error = %e, "Viewer launch failed");
        }
        *launched = Some(snapshot.generation);
        true
    }
}

/// Reports the staged result file in the log.
///
/// Warns when the download directory does not hold exactly one file.
pub struct LogViewer {
    download_dir: PathBuf,
}

impl LogViewer {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
        }
    }
}

#[async_trait]
impl ViewerLauncher for LogViewer {
    async fn launch(&self, result: &Path) -> Result<(), ViewerError> {
        let mut entries = tokio::fs::read_dir(&self.download_dir)
            .await
            .map_err(ViewerError::Inspect)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(ViewerError::Inspect)? {
            if entry.file_type().await.map_err(ViewerError::Inspect)?.is_file() {
                files.push(entry.file_name());
            }
        }

        if files.len() == 1 {
            tracing::info!(
                file = %files[0].to_string_lossy(),
                result = %result.display(),
                "Result staged for viewer",
            );
        } else {
            tracing::warn!(
                count = files.len(),
                dir = %self.download_dir.display(),
                "Expected exactly one file in the download directory",
            );
        }
        Ok(())
    }
}

/// Copies each result into the viewer's model directory, starts the
/// viewer's development server on first use and waits in the background
/// until its URL answers.
pub struct DevServerViewer {
    dir: PathBuf,
    /// Where the viewer loads models from, `<dir>/dist/model` by default.
    model_dir: PathBuf,
    command: Vec<String>,
    url: String,
    ready_timeout: Duration,
    client: reqwest::Client,
    /// Running dev server. Kept so the process lives as long as we do.
    child: Mutex<Option<Child>>,
}

impl DevServerViewer {
    pub fn new(dir: impl Into<PathBuf>, command: Vec<String>, url: impl Into<String>) -> Self {
        let dir = dir.into();
        Self {
            model_dir: dir.join("dist").join("model"),
            dir,
            command,
            url: url.into(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            client: reqwest::Client::new(),
            child: Mutex::new(None),
        }
    }

    pub fn with_model_dir(mut self, model_dir: impl Into<PathBuf>) -> Self {
        self.model_dir = model_dir.into();
        self
    }

    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    /// Copy `result` into the model directory under its own name and under
    /// [`MODEL_ALIAS_NAME`]. The original stays in place for download.
    async fn stage_model(&self, result: &Path) -> Result<(), ViewerError> {
        let name = result.file_name().ok_or_else(|| {
            ViewerError::Stage(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no file name", result.display()),
            ))
        })?;
        tokio::fs::create_dir_all(&self.model_dir)
            .await
            .map_err(ViewerError::Stage)?;

        for target in [self.model_dir.join(name), self.model_dir.join(MODEL_ALIAS_NAME)] {
            tokio::fs::copy(result, &target)
                .await
                .map_err(ViewerError::Stage)?;
        }
        tracing::info!(
            result = %result.display(),
            model_dir = %self.model_dir.display(),
            "Result copied into viewer model directory",
        );
        Ok(())
    }

    fn spawn_server(&self) -> Result<Child, ViewerError> {
        let (program, args) = self.command.split_first().ok_or(ViewerError::EmptyCommand)?;
        Command::new(program)
            .args(args)
            .current_dir(&self.dir)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(ViewerError::Spawn)
    }
}

#[async_trait]
impl ViewerLauncher for DevServerViewer {
    async fn launch(&self, result: &Path) -> Result<(), ViewerError> {
        self.stage_model(result).await?;

        let mut child = self.child.lock().await;

        // Restart the server if it has exited since the last launch.
        let running = match child.as_mut() {
            Some(c) => matches!(c.try_wait(), Ok(None)),
            None => false,
        };
        if !running {
            let spawned = self.spawn_server()?;
            tracing::info!(
                dir = %self.dir.display(),
                command = %self.command.join(" "),
                pid = spawned.id(),
                "Viewer dev server started",
            );
            *child = Some(spawned);
        }
        drop(child);

        let client = self.client.clone();
        let url = self.url.clone();
        let timeout = self.ready_timeout;
        let result = result.to_path_buf();
        tokio::spawn(async move {
            if wait_for_server(&client, &url, timeout).await {
                tracing::info!(%url, result = %result.display(), "Viewer is reachable");
            } else {
                tracing::error!(%url, timeout_secs = timeout.as_secs(), "Viewer did not become reachable");
            }
        });
        Ok(())
    }
}

/// Poll `url` until it answers `200 OK` or `timeout` elapses.
async fn wait_for_server(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match client.get(url).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => return true,
            Ok(resp) => tracing::debug!(%url, status = %resp.status(), "Viewer not ready"),
            Err(e) => tracing::debug!(%url, error = %e, "Viewer not reachable yet"),
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(READY_PROBE_INTERVAL).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
