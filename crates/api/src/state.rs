use std::path::Path;
use std::sync::Arc;

use splatscan_cluster::RemoteBackend;
use splatscan_core::backend::ExecutionBackend;
use splatscan_core::job::JobSlot;
use splatscan_core::local::LocalBackend;
use splatscan_core::orchestrator::Orchestrator;
use splatscan_core::staging::StagingDirs;
use splatscan_core::viewer::{DevServerViewer, LogViewer, ViewerLauncher, ViewerNotifier};
use tokio_util::sync::CancellationToken;

use crate::config::{BackendConfig, ServerConfig, ViewerKind};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// The single job slot. Admission and completion go through it.
    pub slot: JobSlot,
    /// Runs admitted jobs against the configured backend.
    pub orchestrator: Arc<Orchestrator>,
    /// Launches the viewer when the status surface observes a success.
    pub viewer: Arc<ViewerNotifier>,
}

impl AppState {
    /// Wire the state around an already constructed backend and launcher.
    ///
    /// Cancelling `shutdown` aborts a running job.
    pub fn new(
        config: ServerConfig,
        backend: Arc<dyn ExecutionBackend>,
        launcher: Arc<dyn ViewerLauncher>,
        shutdown: CancellationToken,
    ) -> Self {
        let orchestrator = Orchestrator::new(backend, config.staging())
            .with_poll_interval(config.poll_interval)
            .with_wait_limit(config.job_timeout)
            .with_cancellation(shutdown);
        let viewer = ViewerNotifier::new(launcher, config.viewer.trigger);

        Self {
            config: Arc::new(config),
            slot: JobSlot::new(),
            orchestrator: Arc::new(orchestrator),
            viewer: Arc::new(viewer),
        }
    }

    pub fn staging(&self) -> &StagingDirs {
        self.orchestrator.staging()
    }
}

/// Instantiate the backend selected by configuration.
pub fn build_backend(config: &BackendConfig) -> Arc<dyn ExecutionBackend> {
    match config {
        BackendConfig::Local(local) => Arc::new(LocalBackend::new(local.clone())),
        BackendConfig::Remote(remote) => Arc::new(RemoteBackend::new(remote.clone())),
    }
}

/// Instantiate the viewer launcher selected by configuration.
pub fn build_viewer(kind: &ViewerKind, download_dir: &Path) -> Arc<dyn ViewerLauncher> {
    match kind {
        ViewerKind::Log => Arc::new(LogViewer::new(download_dir)),
        ViewerKind::DevServer {
            dir,
            model_dir,
            command,
            url,
            ready_timeout,
        } => Arc::new(
            DevServerViewer::new(dir, command.clone(), url)
                .with_model_dir(model_dir)
                .with_ready_timeout(*ready_timeout),
        ),
    }
}
