use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use splatscan_core::job::{JobPhase, JobSlot};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use splatscan_api::config::ServerConfig;
use splatscan_api::router::build_app_router;
use splatscan_api::state::{self, AppState};

/// How long shutdown waits for a cancelled job to release its backend.
const JOB_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        backend = %config.backend.kind(),
        upload_dir = %config.upload_dir.display(),
        download_dir = %config.download_dir.display(),
        "Loaded server configuration",
    );

    // --- Backend and viewer ---
    let shutdown = CancellationToken::new();
    let backend = state::build_backend(&config.backend);
    let launcher = state::build_viewer(&config.viewer.kind, &config.download_dir);

    // --- App state ---
    let state = AppState::new(config.clone(), backend, launcher, shutdown.clone());
    state
        .staging()
        .ensure()
        .await
        .context("Failed to create staging directories")?;
    let slot = state.slot.clone();

    let app = build_app_router(state, &config);

    // --- Start server ---
    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cancelling running job");
    shutdown.cancel();
    drain_job(&slot).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "splatscan_api=debug,splatscan_core=debug,splatscan_cluster=debug,tower_http=debug".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait until a cancelled job has closed its backend run and left `Running`.
async fn drain_job(slot: &JobSlot) {
    let drained = tokio::time::timeout(JOB_DRAIN_TIMEOUT, async {
        while slot.phase() == JobPhase::Running {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;

    match drained {
        Ok(()) => tracing::info!(phase = ?slot.phase(), "Job slot released"),
        Err(_) => tracing::warn!(
            timeout_secs = JOB_DRAIN_TIMEOUT.as_secs(),
            "Job still running at shutdown",
        ),
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
