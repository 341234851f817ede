use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use splatscan_core::backend::BackendKind;
use splatscan_core::job::JobPhase;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Configured execution backend.
    pub backend: BackendKind,
    /// Current job phase.
    pub job: JobPhase,
}

/// GET /health -- returns service liveness, the backend kind and the job phase.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        backend: state.orchestrator.backend().kind(),
        job: state.slot.phase(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
