use axum::extract::State;
use axum::Json;

use crate::response::StatusResponse;
use crate::state::AppState;

/// GET /status
///
/// Reports the job phase. A successful job also triggers the viewer
/// launcher before the response is sent; launcher failures are logged and
/// never change the reported status.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.slot.snapshot();
    state.viewer.on_status(&snapshot).await;

    Json(StatusResponse {
        status: snapshot.phase.status_label(),
    })
}
