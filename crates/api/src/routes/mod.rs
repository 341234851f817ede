pub mod health;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the job route tree.
///
/// ```text
/// /upload                 POST  admit a job (multipart, body limit applies)
/// /status                 GET   job phase, triggers the viewer on success
/// /download/{name}        GET   fetch a result file
/// ```
pub fn job_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/upload",
            post(handlers::upload::upload_video).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/status", get(handlers::status::get_status))
        .route("/download/{name}", get(handlers::download::download_result))
}
