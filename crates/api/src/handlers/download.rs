use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use splatscan_core::error::CoreError;

use crate::error::AppResult;
use crate::state::AppState;

/// GET /download/{name}
///
/// Streams back a result file from the download directory as an
/// attachment. Names without the result extension are rejected with 400
/// before the filesystem is consulted; unknown names yield 404.
pub async fn download_result(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Response> {
    let path = state.staging().resolve_download(&name).await?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            CoreError::NotFound("Requested file not found. It may not be generated yet.".into())
        }
        _ => CoreError::from(e),
    })?;
    tracing::info!(file = %name, bytes = bytes.len(), "Serving result download");

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
