use axum::body::Bytes;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::Json;
use splatscan_core::error::CoreError;
use splatscan_core::params::{JobParams, RawJobParams};
use splatscan_core::staging::sanitize_file_name;

use crate::error::{AppError, AppResult};
use crate::response::MessageResponse;
use crate::state::AppState;

/// Multipart field carrying the source video.
const VIDEO_FIELD: &str = "video";

/// POST /upload
///
/// Accepts a multipart form with a required `video` file field and the
/// optional text fields `iterations`, `keep_pre`, `keep_post` and
/// `keep_train_images`. The request is fully validated before the job slot
/// is acquired, so a rejected request never touches the staging
/// directories. On admission the staging directories are cleared, the video
/// is stored in the upload directory and the orchestrator is started in the
/// background; the response does not wait for the job.
pub async fn upload_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<Json<MessageResponse>> {
    let mut video: Option<(String, Bytes)> = None;
    let mut raw = RawJobParams::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            VIDEO_FIELD => {
                let file_name = field.file_name().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                video = Some((file_name, data));
            }
            "iterations" => raw.iterations = Some(read_text(field).await?),
            "keep_pre" => raw.keep_pre = Some(read_text(field).await?),
            "keep_post" => raw.keep_post = Some(read_text(field).await?),
            "keep_train_images" => raw.keep_train_images = Some(read_text(field).await?),
            _ => {} // ignore unknown fields
        }
    }

    let (file_name, data) = video.ok_or_else(|| {
        CoreError::Validation("No video file part in the request.".into())
    })?;
    let file_name = sanitize_file_name(&file_name)
        .ok_or_else(|| CoreError::Validation("No selected file.".into()))?
        .to_string();
    let params = JobParams::from_raw(&raw)?;

    let lease = state.slot.try_acquire().ok_or(CoreError::Busy)?;
    let generation = lease.generation();

    // Dropping the lease on any error below records the job as failed.
    let staging = state.staging();
    staging.reset().await.map_err(CoreError::from)?;
    let input = staging.stage_upload(&file_name, &data).await?;
    lease.attach_input(input.clone());

    tracing::info!(
        generation,
        file = %file_name,
        bytes = data.len(),
        iterations = params.iterations,
        keep_pre = params.keep_pre,
        keep_post = params.keep_post,
        keep_train_images = params.keep_train_images,
        "Job admitted",
    );
    state.orchestrator.spawn(lease, input, params);

    Ok(Json(MessageResponse::new("Video uploaded and job started.")))
}

async fn read_text(field: Field<'_>) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))
}
