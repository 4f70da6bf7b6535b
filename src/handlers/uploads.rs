use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ImageDataRequest, require_image_data};
use crate::core::capture::CapturedImage;
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    #[serde(default)]
    pub filename: Option<String>,
}

/// Persist a data URL image and return where it can be fetched.
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ImageDataRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let image_data = require_image_data(payload)?;

    let image = CapturedImage::from_data_url(&image_data)
        .filter(|image| image.content_type.starts_with("image/") && !image.is_empty())
        .ok_or_else(|| {
            warn!("Rejected upload with undecodable image data");
            AppError::BadRequest("Invalid image data".to_string())
        })?;

    let filename = state.uploads.save(&image.bytes, image.extension()).await?;
    info!("Stored upload {} ({} bytes)", filename, image.bytes.len());

    Ok(Json(json!({
        "filename": filename,
        "url": format!("/uploads/{filename}"),
    })))
}

/// Delete a previously uploaded image.
pub async fn cleanup_upload(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CleanupRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let filename = payload
        .ok()
        .and_then(|Json(body)| body.filename)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::BadRequest("Filename is required".to_string()))?;

    state.uploads.remove(&filename).await.map_err(|e| {
        warn!("Cleanup of {} failed: {}", filename, e);
        AppError::from(e)
    })?;
    info!("Cleaned up upload {}", filename);

    Ok(Json(json!({"deleted": filename})))
}

/// List stored uploads. Only routed in development.
pub async fn list_uploads(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let files = state.uploads.list().await?;
    Ok(Json(json!({"files": files})))
}
