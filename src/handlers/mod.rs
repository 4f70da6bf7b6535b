//! HTTP request handlers
//!
//! - `api` - Health check endpoint
//! - `token` - Ephemeral realtime session tokens
//! - `vision` - Image description through the vision model
//! - `uploads` - Image artifact upload, cleanup and listing

use axum::{Json, extract::rejection::JsonRejection};
use serde::Deserialize;

use crate::errors::app_error::{AppError, AppResult};

pub mod api;
pub mod token;
pub mod uploads;
pub mod vision;

/// Body shared by the endpoints that accept an image.
#[derive(Debug, Default, Deserialize)]
pub struct ImageDataRequest {
    #[serde(rename = "imageData", default)]
    pub image_data: Option<String>,
}

/// Extract a non-empty `imageData` field. An unparseable body counts as missing.
pub(crate) fn require_image_data(
    payload: Result<Json<ImageDataRequest>, JsonRejection>,
) -> AppResult<String> {
    payload
        .ok()
        .and_then(|Json(body)| body.image_data)
        .filter(|data| !data.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("Image data is required".to_string()))
}
