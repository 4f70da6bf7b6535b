use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

use super::{ImageDataRequest, require_image_data};
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// Describe an image with the configured vision model.
///
/// Responds with the first completion choice; its `message.content` holds the
/// description.
pub async fn analyze_image(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ImageDataRequest>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let image_data = require_image_data(payload)?;
    debug!("Analyzing image ({} bytes of data URL)", image_data.len());

    state
        .openai
        .analyze_image(&state.config.vision, &image_data)
        .await
        .map(Json)
        .map_err(|e| {
            error!("Vision analysis failed: {}", e);
            AppError::upstream_with_details("Vision analysis failed", &e)
        })
}
