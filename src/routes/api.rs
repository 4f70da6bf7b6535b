use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{token, uploads, vision};
use crate::state::AppState;
use std::sync::Arc;

/// Largest accepted request body. Images arrive base64 encoded inside JSON.
pub const MAX_IMAGE_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Create the API router for token minting, vision analysis and uploads.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/token", get(token::generate_token))
        .route("/analyze-image", post(vision::analyze_image))
        .route("/upload", post(uploads::upload_image))
        .route("/cleanup", post(uploads::cleanup_upload))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}

/// Routes that are only mounted in development.
pub fn create_dev_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/list-uploads", get(uploads::list_uploads))
        .layer(TraceLayer::new_for_http())
}
