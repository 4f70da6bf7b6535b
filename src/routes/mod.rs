//! Route configuration

pub mod api;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tracing::info;

use crate::handlers::api::health_check;
use crate::state::AppState;

/// Assemble every route with state applied.
///
/// Stored uploads are served statically under `/uploads`. Cross-cutting layers
/// (CORS, rate limiting, security headers) are added by the binary.
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/", get(health_check))
        .merge(api::create_api_router());

    if state.config.is_development() {
        info!("Development environment: mounting /list-uploads");
        router = router.merge(api::create_dev_router());
    }

    router
        .nest_service("/uploads", ServeDir::new(state.uploads.root()))
        .with_state(state)
}
