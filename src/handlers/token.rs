use axum::{Json, extract::State};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// Mint an ephemeral realtime session for the client.
///
/// The provider response is passed through unmodified so the client can read
/// `client_secret.value` and the session model from it.
pub async fn generate_token(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    match state
        .openai
        .create_realtime_session(&state.config.realtime)
        .await
    {
        Ok(session) => {
            info!(
                "Realtime session created (model={})",
                state.config.realtime.model
            );
            Ok(Json(session))
        }
        Err(e) => {
            error!("Failed to generate session token: {}", e);
            Err(AppError::upstream("Failed to generate session token"))
        }
    }
}
