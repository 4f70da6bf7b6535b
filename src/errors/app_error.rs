use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::core::openai::OpenAIError;
use crate::core::storage::StorageError;

/// Errors returned by HTTP handlers.
///
/// Every variant renders as a JSON body of the form `{"error": ...}`, with an
/// additional `details` field for upstream failures.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// The upstream provider failed. `error` is the public message.
    #[error("{error}")]
    Upstream {
        error: String,
        details: Option<String>,
    },

    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn upstream(error: impl Into<String>) -> Self {
        AppError::Upstream {
            error: error.into(),
            details: None,
        }
    }

    pub fn upstream_with_details(error: impl Into<String>, details: &OpenAIError) -> Self {
        let details = match details {
            OpenAIError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        };
        AppError::Upstream {
            error: error.into(),
            details: Some(details),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream { .. } | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidName(_) => AppError::BadRequest("Invalid filename".to_string()),
            StorageError::NotFound(_) => AppError::NotFound("File not found".to_string()),
            StorageError::Io(e) => AppError::Internal(format!("Storage error: {e}")),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::Upstream {
                error,
                details: Some(details),
            } => json!({"error": error, "details": details}),
            other => json!({"error": other.to_string()}),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_bad_request_body() {
        let response = AppError::BadRequest("Image data is required".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Image data is required"})
        );
    }

    #[tokio::test]
    async fn test_upstream_with_details() {
        let cause = OpenAIError::Api {
            status: 401,
            message: "Incorrect API key provided".to_string(),
        };
        let response =
            AppError::upstream_with_details("Vision analysis failed", &cause).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Vision analysis failed", "details": "Incorrect API key provided"})
        );
    }

    #[tokio::test]
    async fn test_upstream_without_details() {
        let response = AppError::upstream("Failed to generate session token").into_response();
        assert_eq!(
            body_json(response).await,
            json!({"error": "Failed to generate session token"})
        );
    }

    #[test]
    fn test_storage_error_mapping() {
        let err: AppError = StorageError::InvalidName("../etc".to_string()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: AppError = StorageError::NotFound("a.jpg".to_string()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
