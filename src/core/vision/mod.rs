//! Image analysis under a time budget.
//!
//! [`analyze_with_timeout`] runs a [`VisionAnalyzer`] in its own task and races
//! it against the budget. When the budget elapses first the task is cancelled
//! and the caller gets [`VisionError::Timeout`]; a late result is never
//! reported.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::capture::CapturedImage;

/// Default analysis budget.
pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VisionError {
    #[error("Image analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("Image analysis failed: {0}")]
    RequestFailed(String),

    #[error("Invalid image: {0}")]
    InvalidInput(String),
}

pub type VisionResult<T> = Result<T, VisionError>;

/// Produces a textual description of an image.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, image: &CapturedImage) -> VisionResult<String>;
}

/// Analyze `image`, giving up after `budget`.
pub async fn analyze_with_timeout(
    analyzer: Arc<dyn VisionAnalyzer>,
    image: CapturedImage,
    budget: Duration,
) -> VisionResult<String> {
    if image.is_empty() {
        return Err(VisionError::InvalidInput("image is empty".to_string()));
    }

    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let mut task = tokio::spawn(async move {
        tokio::select! {
            _ = task_cancel.cancelled() => None,
            result = analyzer.analyze(&image) => Some(result),
        }
    });

    match tokio::time::timeout(budget, &mut task).await {
        Ok(Ok(Some(result))) => result,
        Ok(Ok(None)) => Err(VisionError::RequestFailed("analysis cancelled".to_string())),
        Ok(Err(e)) => Err(VisionError::RequestFailed(format!("analysis task failed: {e}"))),
        Err(_) => {
            cancel.cancel();
            task.abort();
            tracing::warn!("Image analysis exceeded {:?}, request cancelled", budget);
            Err(VisionError::Timeout(budget))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChoiceBody {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Extract the description from a chat-completion choice object.
pub fn description_from_choice(value: serde_json::Value) -> VisionResult<String> {
    let body: ChoiceBody = serde_json::from_value(value)
        .map_err(|e| VisionError::RequestFailed(format!("malformed response: {e}")))?;
    body.message
        .and_then(|m| m.content)
        .ok_or_else(|| VisionError::RequestFailed("response has no message content".to_string()))
}

/// Analyzer that calls the gateway's `POST /analyze-image` endpoint.
#[derive(Debug, Clone)]
pub struct HttpVisionClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpVisionClient {
    /// `server_url` is the gateway base URL, e.g. `http://localhost:3000`.
    pub fn new(http: reqwest::Client, server_url: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/analyze-image", server_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl VisionAnalyzer for HttpVisionClient {
    async fn analyze(&self, image: &CapturedImage) -> VisionResult<String> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "imageData": image.to_data_url() }))
            .send()
            .await
            .map_err(|e| VisionError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::RequestFailed(format!("HTTP {status}: {body}")));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VisionError::RequestFailed(format!("malformed response: {e}")))?;
        description_from_choice(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct SlowAnalyzer {
        delay: Duration,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl VisionAnalyzer for SlowAnalyzer {
        async fn analyze(&self, _image: &CapturedImage) -> VisionResult<String> {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok("A cup on a table.".to_string())
        }
    }

    fn image() -> CapturedImage {
        CapturedImage::new("image/jpeg", vec![0xFF, 0xD8, 0xFF])
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_within_budget() {
        let finished = Arc::new(AtomicBool::new(false));
        let analyzer = Arc::new(SlowAnalyzer {
            delay: Duration::from_secs(2),
            finished: finished.clone(),
        });
        let result = analyze_with_timeout(analyzer, image(), DEFAULT_ANALYSIS_TIMEOUT).await;
        assert_eq!(result.unwrap(), "A cup on a table.");
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_never_yields_late_success() {
        let finished = Arc::new(AtomicBool::new(false));
        let analyzer = Arc::new(SlowAnalyzer {
            delay: Duration::from_secs(11),
            finished: finished.clone(),
        });
        let result = analyze_with_timeout(analyzer, image(), DEFAULT_ANALYSIS_TIMEOUT).await;
        assert_eq!(result, Err(VisionError::Timeout(DEFAULT_ANALYSIS_TIMEOUT)));

        // The cancelled request never completes.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_image_is_invalid() {
        let analyzer = Arc::new(SlowAnalyzer {
            delay: Duration::ZERO,
            finished: Arc::new(AtomicBool::new(false)),
        });
        let result = analyze_with_timeout(
            analyzer,
            CapturedImage::new("image/jpeg", Vec::new()),
            DEFAULT_ANALYSIS_TIMEOUT,
        )
        .await;
        assert!(matches!(result, Err(VisionError::InvalidInput(_))));
    }

    #[test]
    fn test_timeout_message_mentions_timed_out() {
        let err = VisionError::Timeout(Duration::from_secs(10));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_description_from_choice() {
        let text = description_from_choice(json!({
            "index": 0,
            "message": {"role": "assistant", "content": "A cup on a table."},
            "finish_reason": "stop"
        }))
        .unwrap();
        assert_eq!(text, "A cup on a table.");

        assert!(description_from_choice(json!({"index": 0})).is_err());
        assert!(description_from_choice(json!("oops")).is_err());
    }

    #[tokio::test]
    async fn test_http_client_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze-image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "index": 0,
                "message": {"role": "assistant", "content": "A red mug."}
            })))
            .mount(&server)
            .await;

        let client = HttpVisionClient::new(reqwest::Client::new(), &server.uri());
        assert_eq!(client.analyze(&image()).await.unwrap(), "A red mug.");
    }

    #[tokio::test]
    async fn test_http_client_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze-image"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(json!({"error": "Vision analysis failed"})),
            )
            .mount(&server)
            .await;

        let client = HttpVisionClient::new(reqwest::Client::new(), &server.uri());
        match client.analyze(&image()).await {
            Err(VisionError::RequestFailed(msg)) => assert!(msg.contains("500")),
            other => panic!("Expected RequestFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_client_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze-image"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = HttpVisionClient::new(reqwest::Client::new(), &server.uri());
        assert!(matches!(
            client.analyze(&image()).await,
            Err(VisionError::RequestFailed(_))
        ));
    }
}
