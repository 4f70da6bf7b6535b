//! Server-side copies of captured images.
//!
//! A captured image is persisted on the gateway while it is shown so it can be
//! referenced by URL. The copy is removed when the session ends or the image
//! is superseded.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::core::capture::CapturedImage;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("Artifact request failed: {0}")]
    RequestFailed(String),

    #[error("Artifact rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Where transient image artifacts live.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store an image and return its server-side filename.
    async fn persist(&self, image: &CapturedImage) -> ArtifactResult<String>;

    /// Delete a previously stored image.
    async fn remove(&self, filename: &str) -> ArtifactResult<()>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    filename: String,
}

/// Artifact store backed by the gateway's `/upload` and `/cleanup` endpoints.
#[derive(Debug, Clone)]
pub struct HttpArtifactStore {
    http: reqwest::Client,
    server_url: String,
}

impl HttpArtifactStore {
    pub fn new(http: reqwest::Client, server_url: &str) -> Self {
        Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, endpoint: &str, body: serde_json::Value) -> ArtifactResult<reqwest::Response> {
        let response = self
            .http
            .post(format!("{}/{}", self.server_url, endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| ArtifactError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ArtifactError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn persist(&self, image: &CapturedImage) -> ArtifactResult<String> {
        let response = self
            .post("upload", json!({ "imageData": image.to_data_url() }))
            .await?;
        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| ArtifactError::RequestFailed(format!("malformed response: {e}")))?;
        Ok(body.filename)
    }

    async fn remove(&self, filename: &str) -> ArtifactResult<()> {
        self.post("cleanup", json!({ "filename": filename })).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_persist_and_remove() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "filename": "abc.jpg",
                "url": "/uploads/abc.jpg"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cleanup"))
            .and(body_json(json!({"filename": "abc.jpg"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"deleted": "abc.jpg"})))
            .expect(1)
            .mount(&server)
            .await;

        let store = HttpArtifactStore::new(reqwest::Client::new(), &server.uri());
        let image = CapturedImage::new("image/jpeg", vec![0xFF, 0xD8]);
        let filename = store.persist(&image).await.unwrap();
        assert_eq!(filename, "abc.jpg");
        store.remove(&filename).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_missing_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cleanup"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "not found"})))
            .mount(&server)
            .await;

        let store = HttpArtifactStore::new(reqwest::Client::new(), &server.uri());
        match store.remove("gone.jpg").await {
            Err(ArtifactError::Rejected { status, .. }) => assert_eq!(status, 404),
            other => panic!("Expected Rejected, got {other:?}"),
        }
    }
}
