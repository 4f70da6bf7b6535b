//! Upstream OpenAI REST client used by the gateway.
//!
//! Two calls are made on behalf of browser/headless clients so the API key
//! never leaves the server:
//!
//! - `POST /realtime/sessions` - mint an ephemeral realtime session token with
//!   the `take_photo` tool registered
//! - `POST /chat/completions` - describe an image with a vision model

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::core::realtime::ToolDefinition;

/// Default upstream REST base URL.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error)]
pub enum OpenAIError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Non-success status from the provider
    #[error("OpenAI API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type OpenAIResult<T> = Result<T, OpenAIError>;

/// Realtime session parameters used when minting tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSettings {
    pub model: String,
    pub voice: String,
    pub instructions: String,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-realtime-preview-2024-12-17".to_string(),
            voice: "verse".to_string(),
            instructions: "You are a helpful voice assistant. You can see through the user's \
                           camera: when the user asks you to look at something, call the \
                           take_photo function and then describe what you see."
                .to_string(),
        }
    }
}

/// Vision model parameters used for image analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionSettings {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
}

impl Default for VisionSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            prompt: "What's in this image? Describe it in one or two short sentences \
                     suitable for reading aloud."
                .to_string(),
            max_tokens: 300,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Client for the provider's REST API.
#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    api_key: Zeroizing<String>,
    base_url: String,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAIClient {
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> OpenAIResult<Self> {
        if api_key.is_empty() {
            return Err(OpenAIError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                OpenAIError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            api_key: Zeroizing::new(api_key.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Mint an ephemeral realtime session. The provider's response is returned
    /// unmodified; it carries the client secret at `client_secret.value`.
    pub async fn create_realtime_session(&self, settings: &RealtimeSettings) -> OpenAIResult<Value> {
        let body = json!({
            "model": settings.model,
            "voice": settings.voice,
            "instructions": settings.instructions,
            "modalities": ["audio", "text"],
            "tools": [ToolDefinition::take_photo()],
            "tool_choice": "auto",
        });
        self.post_json("realtime/sessions", &body).await
    }

    /// Describe an image given as a data URL. Returns the first choice object.
    pub async fn analyze_image(
        &self,
        settings: &VisionSettings,
        image_data_url: &str,
    ) -> OpenAIResult<Value> {
        let body = json!({
            "model": settings.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": settings.prompt},
                    {"type": "image_url", "image_url": {"url": image_data_url}}
                ]
            }],
            "max_tokens": settings.max_tokens,
        });

        let mut response = self.post_json("chat/completions", &body).await?;
        response
            .get_mut("choices")
            .and_then(|choices| choices.get_mut(0))
            .map(Value::take)
            .ok_or_else(|| OpenAIError::InvalidResponse("response has no choices".to_string()))
    }

    async fn post_json(&self, endpoint: &str, body: &Value) -> OpenAIResult<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.as_str())
            .json(body)
            .send()
            .await
            .map_err(|e| OpenAIError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or(text);
            tracing::error!("OpenAI {} returned {}: {}", endpoint, status, message);
            return Err(OpenAIError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| OpenAIError::InvalidResponse(e.to_string()))
    }
}
