//! Base traits and types for the realtime session transport.
//!
//! This module defines the abstractions shared by everything that talks to the
//! realtime voice session: the error type, the connection state, the tool
//! definitions advertised to the model, and the [`DataChannel`] trait used to
//! deliver structured messages back into the session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::messages::ClientEvent;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while talking to the realtime session.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Tool Definitions
// =============================================================================

/// Name of the camera tool the model can invoke.
pub const TAKE_PHOTO_TOOL: &str = "take_photo";

/// Tool definition for function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDefinition {
    /// The `take_photo` tool advertised when a session token is issued.
    pub fn take_photo() -> Self {
        Self {
            tool_type: "function".to_string(),
            name: TAKE_PHOTO_TOOL.to_string(),
            description: Some(
                "Take a photo with the user's camera and describe what is in it. \
                 Call this whenever the user asks you to look at something."
                    .to_string(),
            ),
            parameters: Some(serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            })),
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
    /// Connection closed by either side
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

// =============================================================================
// Data Channel
// =============================================================================

/// Outbound path for structured messages into a realtime session.
///
/// Readiness is not guaranteed at call time: callers are expected to check
/// [`DataChannel::is_open`] and retry later when it reports `false`.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Whether the channel can accept messages right now.
    fn is_open(&self) -> bool;

    /// Send a single client event. Completes once the event is handed to the
    /// transport, so consecutive awaited sends keep their order.
    async fn send(&self, event: ClientEvent) -> RealtimeResult<()>;
}
