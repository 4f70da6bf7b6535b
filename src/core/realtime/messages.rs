//! Outbound realtime client events.
//!
//! These are the JSON messages the client writes into the realtime session's
//! data channel. Only the subset needed to answer a tool call and make the
//! assistant speak is modelled:
//!
//! - conversation.item.create - Add a function result or a message
//! - response.create - Ask the model to respond (triggers speech synthesis)

use serde::{Deserialize, Serialize};

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type (message, function_call_output)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role (user, assistant, system)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function output for function call result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A `function_call_output` item answering the call identified by `call_id`.
    pub fn function_output(call_id: Option<&str>, output: String) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            role: None,
            content: None,
            call_id: call_id.map(str::to_string),
            output: Some(output),
        }
    }

    /// An assistant text message.
    pub fn assistant_text(text: &str) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("assistant".to_string()),
            content: Some(vec![ContentPart {
                content_type: "text".to_string(),
                text: Some(text.to_string()),
            }]),
            call_id: None,
            output: None,
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, text)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

// =============================================================================
// Response Configuration
// =============================================================================

/// Response configuration for `response.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Response modalities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    /// Per-response instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events written to the realtime data channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },
}

impl ClientEvent {
    /// Acknowledge a function call with its result.
    pub fn function_result(call_id: Option<&str>, output: String) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_output(call_id, output),
        }
    }

    /// Add an assistant text message to the conversation.
    pub fn assistant_message(text: &str) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::assistant_text(text),
        }
    }

    /// Ask the model to speak a response.
    pub fn speak() -> Self {
        ClientEvent::ResponseCreate {
            response: Some(ResponseConfig {
                modalities: Some(vec!["text".to_string(), "audio".to_string()]),
                instructions: None,
            }),
        }
    }

    /// The event's wire type, used in logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate { .. } => "response.create",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
