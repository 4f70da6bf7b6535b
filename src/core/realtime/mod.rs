//! Realtime voice session plumbing.
//!
//! The realtime session is a long-lived exchange with the voice model. This
//! module covers the parts the client needs around it:
//!
//! - [`events`] - inbound server events and the `take_photo` classifier
//! - [`messages`] - outbound client events (function results, assistant
//!   messages, `response.create`)
//! - [`channel`] - a WebSocket [`DataChannel`] into the session
//!
//! # Example
//!
//! ```rust,ignore
//! use vision_gateway::core::realtime::{WsDataChannel, classify};
//!
//! let (channel, mut events) = WsDataChannel::connect(&url, &client_secret).await?;
//! while let Some(event) = events.recv().await {
//!     if classify(&event).is_take_photo() {
//!         // open the camera
//!     }
//! }
//! ```

mod base;
pub mod channel;
pub mod events;
pub mod messages;

pub use base::{
    ConnectionState, DataChannel, RealtimeError, RealtimeResult, TAKE_PHOTO_TOOL, ToolDefinition,
};
pub use channel::{OPENAI_REALTIME_URL, WsDataChannel};
pub use events::{RealtimeEvent, ToolInvocation, classify, classify_json, classify_latest};
pub use messages::{ClientEvent, ConversationItem};
