//! Inbound realtime events and the tool-invocation classifier.
//!
//! The realtime transport reports a function call in one of three shapes:
//!
//! 1. `function_call` - the event itself is the call, name at `function.name`
//! 2. `response.output_item.added` - a single nested output item of type
//!    `function_call`, name at `item.name`
//! 3. `response.done` - an output collection containing at least one
//!    `function_call` element, name taken from the first such element
//!
//! Each shape has its own decoder. They are tried in that fixed order and the
//! first match wins. Only the newest event of a sequence is ever inspected.

use serde::Deserialize;

use super::base::TAKE_PHOTO_TOOL;

/// Item type marking a function call.
const FUNCTION_CALL: &str = "function_call";

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the realtime transport.
///
/// Event types the client does not act on deserialize to [`RealtimeEvent::Other`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    /// Direct function-call marker
    #[serde(rename = "function_call")]
    FunctionCall {
        /// Called function
        #[serde(default)]
        function: Option<FunctionRef>,
        /// Call ID
        #[serde(default)]
        call_id: Option<String>,
    },

    /// Output item added to a response
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        /// Added item
        #[serde(default, alias = "output")]
        item: Option<OutputItem>,
    },

    /// Response stream completed
    #[serde(rename = "response.done")]
    ResponseDone {
        /// Response information
        #[serde(default)]
        response: Option<ResponseOutput>,
        /// Output items reported at the top level
        #[serde(default)]
        output: Vec<OutputItem>,
    },

    /// Error reported by the provider
    #[serde(rename = "error")]
    Error {
        /// Error details
        #[serde(default)]
        error: Option<ApiError>,
    },

    /// Any other event type
    #[serde(other)]
    Other,
}

impl RealtimeEvent {
    /// Parse a raw JSON event.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Function reference inside a direct function-call event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionRef {
    /// Function name
    #[serde(default)]
    pub name: Option<String>,
}

/// An output item of a response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputItem {
    /// Item type (message, function_call)
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    /// Function name for function call items
    #[serde(default)]
    pub name: Option<String>,
    /// Call ID for function call items
    #[serde(default)]
    pub call_id: Option<String>,
}

impl OutputItem {
    fn is_function_call(&self) -> bool {
        self.item_type.as_deref() == Some(FUNCTION_CALL)
    }
}

/// Response body of a `response.done` event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseOutput {
    /// Output items
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

/// API error information.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Classification
// =============================================================================

/// Result of classifying one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Whether the event is a `take_photo` call in one of the function-call shapes
    pub detected: bool,
    /// Name of the invoked function, when present. Set for other tools too
    pub function_name: Option<String>,
    /// Call ID used to correlate the function result
    pub call_id: Option<String>,
}

impl ToolInvocation {
    /// Whether this is an invocation of the camera tool.
    pub fn is_take_photo(&self) -> bool {
        self.detected && self.function_name.as_deref() == Some(TAKE_PHOTO_TOOL)
    }
}

/// Borrowed view of a matched function call.
#[derive(Debug, Clone, Copy)]
struct FunctionCallRef<'a> {
    name: Option<&'a str>,
    call_id: Option<&'a str>,
}

type ShapeDecoder = for<'a> fn(&'a RealtimeEvent) -> Option<FunctionCallRef<'a>>;

/// Shape decoders in precedence order.
const SHAPE_DECODERS: [ShapeDecoder; 3] =
    [decode_direct_call, decode_output_item, decode_response_done];

fn decode_direct_call(event: &RealtimeEvent) -> Option<FunctionCallRef<'_>> {
    match event {
        RealtimeEvent::FunctionCall { function, call_id } => Some(FunctionCallRef {
            name: function.as_ref().and_then(|f| f.name.as_deref()),
            call_id: call_id.as_deref(),
        }),
        _ => None,
    }
}

fn decode_output_item(event: &RealtimeEvent) -> Option<FunctionCallRef<'_>> {
    match event {
        RealtimeEvent::OutputItemAdded { item: Some(item) } if item.is_function_call() => {
            Some(FunctionCallRef {
                name: item.name.as_deref(),
                call_id: item.call_id.as_deref(),
            })
        }
        _ => None,
    }
}

fn decode_response_done(event: &RealtimeEvent) -> Option<FunctionCallRef<'_>> {
    match event {
        RealtimeEvent::ResponseDone { response, output } => response
            .iter()
            .flat_map(|r| r.output.iter())
            .chain(output.iter())
            .find(|item| item.is_function_call())
            .map(|item| FunctionCallRef {
                name: item.name.as_deref(),
                call_id: item.call_id.as_deref(),
            }),
        _ => None,
    }
}

/// Classify a single event. A function call naming any other tool keeps its
/// name and call ID but is not detected.
pub fn classify(event: &RealtimeEvent) -> ToolInvocation {
    SHAPE_DECODERS
        .iter()
        .find_map(|decode| decode(event))
        .map(|call| ToolInvocation {
            detected: call.name == Some(TAKE_PHOTO_TOOL),
            function_name: call.name.map(str::to_string),
            call_id: call.call_id.map(str::to_string),
        })
        .unwrap_or_default()
}

/// Classify the newest event of an arrival-ordered sequence; older events are ignored.
pub fn classify_latest(events: &[RealtimeEvent]) -> ToolInvocation {
    events.last().map(classify).unwrap_or_default()
}

/// Classify a raw JSON event. Malformed input is never a tool invocation.
pub fn classify_json(text: &str) -> ToolInvocation {
    match RealtimeEvent::from_json(text) {
        Ok(event) => classify(&event),
        Err(e) => {
            tracing::debug!("Ignoring unparseable realtime event: {}", e);
            ToolInvocation::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
