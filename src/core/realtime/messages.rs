//! Realtime WebSocket message types.
//!
//! Client events (sent to server):
//! - input_audio_buffer.append - Append one captured block
//! - conversation.item.create - Inject the current record as context
//!
//! Server events (received from server):
//! - session.created
//! - input_audio_buffer.speech_started / speech_stopped
//! - response.output_item.added
//! - response.audio.delta
//! - response.text.delta
//! - response.function_call_arguments.done
//! - response.done
//! - error
//!
//! Anything else decodes to [`ServerEvent::Unknown`].

use base64::prelude::*;
use serde::{Deserialize, Serialize};

// =============================================================================
// Tools
// =============================================================================

/// Tool definition sent at session creation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDef {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.into(),
            description: Some(description.into()),
            parameters: Some(parameters),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// A user message with a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart {
                content_type: "text".to_string(),
                text: text.into(),
            }],
        }
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent over the socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Append audio to input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded PCM16
        audio: String,
    },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
}

impl ClientEvent {
    /// Create an audio append event from raw bytes.
    pub fn audio_append(data: &[u8]) -> Self {
        ClientEvent::InputAudioBufferAppend {
            audio: BASE64_STANDARD.encode(data),
        }
    }

    /// Create a user text message event.
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        }
    }
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events consumed by the session manager.
///
/// Fields are lenient: anything not needed for dispatch defaults when
/// missing so that protocol additions do not break decoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ApiError,
    },

    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: serde_json::Value,
    },

    /// VAD detected the start of user speech
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default)]
        item: OutputItem,
    },

    /// Base64 PCM16 audio chunk
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        delta: String,
    },

    /// Complete arguments of a tool call. `name` is not always present;
    /// it can be recovered from the preceding `OutputItemAdded`.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        arguments: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: serde_json::Value,
    },

    /// Any event type not listed above
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Decode a text frame, returning the raw tag alongside the event.
    pub fn parse(text: &str) -> Result<(String, ServerEvent), serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let tag = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        let event = serde_json::from_value(value)?;
        Ok((tag, event))
    }
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

/// Output item announced before its content streams.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}
