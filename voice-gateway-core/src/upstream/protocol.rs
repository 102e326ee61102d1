//! Wire protocol spoken with the upstream realtime model service.
//!
//! Audio payloads cross the wire base64-encoded; everywhere else in the
//! crate they are handled as raw bytes or already-encoded `String`s produced
//! by [`crate::audio`], so this module does not carry a custom audio codec —
//! only the envelope shapes themselves.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events the session sends to the upstream socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Replace or amend the session configuration.
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration payload.
        session: Value,
    },

    /// Append one base64 PCM16 chunk to the input audio buffer.
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend {
        /// Base64-encoded PCM16 bytes.
        audio: String,
    },

    /// Commit the current audio buffer as a user turn.
    #[serde(rename = "input_audio_buffer.commit")]
    AudioCommit,

    /// Discard the current (uncommitted) audio buffer.
    #[serde(rename = "input_audio_buffer.clear")]
    AudioClear,

    /// Append an item (user text, or a tool output) to the conversation.
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// The item to append.
        item: ConversationItem,
    },

    /// Ask the model to produce a response for the current conversation.
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response-level overrides, e.g. requested modalities.
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
}

/// A conversation item: either a user message or a tool-call output.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// A content part within a conversation item.
#[derive(Debug, Clone, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ConversationItem {
    /// A `user`/`input_text` message item.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart { content_type: "input_text".to_string(), text: Some(text.into()) }]),
            call_id: None,
            output: None,
        }
    }

    /// A `function_call_output` item answering a tool call.
    pub fn tool_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            role: None,
            content: None,
            call_id: Some(call_id.into()),
            output: Some(output.into()),
        }
    }
}

/// Events received from the upstream socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { session: Value },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: Value },

    #[serde(rename = "error")]
    Error { error: ErrorInfo },

    #[serde(rename = "response.text.delta")]
    TextDelta { output_index: u32, delta: String },

    #[serde(rename = "response.text.done")]
    TextDone { output_index: u32, text: String },

    #[serde(rename = "response.audio.delta")]
    AudioDelta { output_index: u32, delta: String },

    #[serde(rename = "response.audio.done")]
    AudioDone { output_index: u32 },

    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta { output_index: u32, delta: String },

    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone { output_index: u32, transcript: String },

    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallDelta { call_id: String, name: Option<String>, delta: String },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallDone { call_id: String, name: String, arguments: String },

    #[serde(rename = "response.done")]
    ResponseDone { response: Value },

    /// Forward compatibility: anything not matched above is ignored.
    #[serde(other)]
    Unknown,
}

/// Error payload carried by a `ServerEvent::Error`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// A typed, session-scoped event delivered to broker subscribers. Internal
/// `function_call.arguments.*` events are consumed by the tool executor and
/// never reach this level.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SessionCreated,
    SessionUpdated,
    TextDelta { output_index: u32, delta: String },
    TextDone { output_index: u32 },
    AudioDelta { output_index: u32, delta: String },
    AudioDone { output_index: u32 },
    TranscriptDelta { output_index: u32, delta: String },
    TranscriptDone { output_index: u32 },
    ResponseDone,
    Error { code: String, message: String },
    Closed { code: u16, reason: String },
}
