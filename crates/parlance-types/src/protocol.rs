//! Wire types for the inference backend.
//!
//! Two surfaces live here: the newline-delimited token stream protocol
//! (each event line is `data: ` followed by a JSON object with a `type`
//! discriminator) and the JSON bodies of the REST collaborator endpoints.
//!
//! Wire records carry plain integer ids; they convert into the domain
//! types in [`crate::chat`], which use the tagged [`MessageId`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::{ChatMessage, ChatSession, MessageId, MessageRole};

/// One event on the inference token stream.
///
/// Ordering on a healthy stream is `start`, then any number of `token`s,
/// then exactly one `done`. `error` may replace any suffix of that
/// sequence and is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// The request was accepted and the user message durably logged.
    Start {
        session_id: i64,
        user_message_id: i64,
    },
    /// One incremental fragment of assistant text.
    Token { content: String },
    /// Stream complete. `full_response` is the authoritative final text
    /// and supersedes whatever the client accumulated locally.
    Done {
        assistant_message_id: i64,
        full_response: String,
    },
    /// Stream failed; terminal.
    Error { message: String },
}

/// A stored message as the backend returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<MessageRecord> for ChatMessage {
    fn from(record: MessageRecord) -> Self {
        ChatMessage {
            id: MessageId::Confirmed(record.id),
            role: record.role,
            content: record.content,
            created_at: record.created_at,
        }
    }
}

/// Full session detail as returned by `GET /chat/sessions/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetail {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<MessageRecord>,
}

impl From<SessionDetail> for ChatSession {
    fn from(detail: SessionDetail) -> Self {
        ChatSession {
            id: detail.id,
            title: detail.title,
            created_at: detail.created_at,
            updated_at: detail.updated_at,
            messages: detail.messages.into_iter().map(ChatMessage::from).collect(),
        }
    }
}

/// Request body for both inference endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub prompt: String,
    /// Target session. When absent the backend creates a new session and
    /// reports its id in the `start` event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

impl InferenceRequest {
    /// A plain prompt against an existing session, default sampling.
    pub fn new(prompt: impl Into<String>, session_id: Option<i64>) -> Self {
        Self {
            prompt: prompt.into(),
            session_id,
            max_tokens: None,
            temperature: None,
            top_p: None,
        }
    }
}

/// Response of the synchronous (non-streaming) inference endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub response: String,
    pub session_id: i64,
    pub user_message: MessageRecord,
    pub assistant_message: MessageRecord,
}

/// Body for `POST /chat/sessions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionCreate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Partial update for `PATCH /chat/sessions/{id}`.
///
/// Every field is optional and independent; an absent field leaves the
/// corresponding session attribute untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    /// Replace the session title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Body for `POST /chat/inference/save-partial`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavePartialRequest {
    pub session_id: i64,
    pub user_message_id: i64,
    pub partial_response: String,
}

/// Response of the save-partial endpoint: the authoritative id assigned
/// to the truncated assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavePartialResponse {
    pub user_message_id: Option<i64>,
    pub assistant_message_id: i64,
    pub session_id: i64,
}

/// Generic acknowledgement body returned by delete endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
    pub success: bool,
}
