//! Chat session and message types for Parlance.
//!
//! These types model the client-side view of a conversation: the current
//! session transcript, the roster of session summaries, and the tagged
//! message identifier that distinguishes optimistic placeholders from
//! server-confirmed ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Role of a message within a session transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// Identity of a message in the client-side transcript.
///
/// Server-issued ids are positive integers and permanent once assigned.
/// Before the server confirms a message, the client displays it under a
/// `Pending` id whose payload is a store-local nonce -- the tag keeps the
/// two id spaces disjoint without relying on numeric sign or wall-clock
/// uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Client-issued placeholder, not yet acknowledged by the server.
    /// The nonce is meaningful only while the message is pending.
    Pending(i64),
    /// Authoritative server-issued id.
    Confirmed(i64),
}

impl MessageId {
    /// Whether this id is still a client-side placeholder.
    pub fn is_pending(&self) -> bool {
        matches!(self, MessageId::Pending(_))
    }

    /// The server id, if this message has been confirmed.
    pub fn confirmed(&self) -> Option<i64> {
        match self {
            MessageId::Confirmed(id) => Some(*id),
            MessageId::Pending(_) => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Pending(nonce) => write!(f, "pending:{nonce}"),
            MessageId::Confirmed(id) => write!(f, "{id}"),
        }
    }
}

/// A single message in the current session transcript.
///
/// Content is mutable only while the message is the active streaming
/// target; every other mutation goes through an id replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// The currently loaded chat session with its full ordered transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSession {
    /// Server-issued session id, authoritative once loaded.
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
}

/// Roster entry: a read-only projection of a session for the session list.
///
/// Not kept in sync incrementally -- the roster is refreshed wholesale
/// after any session-affecting mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_role_round_trip() {
        assert_eq!("user".parse::<MessageRole>().unwrap(), MessageRole::User);
        assert_eq!(
            "Assistant".parse::<MessageRole>().unwrap(),
            MessageRole::Assistant
        );
        assert!("system".parse::<MessageRole>().is_err());
        assert_eq!(MessageRole::User.to_string(), "user");
    }

    #[test]
    fn test_message_id_tagging() {
        let pending = MessageId::Pending(7);
        let confirmed = MessageId::Confirmed(7);

        assert!(pending.is_pending());
        assert!(!confirmed.is_pending());
        assert_eq!(pending.confirmed(), None);
        assert_eq!(confirmed.confirmed(), Some(7));
        // Same payload, different tags: never equal.
        assert_ne!(pending, confirmed);
    }

    #[test]
    fn test_message_id_display() {
        assert_eq!(MessageId::Pending(3).to_string(), "pending:3");
        assert_eq!(MessageId::Confirmed(42).to_string(), "42");
    }

    #[test]
    fn test_session_summary_deserializes_wire_shape() {
        let json = r#"{
            "id": 5,
            "title": "New Chat",
            "created_at": "2025-01-15T10:00:00Z",
            "updated_at": "2025-01-15T10:05:00Z",
            "message_count": 4
        }"#;
        let summary: SessionSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.id, 5);
        assert_eq!(summary.message_count, 4);
    }
}
