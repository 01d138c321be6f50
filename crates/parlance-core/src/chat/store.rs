//! Session state store.
//!
//! Holds the current session transcript and the roster of session
//! summaries. Every mutation is a single atomic operation: callers go
//! through [`SharedSessionStore`], which takes one write-lock acquisition
//! per operation, so no observer ever sees a half-applied update.
//!
//! The store maintains the placeholder invariant itself: at most one
//! message carries a `Pending` id, and it is always the last element of
//! the transcript. Pending ids are replaced in place -- same index, no
//! reorder -- so position-keyed UI state (scroll, focus) survives
//! reconciliation.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use tracing::warn;

use parlance_types::chat::{ChatMessage, ChatSession, MessageId, MessageRole, SessionSummary};

/// In-memory state behind the shared handle. Plain data and transitions;
/// locking lives in [`SharedSessionStore`].
#[derive(Debug, Default)]
pub struct SessionStore {
    current: Option<ChatSession>,
    roster: Vec<SessionSummary>,
    next_pending: i64,
}

impl SessionStore {
    /// The currently loaded session, if any.
    pub fn current(&self) -> Option<&ChatSession> {
        self.current.as_ref()
    }

    /// The roster of session summaries.
    pub fn roster(&self) -> &[SessionSummary] {
        &self.roster
    }

    fn alloc_pending(&mut self) -> MessageId {
        self.next_pending += 1;
        MessageId::Pending(self.next_pending)
    }

    /// Drop a stale trailing placeholder so a new one can be appended.
    /// Reached only if a previous generation failed to reconcile.
    fn drop_stale_pending(&mut self) {
        let Some(session) = self.current.as_mut() else {
            return;
        };
        if let Some(last) = session.messages.last()
            && last.id.is_pending()
        {
            warn!(message_id = %last.id, "dropping unreconciled placeholder message");
            session.messages.pop();
        }
    }

    /// Append an optimistic user message and return its placeholder id.
    ///
    /// Returns `None` when no session is loaded; the transcript is then
    /// left to the next wholesale reload.
    pub fn append_optimistic_user(&mut self, content: &str) -> Option<MessageId> {
        self.drop_stale_pending();
        let id = self.alloc_pending();
        let session = self.current.as_mut()?;
        session.messages.push(ChatMessage {
            id,
            role: MessageRole::User,
            content: content.to_string(),
            created_at: Utc::now(),
        });
        Some(id)
    }

    /// Replace a message id in place. The message keeps its index,
    /// content, and siblings. Returns whether a message matched.
    pub fn replace_message_id(&mut self, old: MessageId, new: MessageId) -> bool {
        let Some(session) = self.current.as_mut() else {
            return false;
        };
        match session.messages.iter_mut().find(|m| m.id == old) {
            Some(message) => {
                message.id = new;
                true
            }
            None => false,
        }
    }

    /// Create-or-update the trailing assistant placeholder with the full
    /// accumulated text. Exactly one assistant message grows in place;
    /// tokens never append additional messages.
    pub fn upsert_streaming_assistant(&mut self, text: &str) -> Option<MessageId> {
        let session = self.current.as_mut()?;
        if let Some(last) = session.messages.last_mut()
            && last.role == MessageRole::Assistant
            && last.id.is_pending()
        {
            last.content = text.to_string();
            return Some(last.id);
        }
        self.drop_stale_pending();
        let id = self.alloc_pending();
        let session = self.current.as_mut()?;
        session.messages.push(ChatMessage {
            id,
            role: MessageRole::Assistant,
            content: text.to_string(),
            created_at: Utc::now(),
        });
        Some(id)
    }

    /// Confirm the trailing assistant placeholder with its server id and
    /// the authoritative final text.
    ///
    /// When no placeholder exists (a stream that finished without a
    /// single token) the confirmed message is appended instead, so the
    /// preceding message is never overwritten.
    pub fn finalize_assistant(&mut self, server_id: i64, final_text: &str) -> Option<MessageId> {
        let session = self.current.as_mut()?;
        let id = MessageId::Confirmed(server_id);
        if let Some(last) = session.messages.last_mut()
            && last.role == MessageRole::Assistant
            && last.id.is_pending()
        {
            last.id = id;
            last.content = final_text.to_string();
        } else {
            session.messages.push(ChatMessage {
                id,
                role: MessageRole::Assistant,
                content: final_text.to_string(),
                created_at: Utc::now(),
            });
        }
        Some(id)
    }

    /// Append an already-confirmed message (synchronous inference path).
    pub fn append_confirmed(&mut self, message: ChatMessage) {
        if message.id.is_pending() {
            warn!(message_id = %message.id, "refusing to append a pending message as confirmed");
            return;
        }
        if let Some(session) = self.current.as_mut() {
            session.messages.push(message);
        }
    }

    /// Drop the message with this id and everything after it. Used by the
    /// edit flow: downstream messages are no longer causally valid.
    pub fn truncate_from(&mut self, id: MessageId) -> bool {
        let Some(session) = self.current.as_mut() else {
            return false;
        };
        match session.messages.iter().position(|m| m.id == id) {
            Some(index) => {
                session.messages.truncate(index);
                true
            }
            None => false,
        }
    }

    /// Replace the current session wholesale.
    pub fn replace_all(&mut self, session: ChatSession) {
        self.current = Some(session);
    }

    /// Drop the current session if it matches the given id (after a
    /// delete). Returns whether anything was dropped.
    pub fn remove_current_if(&mut self, session_id: i64) -> bool {
        if self.current.as_ref().is_some_and(|s| s.id == session_id) {
            self.current = None;
            true
        } else {
            false
        }
    }

    /// Patch the current session's title in place if it matches.
    pub fn set_title(&mut self, session_id: i64, title: &str) {
        if let Some(session) = self.current.as_mut()
            && session.id == session_id
        {
            session.title = title.to_string();
        }
    }

    /// Replace the roster wholesale.
    pub fn set_roster(&mut self, roster: Vec<SessionSummary>) {
        self.roster = roster;
    }

    /// Reset the whole store: current session and roster. Idempotent.
    pub fn clear(&mut self) {
        self.current = None;
        self.roster.clear();
    }
}

/// Cloneable handle to the store shared between the generation
/// controller, the UI layer, and the edit flow.
///
/// Each method is one lock acquisition, making every operation a single
/// observable state transition.
#[derive(Debug, Clone, Default)]
pub struct SharedSessionStore(Arc<RwLock<SessionStore>>);

impl SharedSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, SessionStore> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, SessionStore> {
        self.0.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a read-only closure against the store.
    pub fn read<R>(&self, f: impl FnOnce(&SessionStore) -> R) -> R {
        f(&self.read_guard())
    }

    /// Clone of the current session, for rendering.
    pub fn snapshot_current(&self) -> Option<ChatSession> {
        self.read_guard().current().cloned()
    }

    /// Clone of the roster, for rendering.
    pub fn snapshot_roster(&self) -> Vec<SessionSummary> {
        self.read_guard().roster().to_vec()
    }

    /// Id of the currently loaded session.
    pub fn current_session_id(&self) -> Option<i64> {
        self.read_guard().current().map(|s| s.id)
    }

    /// Whether the current transcript contains the given message.
    pub fn contains_message(&self, id: MessageId) -> bool {
        self.read_guard()
            .current()
            .is_some_and(|s| s.messages.iter().any(|m| m.id == id))
    }

    pub fn append_optimistic_user(&self, content: &str) -> Option<MessageId> {
        self.write_guard().append_optimistic_user(content)
    }

    pub fn replace_message_id(&self, old: MessageId, new: MessageId) -> bool {
        self.write_guard().replace_message_id(old, new)
    }

    pub fn upsert_streaming_assistant(&self, text: &str) -> Option<MessageId> {
        self.write_guard().upsert_streaming_assistant(text)
    }

    pub fn finalize_assistant(&self, server_id: i64, final_text: &str) -> Option<MessageId> {
        self.write_guard().finalize_assistant(server_id, final_text)
    }

    pub fn append_confirmed(&self, message: ChatMessage) {
        self.write_guard().append_confirmed(message);
    }

    pub fn truncate_from(&self, id: MessageId) -> bool {
        self.write_guard().truncate_from(id)
    }

    pub fn replace_all(&self, session: ChatSession) {
        self.write_guard().replace_all(session);
    }

    pub fn remove_current_if(&self, session_id: i64) -> bool {
        self.write_guard().remove_current_if(session_id)
    }

    pub fn set_title(&self, session_id: i64, title: &str) {
        self.write_guard().set_title(session_id, title);
    }

    pub fn set_roster(&self, roster: Vec<SessionSummary>) {
        self.write_guard().set_roster(roster);
    }

    pub fn clear(&self) {
        self.write_guard().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn empty_session(id: i64) -> ChatSession {
        ChatSession {
            id,
            title: "New Chat".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    fn confirmed(id: i64, role: MessageRole, content: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId::Confirmed(id),
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    fn store_with_session(id: i64) -> SharedSessionStore {
        let store = SharedSessionStore::new();
        store.replace_all(empty_session(id));
        store
    }

    #[test]
    fn test_append_optimistic_user() {
        let store = store_with_session(1);
        let id = store.append_optimistic_user("hello").unwrap();

        assert!(id.is_pending());
        let session = store.snapshot_current().unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].id, id);
        assert_eq!(session.messages[0].role, MessageRole::User);
        assert_eq!(session.messages[0].content, "hello");
    }

    #[test]
    fn test_append_without_session_is_noop() {
        let store = SharedSessionStore::new();
        assert!(store.append_optimistic_user("hello").is_none());
        assert!(store.upsert_streaming_assistant("x").is_none());
        assert!(store.snapshot_current().is_none());
    }

    #[test]
    fn test_replace_message_id_is_positional() {
        let store = store_with_session(1);
        store.replace_all(ChatSession {
            messages: vec![
                confirmed(10, MessageRole::User, "a"),
                confirmed(11, MessageRole::Assistant, "b"),
            ],
            ..empty_session(1)
        });
        let placeholder = store.append_optimistic_user("c").unwrap();

        assert!(store.replace_message_id(placeholder, MessageId::Confirmed(12)));

        let session = store.snapshot_current().unwrap();
        // Same index, same content, siblings untouched.
        assert_eq!(session.messages.len(), 3);
        assert_eq!(session.messages[0].id, MessageId::Confirmed(10));
        assert_eq!(session.messages[1].id, MessageId::Confirmed(11));
        assert_eq!(session.messages[2].id, MessageId::Confirmed(12));
        assert_eq!(session.messages[2].content, "c");
    }

    #[test]
    fn test_replace_unknown_id_returns_false() {
        let store = store_with_session(1);
        assert!(!store.replace_message_id(MessageId::Pending(99), MessageId::Confirmed(1)));
    }

    #[test]
    fn test_upsert_grows_single_assistant_message() {
        let store = store_with_session(1);
        let user = store.append_optimistic_user("question").unwrap();
        store.replace_message_id(user, MessageId::Confirmed(42));

        let first = store.upsert_streaming_assistant("a").unwrap();
        let second = store.upsert_streaming_assistant("ab").unwrap();
        let third = store.upsert_streaming_assistant("abc").unwrap();

        assert_eq!(first, second);
        assert_eq!(second, third);
        let session = store.snapshot_current().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].content, "abc");
    }

    #[test]
    fn test_placeholder_uniqueness_after_tokens() {
        let store = store_with_session(1);
        let user = store.append_optimistic_user("question").unwrap();
        store.replace_message_id(user, MessageId::Confirmed(42));
        for text in ["a", "ab", "abc"] {
            store.upsert_streaming_assistant(text);
        }

        let session = store.snapshot_current().unwrap();
        let pending: Vec<_> = session
            .messages
            .iter()
            .filter(|m| m.id.is_pending())
            .collect();
        assert_eq!(pending.len(), 1);
        assert!(session.messages.last().unwrap().id.is_pending());
    }

    #[test]
    fn test_two_placeholders_never_coexist() {
        let store = store_with_session(1);
        // First placeholder never reconciled; a second append repairs.
        store.append_optimistic_user("first").unwrap();
        store.append_optimistic_user("second").unwrap();

        let session = store.snapshot_current().unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "second");
    }

    #[test]
    fn test_finalize_assistant_overrides_accumulated_text() {
        let store = store_with_session(1);
        let user = store.append_optimistic_user("q").unwrap();
        store.replace_message_id(user, MessageId::Confirmed(42));
        store.upsert_streaming_assistant("partial");

        let id = store.finalize_assistant(99, "final").unwrap();

        assert_eq!(id, MessageId::Confirmed(99));
        let session = store.snapshot_current().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].id, MessageId::Confirmed(99));
        assert_eq!(session.messages[1].content, "final");
    }

    #[test]
    fn test_finalize_without_placeholder_appends() {
        let store = store_with_session(1);
        let user = store.append_optimistic_user("q").unwrap();
        store.replace_message_id(user, MessageId::Confirmed(42));

        // Zero tokens arrived before done.
        store.finalize_assistant(99, "full answer");

        let session = store.snapshot_current().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].content, "q");
        assert_eq!(session.messages[1].id, MessageId::Confirmed(99));
        assert_eq!(session.messages[1].content, "full answer");
    }

    #[test]
    fn test_truncate_from_drops_message_and_suffix() {
        let store = store_with_session(1);
        store.replace_all(ChatSession {
            messages: vec![
                confirmed(10, MessageRole::User, "u1"),
                confirmed(11, MessageRole::Assistant, "a1"),
                confirmed(12, MessageRole::User, "u2"),
                confirmed(13, MessageRole::Assistant, "a2"),
            ],
            ..empty_session(1)
        });

        assert!(store.truncate_from(MessageId::Confirmed(10)));
        let session = store.snapshot_current().unwrap();
        assert!(session.messages.is_empty());
    }

    #[test]
    fn test_truncate_from_middle() {
        let store = store_with_session(1);
        store.replace_all(ChatSession {
            messages: vec![
                confirmed(10, MessageRole::User, "u1"),
                confirmed(11, MessageRole::Assistant, "a1"),
                confirmed(12, MessageRole::User, "u2"),
                confirmed(13, MessageRole::Assistant, "a2"),
            ],
            ..empty_session(1)
        });

        assert!(store.truncate_from(MessageId::Confirmed(12)));
        let session = store.snapshot_current().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].id, MessageId::Confirmed(11));
    }

    #[test]
    fn test_truncate_unknown_id_returns_false() {
        let store = store_with_session(1);
        assert!(!store.truncate_from(MessageId::Confirmed(77)));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = store_with_session(1);
        store.append_optimistic_user("hello");
        store.set_roster(vec![SessionSummary {
            id: 1,
            title: "t".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            message_count: 1,
        }]);

        store.clear();
        assert!(store.snapshot_current().is_none());
        assert!(store.snapshot_roster().is_empty());

        store.clear();
        assert!(store.snapshot_current().is_none());
        assert!(store.snapshot_roster().is_empty());
    }

    #[test]
    fn test_remove_current_if() {
        let store = store_with_session(5);
        assert!(!store.remove_current_if(6));
        assert!(store.snapshot_current().is_some());
        assert!(store.remove_current_if(5));
        assert!(store.snapshot_current().is_none());
        assert!(!store.remove_current_if(5));
    }

    #[test]
    fn test_set_title_patches_matching_session_only() {
        let store = store_with_session(5);
        store.set_title(6, "other");
        assert_eq!(store.snapshot_current().unwrap().title, "New Chat");
        store.set_title(5, "Renamed");
        assert_eq!(store.snapshot_current().unwrap().title, "Renamed");
    }

    #[test]
    fn test_append_confirmed_rejects_pending() {
        let store = store_with_session(1);
        store.append_confirmed(ChatMessage {
            id: MessageId::Pending(1),
            role: MessageRole::User,
            content: "x".to_string(),
            created_at: Utc::now(),
        });
        assert!(store.snapshot_current().unwrap().messages.is_empty());

        store.append_confirmed(confirmed(1, MessageRole::User, "x"));
        assert_eq!(store.snapshot_current().unwrap().messages.len(), 1);
    }

    #[test]
    fn test_pending_nonces_are_unique() {
        let store = store_with_session(1);
        let a = store.append_optimistic_user("one").unwrap();
        store.replace_message_id(a, MessageId::Confirmed(1));
        let b = store.upsert_streaming_assistant("x").unwrap();
        assert_ne!(a, b);
    }
}
