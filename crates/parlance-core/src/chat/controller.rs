//! Generation controller.
//!
//! Orchestrates the lifecycle of one streaming request against the
//! backend port: issuing it, applying stream events to the session
//! store, handling cancellation, and finalizing or failing it. Enforces
//! "at most one active generation" -- a `send` while one is in flight is
//! rejected, never queued.
//!
//! The controller also carries the session operations of the surrounding
//! chat surface (create/load/delete/rename/search and the edit flow),
//! since each of them ends in the same roster-refresh policy: the roster
//! is reloaded wholesale after a short debounce rather than patched
//! incrementally.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parlance_types::chat::MessageId;
use parlance_types::error::ChatError;
use parlance_types::protocol::{
    InferenceRequest, InferenceResponse, SessionCreate, SessionPatch, StreamEvent,
};

use super::backend::ChatBackend;
use super::bridge;
use super::store::SharedSessionStore;

/// Delay between a session-affecting mutation and the wholesale roster
/// reload, so the refresh does not race the still-settling backend write.
const DEFAULT_ROSTER_DEBOUNCE: Duration = Duration::from_millis(500);

/// Lifecycle phase of the single in-flight generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationStatus {
    #[default]
    Idle,
    /// Request issued, no event received yet.
    Requesting,
    /// At least one stream event has arrived.
    Streaming,
    /// Cancellation observed; resolving the partial response.
    Cancelling,
}

/// How a generation ended. Cancellation is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed { assistant_message_id: i64 },
    Cancelled,
}

/// In-flight partial response, owned solely by the generation loop.
///
/// Created when a generation starts, extended on every token, cleared on
/// completion or cancellation resolution.
#[derive(Debug)]
struct PartialBuffer {
    session_id: Option<i64>,
    /// Server id of the confirmed user message; unset until the `start`
    /// event arrives. Without it there is nothing to attach a partial
    /// save to.
    user_message_id: Option<i64>,
    accumulated: String,
}

impl PartialBuffer {
    fn new(session_id: Option<i64>) -> Self {
        Self {
            session_id,
            user_message_id: None,
            accumulated: String::new(),
        }
    }

    fn clear(&mut self) {
        self.user_message_id = None;
        self.accumulated.clear();
    }
}

/// Process-wide generation state. Exactly one instance per controller,
/// bound to at most one in-flight request.
#[derive(Debug, Default)]
struct GenerationState {
    status: GenerationStatus,
    active_session_id: Option<i64>,
    /// One-shot abort handle; taken (not cloned) on cancel so a second
    /// cancel or clear finds nothing to fire.
    cancel: Option<CancellationToken>,
    /// Set by `clear`: the draining generation loop must not persist its
    /// partial.
    discard_partial: bool,
}

struct Inner<B> {
    backend: B,
    store: SharedSessionStore,
    state: Mutex<GenerationState>,
    roster_debounce: Duration,
}

/// Chat orchestrator: one streaming generation at a time, applied to a
/// shared session store.
///
/// Cheap to clone; clones share the same state and store.
pub struct ChatController<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for ChatController<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: ChatBackend + 'static> ChatController<B> {
    pub fn new(backend: B) -> Self {
        Self::with_roster_debounce(backend, DEFAULT_ROSTER_DEBOUNCE)
    }

    pub fn with_roster_debounce(backend: B, roster_debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                store: SharedSessionStore::new(),
                state: Mutex::new(GenerationState::default()),
                roster_debounce,
            }),
        }
    }

    /// Handle to the shared session store (for rendering and tests).
    pub fn store(&self) -> SharedSessionStore {
        self.inner.store.clone()
    }

    pub fn status(&self) -> GenerationStatus {
        self.lock_state().status
    }

    /// Session targeted by the in-flight generation, if any.
    pub fn active_session_id(&self) -> Option<i64> {
        self.lock_state().active_session_id
    }

    fn lock_state(&self) -> MutexGuard<'_, GenerationState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- Generation lifecycle ---

    /// Run one streaming generation to completion, cancellation, or
    /// failure.
    ///
    /// Appends an optimistic user message, opens the transport, and
    /// applies events to the store as they arrive. Fails fast with
    /// [`ChatError::GenerationInProgress`] -- without touching the store
    /// -- when another generation is active.
    pub async fn send(&self, request: InferenceRequest) -> Result<GenerationOutcome, ChatError> {
        let cancel = {
            let mut state = self.lock_state();
            if state.status != GenerationStatus::Idle {
                return Err(ChatError::GenerationInProgress);
            }
            let token = CancellationToken::new();
            state.status = GenerationStatus::Requesting;
            state.active_session_id = request
                .session_id
                .or_else(|| self.inner.store.current_session_id());
            state.cancel = Some(token.clone());
            state.discard_partial = false;
            token
        };

        let result = self.run_generation(request, cancel).await;

        let mut state = self.lock_state();
        state.status = GenerationStatus::Idle;
        state.active_session_id = None;
        state.cancel = None;
        result
    }

    async fn run_generation(
        &self,
        request: InferenceRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationOutcome, ChatError> {
        let store = &self.inner.store;
        let placeholder = store.append_optimistic_user(&request.prompt);
        let mut partial =
            PartialBuffer::new(request.session_id.or_else(|| store.current_session_id()));

        let mut stream = self
            .inner
            .backend
            .stream_inference(request, cancel.clone())
            .await?;

        let mut seen_event = false;
        loop {
            // Biased: once cancellation is observed, no further events
            // are processed even if the transport has more buffered.
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Some(Err(ChatError::Cancelled)),
                next = stream.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(ChatError::Cancelled)) => {
                    drop(stream);
                    return Ok(self.resolve_cancellation(&partial).await);
                }
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(ChatError::Protocol(
                        "stream ended without a terminal event".to_string(),
                    ));
                }
            };

            if !seen_event {
                seen_event = true;
                self.lock_state().status = GenerationStatus::Streaming;
            }

            match event {
                StreamEvent::Start {
                    session_id,
                    user_message_id,
                } => {
                    if partial.user_message_id.is_some() {
                        return Err(ChatError::Protocol("duplicate start event".to_string()));
                    }
                    if let Some(placeholder) = placeholder {
                        store.replace_message_id(
                            placeholder,
                            MessageId::Confirmed(user_message_id),
                        );
                    }
                    partial.session_id = Some(session_id);
                    partial.user_message_id = Some(user_message_id);
                    self.lock_state().active_session_id = Some(session_id);
                    debug!(session_id, user_message_id, "generation accepted");
                }
                StreamEvent::Token { content } => {
                    if partial.user_message_id.is_none() {
                        return Err(ChatError::Protocol("token event before start".to_string()));
                    }
                    partial.accumulated.push_str(&content);
                    // After a mid-stream session switch the buffer keeps
                    // accumulating for the partial-save path, but the
                    // newly loaded transcript is never written to.
                    if partial.session_id == store.current_session_id() {
                        store.upsert_streaming_assistant(&partial.accumulated);
                    }
                }
                StreamEvent::Done {
                    assistant_message_id,
                    full_response,
                } => {
                    if partial.user_message_id.is_none() {
                        return Err(ChatError::Protocol("done event before start".to_string()));
                    }
                    // The server's final text supersedes the local
                    // accumulation. A transcript loaded mid-stream
                    // belongs to another session and stays untouched.
                    if partial.session_id == store.current_session_id() {
                        store.finalize_assistant(assistant_message_id, &full_response);
                    }
                    info!(
                        session_id = partial.session_id,
                        assistant_message_id, "generation completed"
                    );
                    partial.clear();
                    self.schedule_roster_refresh();
                    return Ok(GenerationOutcome::Completed {
                        assistant_message_id,
                    });
                }
                StreamEvent::Error { message } => {
                    // Already-rendered partial content stays; nothing is
                    // persisted on the failure path.
                    return Err(ChatError::Transport(message));
                }
            }
        }
    }

    async fn resolve_cancellation(&self, partial: &PartialBuffer) -> GenerationOutcome {
        let discard = {
            let mut state = self.lock_state();
            state.status = GenerationStatus::Cancelling;
            state.discard_partial
        };

        if !discard
            && !partial.accumulated.is_empty()
            && let (Some(session_id), Some(user_message_id)) =
                (partial.session_id, partial.user_message_id)
        {
            let persisted = bridge::save_partial_response(
                &self.inner.backend,
                &self.inner.store,
                session_id,
                user_message_id,
                &partial.accumulated,
            )
            .await;
            if persisted {
                self.schedule_roster_refresh();
            }
        }

        info!(session_id = partial.session_id, "generation cancelled");
        GenerationOutcome::Cancelled
    }

    /// Signal cancellation of the in-flight generation.
    ///
    /// Valid only while requesting or streaming; returns whether a
    /// generation was actually signalled. The generation loop observes
    /// the signal, stops consuming events, and resolves the partial
    /// response through the persistence bridge.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock_state();
        if !matches!(
            state.status,
            GenerationStatus::Requesting | GenerationStatus::Streaming
        ) {
            return false;
        }
        match state.cancel.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Reset everything: abort any in-flight transport (exactly once),
    /// discard the pending partial without persisting it, and empty the
    /// store. Safe to call repeatedly.
    pub fn clear(&self) {
        {
            let mut state = self.lock_state();
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            state.discard_partial = true;
            state.status = GenerationStatus::Idle;
            state.active_session_id = None;
        }
        self.inner.store.clear();
    }

    /// Single synchronous inference round trip (no streaming, no
    /// placeholders). Subject to the same one-generation-at-a-time rule.
    pub async fn send_blocking(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, ChatError> {
        {
            let mut state = self.lock_state();
            if state.status != GenerationStatus::Idle {
                return Err(ChatError::GenerationInProgress);
            }
            state.status = GenerationStatus::Requesting;
            state.active_session_id = request
                .session_id
                .or_else(|| self.inner.store.current_session_id());
        }

        let result = self.inner.backend.infer(&request).await;

        {
            let mut state = self.lock_state();
            state.status = GenerationStatus::Idle;
            state.active_session_id = None;
        }

        let response = result?;
        if self.inner.store.current_session_id() == Some(response.session_id) {
            let store = &self.inner.store;
            store.append_confirmed(response.user_message.clone().into());
            store.append_confirmed(response.assistant_message.clone().into());
        }
        self.schedule_roster_refresh();
        Ok(response)
    }

    // --- Edit flow ---

    /// Edit a historical user message: rewrite history, then behave
    /// exactly like sending a fresh message.
    ///
    /// Deletes the message and everything after it (backend first, then
    /// the local transcript) and resubmits the edited text through
    /// [`Self::send`].
    pub async fn edit_message(
        &self,
        message_id: i64,
        new_content: impl Into<String>,
    ) -> Result<GenerationOutcome, ChatError> {
        if self.status() != GenerationStatus::Idle {
            return Err(ChatError::GenerationInProgress);
        }
        let session_id = self
            .inner
            .store
            .current_session_id()
            .ok_or(ChatError::NoActiveSession)?;
        let target = MessageId::Confirmed(message_id);
        if !self.inner.store.contains_message(target) {
            return Err(ChatError::MessageNotFound(message_id));
        }

        self.inner
            .backend
            .delete_messages_from(session_id, message_id)
            .await?;
        self.inner.store.truncate_from(target);
        debug!(session_id, message_id, "transcript truncated for edit");

        self.send(InferenceRequest::new(new_content.into(), Some(session_id)))
            .await
    }

    // --- Session operations ---

    /// Create a session and load it as current.
    pub async fn create_session(&self, title: Option<String>) -> Result<i64, ChatError> {
        let body = SessionCreate {
            title: Some(title.unwrap_or_else(|| "New Chat".to_string())),
        };
        let detail = self.inner.backend.create_session(&body).await?;
        let session_id = detail.id;
        self.inner.store.replace_all(detail.into());
        info!(session_id, "session created");
        self.schedule_roster_refresh();
        Ok(session_id)
    }

    /// Load a session's full transcript as the current session.
    pub async fn load_session(&self, session_id: i64) -> Result<(), ChatError> {
        let detail = self.inner.backend.get_session(session_id).await?;
        self.inner.store.replace_all(detail.into());
        Ok(())
    }

    /// Delete a session; drops it locally when it is the current one.
    pub async fn delete_session(&self, session_id: i64) -> Result<(), ChatError> {
        self.inner.backend.delete_session(session_id).await?;
        self.inner.store.remove_current_if(session_id);
        info!(session_id, "session deleted");
        self.schedule_roster_refresh();
        Ok(())
    }

    /// Rename a session; patches the current title in place when it
    /// matches.
    pub async fn rename_session(&self, session_id: i64, title: &str) -> Result<(), ChatError> {
        let patch = SessionPatch {
            title: Some(title.to_string()),
        };
        self.inner
            .backend
            .update_session(session_id, &patch)
            .await?;
        self.inner.store.set_title(session_id, title);
        info!(session_id, title, "session renamed");
        self.schedule_roster_refresh();
        Ok(())
    }

    /// Replace the roster with search results. A blank query degrades to
    /// a full roster reload.
    pub async fn search_sessions(&self, query: &str) -> Result<(), ChatError> {
        if query.trim().is_empty() {
            return self.refresh_roster().await;
        }
        let roster = self.inner.backend.search_sessions(query).await?;
        self.inner.store.set_roster(roster);
        Ok(())
    }

    /// Reload the roster wholesale, immediately.
    pub async fn refresh_roster(&self) -> Result<(), ChatError> {
        let roster = self.inner.backend.list_sessions().await?;
        self.inner.store.set_roster(roster);
        Ok(())
    }

    /// Reload the roster after the configured debounce, on a background
    /// task. Failures are best-effort: logged, never surfaced.
    fn schedule_roster_refresh(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.roster_debounce).await;
            match inner.backend.list_sessions().await {
                Ok(roster) => inner.store.set_roster(roster),
                Err(err) => {
                    let err = ChatError::Persistence(err.to_string());
                    warn!(error = %err, "roster refresh failed");
                }
            }
        });
    }
}
