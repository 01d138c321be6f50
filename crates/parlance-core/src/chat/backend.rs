//! ChatBackend trait definition.
//!
//! This is the port through which the core reaches the remote chat
//! service. Uses native async fn in traits (RPITIT, Rust 2024 edition)
//! for the request/response endpoints; `stream_inference` returns a boxed
//! stream so the event sequence can be consumed without naming the
//! transport's concrete stream type.
//!
//! The production implementation lives in `parlance-client`
//! (`ApiClient`); tests substitute recording mocks.

use std::pin::Pin;

use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use parlance_types::chat::SessionSummary;
use parlance_types::error::ChatError;
use parlance_types::protocol::{
    Ack, InferenceRequest, InferenceResponse, SavePartialRequest, SavePartialResponse,
    SessionCreate, SessionDetail, SessionPatch, StreamEvent,
};

/// A lazy, finite, non-restartable sequence of protocol events.
///
/// Terminates after yielding `Done`, or with an `Err` item:
/// `ChatError::Cancelled` when the cancellation signal fired,
/// `ChatError::Transport` for network or server-reported failures,
/// `ChatError::Protocol` for malformed events or a source that ended
/// without a terminal event.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ChatError>> + Send + 'static>>;

/// Remote chat service consumed by the core.
pub trait ChatBackend: Send + Sync {
    /// Create a new session.
    fn create_session(
        &self,
        body: &SessionCreate,
    ) -> impl std::future::Future<Output = Result<SessionDetail, ChatError>> + Send;

    /// List session summaries, most recently updated first.
    fn list_sessions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<SessionSummary>, ChatError>> + Send;

    /// Fetch a session with its full transcript.
    fn get_session(
        &self,
        session_id: i64,
    ) -> impl std::future::Future<Output = Result<SessionDetail, ChatError>> + Send;

    /// Delete a session and all of its messages.
    fn delete_session(
        &self,
        session_id: i64,
    ) -> impl std::future::Future<Output = Result<Ack, ChatError>> + Send;

    /// Partially update a session (rename, etc.).
    fn update_session(
        &self,
        session_id: i64,
        patch: &SessionPatch,
    ) -> impl std::future::Future<Output = Result<SessionDetail, ChatError>> + Send;

    /// Search session summaries by free-text query.
    fn search_sessions(
        &self,
        query: &str,
    ) -> impl std::future::Future<Output = Result<Vec<SessionSummary>, ChatError>> + Send;

    /// Delete the given message and everything after it within a session.
    fn delete_messages_from(
        &self,
        session_id: i64,
        message_id: i64,
    ) -> impl std::future::Future<Output = Result<Ack, ChatError>> + Send;

    /// Persist a partially generated assistant response after a
    /// cancellation; returns the authoritative id for the truncated text.
    fn save_partial(
        &self,
        body: &SavePartialRequest,
    ) -> impl std::future::Future<Output = Result<SavePartialResponse, ChatError>> + Send;

    /// Single synchronous inference round trip (no streaming).
    fn infer(
        &self,
        request: &InferenceRequest,
    ) -> impl std::future::Future<Output = Result<InferenceResponse, ChatError>> + Send;

    /// Open a streaming inference request.
    ///
    /// The transport checks `cancel` between chunk reads and terminates
    /// the stream with `ChatError::Cancelled` once the signal fires.
    fn stream_inference(
        &self,
        request: InferenceRequest,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Result<EventStream, ChatError>> + Send;
}

/// Shared backends forward to the inner implementation, so a single
/// client can serve the controller and any number of side consumers.
impl<B: ChatBackend> ChatBackend for std::sync::Arc<B> {
    async fn create_session(&self, body: &SessionCreate) -> Result<SessionDetail, ChatError> {
        (**self).create_session(body).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        (**self).list_sessions().await
    }

    async fn get_session(&self, session_id: i64) -> Result<SessionDetail, ChatError> {
        (**self).get_session(session_id).await
    }

    async fn delete_session(&self, session_id: i64) -> Result<Ack, ChatError> {
        (**self).delete_session(session_id).await
    }

    async fn update_session(
        &self,
        session_id: i64,
        patch: &SessionPatch,
    ) -> Result<SessionDetail, ChatError> {
        (**self).update_session(session_id, patch).await
    }

    async fn search_sessions(&self, query: &str) -> Result<Vec<SessionSummary>, ChatError> {
        (**self).search_sessions(query).await
    }

    async fn delete_messages_from(
        &self,
        session_id: i64,
        message_id: i64,
    ) -> Result<Ack, ChatError> {
        (**self).delete_messages_from(session_id, message_id).await
    }

    async fn save_partial(&self, body: &SavePartialRequest) -> Result<SavePartialResponse, ChatError> {
        (**self).save_partial(body).await
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ChatError> {
        (**self).infer(request).await
    }

    async fn stream_inference(
        &self,
        request: InferenceRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, ChatError> {
        (**self).stream_inference(request, cancel).await
    }
}
