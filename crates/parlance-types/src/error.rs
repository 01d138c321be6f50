//! Error taxonomy for the chat client core.

use thiserror::Error;

/// Errors surfaced by the chat client core.
///
/// `Cancelled` is not a failure: it is the expected outcome of a
/// user-initiated cancellation and is routed into the partial-persistence
/// path instead of being reported. `Persistence` covers best-effort side
/// channels (partial save, roster refresh) and is logged rather than
/// propagated. No variant is fatal -- every path resolves the controller
/// back to idle.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Network/HTTP failure, or a failure the server reported over the
    /// stream via an `error` event.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed or out-of-order event, or a stream that ended without a
    /// terminal `done`/`error` event.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The generation was cancelled. Expected outcome of `cancel()`.
    #[error("generation cancelled")]
    Cancelled,

    /// A best-effort persistence call (partial save, roster refresh)
    /// failed. Logged only; never masks a successful cancellation.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// `send` was called while a generation is already active. One
    /// generation at a time; requests are rejected, never queued.
    #[error("a generation is already in progress")]
    GenerationInProgress,

    /// The operation requires a loaded session.
    #[error("no active session")]
    NoActiveSession,

    /// An edit targeted a message that is not in the current transcript.
    #[error("message {0} not found in the current session")]
    MessageNotFound(i64),
}

impl ChatError {
    /// Whether this error is the cancellation outcome rather than a
    /// genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatError::Cancelled)
    }
}
