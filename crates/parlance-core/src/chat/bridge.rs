//! Partial-persistence bridge.
//!
//! When a generation is cancelled mid-stream, whatever assistant text had
//! accumulated is shipped to the backend's save-partial endpoint, and the
//! authoritative id it returns replaces the streaming placeholder. This is
//! a best-effort path: a failure is logged and the placeholder id stays in
//! place -- the transcript still shows the right text, only the id is
//! non-authoritative until the next reload. Nothing here ever propagates
//! an error out of the cancellation flow.

use tracing::{info, warn};

use parlance_types::error::ChatError;
use parlance_types::protocol::SavePartialRequest;

use super::backend::ChatBackend;
use super::store::SharedSessionStore;

/// Persist a cancelled generation's accumulated text.
///
/// Returns whether an authoritative assistant id was obtained (so the
/// caller knows a roster refresh is warranted).
pub(crate) async fn save_partial_response<B: ChatBackend>(
    backend: &B,
    store: &SharedSessionStore,
    session_id: i64,
    user_message_id: i64,
    partial_text: &str,
) -> bool {
    let body = SavePartialRequest {
        session_id,
        user_message_id,
        partial_response: partial_text.to_string(),
    };
    match backend.save_partial(&body).await {
        Ok(response) => {
            // Reconcile the placeholder only while its session is still
            // the loaded one; after a switch the save is server-side only.
            if store.current_session_id() == Some(session_id) {
                store.finalize_assistant(response.assistant_message_id, partial_text);
            }
            info!(
                session_id,
                assistant_message_id = response.assistant_message_id,
                "partial response persisted"
            );
            true
        }
        Err(err) => {
            let err = ChatError::Persistence(err.to_string());
            warn!(session_id, error = %err, "failed to persist partial response");
            false
        }
    }
}
