//! REST client for the chat server.

use futures_util::StreamExt;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use parlance_core::chat::{ChatBackend, EventStream};
use parlance_types::chat::SessionSummary;
use parlance_types::error::ChatError;
use parlance_types::protocol::{
    Ack, InferenceRequest, InferenceResponse, SavePartialRequest, SavePartialResponse,
    SessionCreate, SessionDetail, SessionPatch,
};

use crate::config::ClientConfig;
use crate::sse::decode_event_stream;

const LIST_LIMIT: u32 = 100;
const SEARCH_LIMIT: u32 = 50;

/// HTTP implementation of [`ChatBackend`].
///
/// Cheap to clone; the underlying `reqwest::Client` pools connections.
/// Non-streaming requests carry the configured timeout; streaming
/// inference is bounded by cancellation instead, since a generation may
/// legitimately outlive any fixed deadline.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<SecretString>,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .map_err(|err| ChatError::Transport(format!("failed to build HTTP client: {err}")))?;
        let timeout = config.timeout();
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token,
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, self.url(path));
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        builder
    }

    /// Send a request and reject non-success statuses, folding the
    /// response body into the error detail.
    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ChatError> {
        let response = builder
            .send()
            .await
            .map_err(|err| ChatError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(status = %status, "request rejected by server");
            return Err(http_error(status, &detail));
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ChatError> {
        let response = self.execute(builder.timeout(self.timeout)).await?;
        response
            .json()
            .await
            .map_err(|err| ChatError::Protocol(format!("malformed response body: {err}")))
    }

    /// Fetch a session transcript rendered as markdown.
    pub async fn export_session(&self, session_id: i64) -> Result<String, ChatError> {
        let builder = self
            .request(Method::GET, &format!("/chat/sessions/{session_id}/export"))
            .timeout(self.timeout);
        let response = self.execute(builder).await?;
        response
            .text()
            .await
            .map_err(|err| ChatError::Transport(err.to_string()))
    }
}

fn http_error(status: StatusCode, detail: &str) -> ChatError {
    if detail.is_empty() {
        ChatError::Transport(format!("HTTP {status}"))
    } else {
        ChatError::Transport(format!("HTTP {status}: {detail}"))
    }
}

impl ChatBackend for ApiClient {
    async fn create_session(&self, body: &SessionCreate) -> Result<SessionDetail, ChatError> {
        self.json(self.request(Method::POST, "/chat/sessions").json(body))
            .await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        self.json(
            self.request(Method::GET, "/chat/sessions")
                .query(&[("limit", LIST_LIMIT)]),
        )
        .await
    }

    async fn get_session(&self, session_id: i64) -> Result<SessionDetail, ChatError> {
        self.json(self.request(Method::GET, &format!("/chat/sessions/{session_id}")))
            .await
    }

    async fn delete_session(&self, session_id: i64) -> Result<Ack, ChatError> {
        self.json(self.request(Method::DELETE, &format!("/chat/sessions/{session_id}")))
            .await
    }

    async fn update_session(
        &self,
        session_id: i64,
        patch: &SessionPatch,
    ) -> Result<SessionDetail, ChatError> {
        self.json(
            self.request(Method::PATCH, &format!("/chat/sessions/{session_id}"))
                .json(patch),
        )
        .await
    }

    async fn search_sessions(&self, query: &str) -> Result<Vec<SessionSummary>, ChatError> {
        self.json(
            self.request(Method::GET, "/chat/search")
                .query(&[("q", query)])
                .query(&[("limit", SEARCH_LIMIT)]),
        )
        .await
    }

    async fn delete_messages_from(
        &self,
        session_id: i64,
        message_id: i64,
    ) -> Result<Ack, ChatError> {
        self.json(self.request(
            Method::DELETE,
            &format!("/chat/sessions/{session_id}/messages/{message_id}"),
        ))
        .await
    }

    async fn save_partial(&self, body: &SavePartialRequest) -> Result<SavePartialResponse, ChatError> {
        self.json(
            self.request(Method::POST, "/chat/inference/save-partial")
                .json(body),
        )
        .await
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<InferenceResponse, ChatError> {
        self.json(
            self.request(Method::POST, "/chat/inference")
                .json(request),
        )
        .await
    }

    async fn stream_inference(
        &self,
        request: InferenceRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, ChatError> {
        debug!(session_id = request.session_id, "opening inference stream");
        let builder = self
            .request(Method::POST, "/chat/inference/stream")
            .json(&request);
        let response = self.execute(builder).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| ChatError::Transport(err.to_string())));
        Ok(decode_event_stream(bytes, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_carries_token_and_timeout_from_config() {
        let config = ClientConfig::new("http://localhost:8000/api")
            .with_bearer_token("tok");
        let timeout = config.timeout();
        let client = ApiClient::new(config).unwrap();
        assert_eq!(client.timeout, timeout);
        assert!(client.bearer_token.is_some());
    }

    #[test]
    fn test_url_joining_strips_trailing_slash() {
        let client =
            ApiClient::new(ClientConfig::new("http://localhost:8000/api/")).unwrap();
        assert_eq!(
            client.url("/chat/sessions"),
            "http://localhost:8000/api/chat/sessions"
        );
    }

    #[test]
    fn test_http_error_includes_detail() {
        let err = http_error(StatusCode::CONFLICT, "generation in progress");
        assert!(err.to_string().contains("409"));
        assert!(err.to_string().contains("generation in progress"));
        let bare = http_error(StatusCode::NOT_FOUND, "");
        assert_eq!(bare.to_string(), "transport error: HTTP 404 Not Found");
    }
}
