//! Client configuration.

use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

/// Default server base URL, including the API prefix.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Default timeout for request/response endpoints, in seconds. Streaming
/// requests are exempt: a generation may legitimately run longer.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for [`crate::ApiClient`].
///
/// Deserializable so a host application can load it from its own config
/// file. The bearer token is wrapped in `SecretString` and never appears
/// in `Debug` output or logs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the chat server, e.g. `http://localhost:8000/api`.
    pub base_url: String,

    /// Optional bearer token attached to every request.
    pub bearer_token: Option<SecretString>,

    /// Timeout for non-streaming requests, in seconds.
    pub timeout_secs: u64,

    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            bearer_token: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: concat!("parlance/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    /// Config pointing at the given base URL, defaults elsewhere.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Attach a bearer token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(SecretString::from(token.into()));
        self
    }

    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
