//! HTTP implementation of the chat backend.
//!
//! `ApiClient` speaks the REST and streaming-inference protocol of the
//! Parlance server and plugs into `parlance-core` through the
//! `ChatBackend` trait. The `sse` module decodes the newline-delimited
//! `data: ` event framing used by the streaming endpoint.

pub mod api;
pub mod config;
pub mod sse;

pub use api::ApiClient;
pub use config::ClientConfig;
