//! Business logic for the Parlance chat client.
//!
//! This crate defines the backend port (the `ChatBackend` trait) that the
//! transport layer implements, the session state store, and the generation
//! controller that orchestrates streaming inference. It depends only on
//! `parlance-types` -- never on `parlance-client` or any HTTP crate.

pub mod chat;
