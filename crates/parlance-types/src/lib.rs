//! Shared domain types for Parlance.
//!
//! This crate contains the types used across the Parlance chat client:
//! sessions, messages, the tagged message identifier, the wire protocol
//! for the token stream, and the error taxonomy.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod chat;
pub mod error;
pub mod protocol;
