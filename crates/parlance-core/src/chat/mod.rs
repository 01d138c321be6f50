//! Chat orchestration: backend port, session state store, generation
//! controller, and the partial-persistence bridge.

pub mod backend;
mod bridge;
pub mod controller;
pub mod store;

pub use backend::{ChatBackend, EventStream};
pub use controller::{ChatController, GenerationOutcome, GenerationStatus};
pub use store::SharedSessionStore;
