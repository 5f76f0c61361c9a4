//! Draftmill SDK
//!
//! Shared library providing error types and trigger wire types.
//! This crate is used by both the engine and the api-server core tool.

/// Error types and handling
pub mod errors;

/// Trigger request/response types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, ErrorExt};
pub use types::{Action, TriggerRequest, TriggerResponse};
