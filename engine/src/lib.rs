//! Draftmill Engine Library
//!
//! This library provides the core functionality of the Draftmill content
//! pipeline. It is used by the `draftmill` binary, the trigger API server and
//! integration tests.

/// Wall-clock abstraction
pub mod clock;

/// Configuration management module
pub mod config;

/// Text analysis used by the phases and the gate
pub mod content_analyzer;

/// Database persistence module
pub mod db;

/// AI provider adapters and fallback router
pub mod llm;

/// Phase pipeline, gate and publisher
pub mod pipeline;

/// Rate limiting module
pub mod rate_limiter;

/// Invocation wiring
pub mod services;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
