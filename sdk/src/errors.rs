//! Error types and handling
//!
//! This module provides the error types used throughout Draftmill.
//! All errors implement the `ErrorExt` trait which provides operator-facing
//! hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! Error messages never carry provider credentials. Raw provider error bodies
//! are kept in the `Display` text for logs, while `user_hint()` is always a
//! static string that is safe to show on a dashboard.

use thiserror::Error;

/// Trait for Draftmill error extensions
///
/// This trait provides additional context for errors, including
/// operator-facing hints and recoverability information.
pub trait ErrorExt {
    /// Returns an operator-facing hint for the error
    ///
    /// The hint never contains secrets, raw provider responses or internal
    /// implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors are retried by a later invocation. Non-recoverable
    /// errors need operator action (configuration, store availability).
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Store**: SQLite operation failures, lost compare-and-swap writes
/// - **AI Provider**: API failures, exhausted fallback chains
/// - **Pipeline**: Phase failures and malformed drafts
/// - **Trigger API**: Authentication and rate limiting
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, ErrorExt};
///
/// let error = EngineError::PhaseFailed {
///     phase: "outline".to_string(),
///     reason: "outline was not a JSON array".to_string(),
/// };
/// assert!(error.is_recoverable());
///
/// let fatal = EngineError::NoProviderConfigured;
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown site: {0}")]
    UnknownSite(String),

    // Store errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Claim allocator failed: {0}")]
    ClaimFailed(String),

    #[error("Draft {draft_id} is no longer claimed in phase {phase}")]
    LostClaim { draft_id: String, phase: String },

    #[error("Invalid stored value for {field}: {value}")]
    InvalidStoredValue { field: String, value: String },

    // AI provider errors
    #[error("AI provider error: {0}")]
    LLMProvider(String),

    #[error("All AI providers failed")]
    AllProvidersExhausted,

    #[error("No AI provider has a credential configured")]
    NoProviderConfigured,

    #[error("Unknown AI provider: {0}")]
    UnknownProvider(String),

    // Pipeline errors
    #[error("Phase {phase} failed: {reason}")]
    PhaseFailed { phase: String, reason: String },

    #[error("Unknown pipeline action: {0}")]
    UnknownAction(String),

    // Trigger API errors
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limit exceeded for {src}: {count}/{limit} requests in {window}")]
    RateLimitExceeded {
        src: String,
        count: i64,
        limit: i64,
        window: String,
    },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            // Configuration errors
            Self::Config(_) => "Check your config.toml file for errors",
            Self::UnknownSite(_) => "The site id is not listed under [[sites]] in config.toml",

            // Store errors
            Self::Database(_) => "Database operation failed. Check the data directory",
            Self::ClaimFailed(_) => "The draft store is unreachable. No drafts were processed",
            Self::LostClaim { .. } => "Another run changed this draft. It will be retried",
            Self::InvalidStoredValue { .. } => "A stored draft has an unexpected value",

            // AI provider errors
            Self::LLMProvider(_) => "AI provider request failed. It will be retried",
            Self::AllProvidersExhausted => "Every AI provider failed. Check provider status",
            Self::NoProviderConfigured => "No AI provider API key is set. Configure at least one",
            Self::UnknownProvider(_) => "Unknown AI provider name",

            // Pipeline errors
            Self::PhaseFailed { .. } => "A production phase failed. It will be retried",
            Self::UnknownAction(_) => "Unknown pipeline action",

            // Trigger API errors
            Self::Unauthorized => "Missing or invalid trigger token",
            Self::RateLimitExceeded { .. } => "Too many trigger requests. Please wait",

            // Network errors
            Self::Network(_) => "Network operation failed. Check your connection",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_)
            | Self::UnknownSite(_)
            | Self::ClaimFailed(_)
            | Self::NoProviderConfigured
            | Self::UnknownProvider(_)
            | Self::UnknownAction(_)
            | Self::Unauthorized => false,

            // All other errors are retried on a later invocation
            _ => true,
        }
    }
}
