//! AI Provider Abstraction Layer
//!
//! This module provides a common interface for the hosted chat-completion
//! providers Draftmill can write with (OpenAI, Anthropic, Gemini, NVIDIA NIM,
//! OpenRouter). Each provider is a `ProviderAdapter` that only knows how to
//! shape a request and read a response; the `router` owns the HTTP transport,
//! timeouts, credentials and the fallback chain.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::ProviderEndpoint;
use sdk::errors::EngineError;

pub mod anthropic;
pub mod credentials;
pub mod gemini;
pub mod nvidia_nim;
pub mod openai;
pub mod openrouter;
pub mod router;

pub use credentials::{CredentialSource, EnvCredentials, SecretString, StaticCredentials};
pub use router::{GenerationFailure, GenerationResult, GenerationSuccess, ProviderRouter};

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur while talking to one provider
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// Map a non-success HTTP status to an error
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => LLMError::AuthenticationFailed(body),
            429 => LLMError::RateLimitExceeded,
            400 | 404 | 422 => LLMError::InvalidRequest(body),
            _ => LLMError::ProviderUnavailable(format!("HTTP {}: {}", status, body)),
        }
    }
}

/// Identifier of a supported provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKey {
    #[serde(rename = "openai")]
    OpenAI,
    Anthropic,
    Gemini,
    NvidiaNim,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

impl ProviderKey {
    pub const ALL: [ProviderKey; 5] = [
        ProviderKey::OpenAI,
        ProviderKey::Anthropic,
        ProviderKey::Gemini,
        ProviderKey::NvidiaNim,
        ProviderKey::OpenRouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKey::OpenAI => "openai",
            ProviderKey::Anthropic => "anthropic",
            ProviderKey::Gemini => "gemini",
            ProviderKey::NvidiaNim => "nvidia_nim",
            ProviderKey::OpenRouter => "openrouter",
        }
    }

    /// Environment variable holding the provider's API key
    pub fn credential_env(&self) -> &'static str {
        match self {
            ProviderKey::OpenAI => "OPENAI_API_KEY",
            ProviderKey::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKey::Gemini => "GEMINI_API_KEY",
            ProviderKey::NvidiaNim => "NVIDIA_NIM_API_KEY",
            ProviderKey::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKey {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ProviderKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| EngineError::UnknownProvider(s.to_string()))
    }
}

/// Message in a generation request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Per-call generation options
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    /// Model override; `None` uses the provider's configured model
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 4096,
            temperature: Some(0.7),
        }
    }
}

impl GenerateOptions {
    pub fn with_max_tokens(max_tokens: u32) -> Self {
        Self {
            max_tokens,
            ..Default::default()
        }
    }
}

/// Normalized provider output
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tokens_used: u64,
    pub model: String,
}

/// A fully-shaped HTTP request for a provider
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

/// Shapes requests for, and reads responses from, one provider API
pub trait ProviderAdapter: Send + Sync {
    fn key(&self) -> ProviderKey;

    fn build_request(
        &self,
        endpoint: &ProviderEndpoint,
        api_key: &SecretString,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> ProviderRequest;

    fn parse_response(&self, body: &serde_json::Value, model: &str) -> Result<Completion>;

    /// Deterministic local cost estimate in USD
    fn cost(&self, endpoint: &ProviderEndpoint, tokens: u64) -> f64 {
        (tokens as f64 / 1000.0) * endpoint.cost_per_1k_tokens
    }
}

/// Adapters keyed by provider
pub struct AdapterRegistry {
    adapters: HashMap<ProviderKey, Box<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry holding one adapter for every supported provider
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(openai::OpenAIAdapter));
        registry.register(Box::new(anthropic::AnthropicAdapter));
        registry.register(Box::new(gemini::GeminiAdapter));
        registry.register(Box::new(nvidia_nim::NvidiaNimAdapter));
        registry.register(Box::new(openrouter::OpenRouterAdapter::default()));
        registry
    }

    pub fn register(&mut self, adapter: Box<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.key(), adapter);
    }

    pub fn get(&self, key: ProviderKey) -> Option<&dyn ProviderAdapter> {
        self.adapters.get(&key).map(|a| a.as_ref())
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Strip a markdown code fence around a JSON payload, if present
///
/// Models often wrap JSON answers in ```json fences even when told not to.
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}
