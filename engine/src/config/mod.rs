//! Configuration management
//!
//! This module handles loading, validation, and management of the Draftmill
//! configuration. Configuration is stored in TOML format at
//! ~/.draftmill/config.toml unless a path is given on the command line.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **pipeline**: Budget guard, retry and drafting limits
//! - **llm**: Default provider, fallback order, per-provider endpoints and rates
//! - **publisher**: Per-run and per-locale daily publish caps
//! - **gate**: Pre-publication thresholds
//! - **api**: Trigger endpoint bind address, token and rate limit
//! - **sites**: One entry per site the pipeline writes for
//!
//! Provider API keys never live in this file. They are read from the
//! environment at call time (see `llm::credentials`).
//!
//! # Examples
//!
//! ```no_run
//! use draftmill_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Budget: {}s", config.pipeline.budget_secs);
//! println!("Default provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::llm::ProviderKey;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Pipeline runner settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// AI provider configuration
    pub llm: LLMConfig,

    /// Publisher caps
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Pre-publication gate thresholds
    #[serde(default)]
    pub gate: GateConfig,

    /// Trigger API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Sites served by this pipeline
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion). The SQLite store lives here.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl CoreConfig {
    /// Path of the SQLite draft store
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("draftmill.db")
    }
}

/// Pipeline runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hard wall-clock budget for one invocation, in seconds
    #[serde(default = "default_budget_secs")]
    pub budget_secs: u64,

    /// Shortest time one unit of work can take, in seconds
    #[serde(default = "default_min_margin_secs")]
    pub min_margin_secs: u64,

    /// Drafts advanced per `advance` invocation
    #[serde(default = "default_max_units")]
    pub max_units_per_invocation: u32,

    /// Sections written per drafting-phase execution
    #[serde(default = "default_sections_per_invocation")]
    pub sections_per_invocation: u32,

    /// Age after which a draft left in 'generating' is reported as stuck
    #[serde(default = "default_stuck_after_secs")]
    pub stuck_after_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            budget_secs: default_budget_secs(),
            min_margin_secs: default_min_margin_secs(),
            max_units_per_invocation: default_max_units(),
            sections_per_invocation: default_sections_per_invocation(),
            stuck_after_secs: default_stuck_after_secs(),
        }
    }
}

/// AI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider used when no route exists for a task type
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Providers tried after the preferred one, in order
    #[serde(default = "default_fallback_order")]
    pub fallback_order: Vec<String>,

    /// Timeout applied to every outbound provider request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum completion tokens requested from providers
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "ProviderEndpoint::openai")]
    pub openai: ProviderEndpoint,

    #[serde(default = "ProviderEndpoint::anthropic")]
    pub anthropic: ProviderEndpoint,

    #[serde(default = "ProviderEndpoint::gemini")]
    pub gemini: ProviderEndpoint,

    #[serde(default = "ProviderEndpoint::nvidia_nim")]
    pub nvidia_nim: ProviderEndpoint,

    #[serde(default = "ProviderEndpoint::openrouter")]
    pub openrouter: ProviderEndpoint,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            fallback_order: default_fallback_order(),
            request_timeout_secs: default_request_timeout_secs(),
            max_tokens: default_max_tokens(),
            openai: ProviderEndpoint::openai(),
            anthropic: ProviderEndpoint::anthropic(),
            gemini: ProviderEndpoint::gemini(),
            nvidia_nim: ProviderEndpoint::nvidia_nim(),
            openrouter: ProviderEndpoint::openrouter(),
        }
    }
}

impl LLMConfig {
    /// Endpoint settings for a provider
    pub fn endpoint(&self, key: ProviderKey) -> &ProviderEndpoint {
        match key {
            ProviderKey::OpenAI => &self.openai,
            ProviderKey::Anthropic => &self.anthropic,
            ProviderKey::Gemini => &self.gemini,
            ProviderKey::NvidiaNim => &self.nvidia_nim,
            ProviderKey::OpenRouter => &self.openrouter,
        }
    }
}

/// Endpoint and pricing for one provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderEndpoint {
    /// Base URL of the provider API
    pub base_url: String,

    /// Model used when the route does not name one
    pub model: String,

    /// Local cost estimate in USD per 1k tokens, for reporting only
    #[serde(default)]
    pub cost_per_1k_tokens: f64,
}

impl ProviderEndpoint {
    fn new(base_url: &str, model: &str, cost_per_1k_tokens: f64) -> Self {
        Self {
            base_url: base_url.to_string(),
            model: model.to_string(),
            cost_per_1k_tokens,
        }
    }

    pub fn openai() -> Self {
        Self::new("https://api.openai.com/v1", "gpt-4o-mini", 0.0006)
    }

    pub fn anthropic() -> Self {
        Self::new(
            "https://api.anthropic.com/v1",
            "claude-3-5-haiku-20241022",
            0.004,
        )
    }

    pub fn gemini() -> Self {
        Self::new(
            "https://generativelanguage.googleapis.com/v1beta",
            "gemini-1.5-flash",
            0.0003,
        )
    }

    pub fn nvidia_nim() -> Self {
        Self::new(
            "https://integrate.api.nvidia.com/v1",
            "meta/llama-3.1-70b-instruct",
            0.0008,
        )
    }

    pub fn openrouter() -> Self {
        Self::new(
            "https://openrouter.ai/api/v1",
            "meta-llama/llama-3.1-70b-instruct",
            0.0009,
        )
    }
}

/// Publisher caps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Maximum drafts promoted by one publish run
    #[serde(default = "default_per_run_cap")]
    pub per_run_cap: u32,

    /// Maximum drafts promoted per (site, locale) per UTC day
    #[serde(default = "default_daily_cap")]
    pub daily_cap_per_locale: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            per_run_cap: default_per_run_cap(),
            daily_cap_per_locale: default_daily_cap(),
        }
    }
}

/// Pre-publication gate thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_min_seo_score")]
    pub min_seo_score: f64,

    #[serde(default = "default_min_words")]
    pub min_words: u32,

    #[serde(default = "default_min_internal_links")]
    pub min_internal_links: u32,

    /// Minimum Flesch reading ease
    #[serde(default = "default_min_readability")]
    pub min_readability: f64,

    /// Stock AI phrases tolerated before the authenticity check fails
    #[serde(default = "default_max_cliche_hits")]
    pub max_cliche_hits: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_seo_score: default_min_seo_score(),
            min_words: default_min_words(),
            min_internal_links: default_min_internal_links(),
            min_readability: default_min_readability(),
            max_cliche_hits: default_max_cliche_hits(),
        }
    }
}

/// Trigger API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address the trigger endpoint binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Environment variable holding the bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Trigger requests allowed per client per minute
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token_env: default_token_env(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

/// One site the pipeline writes for
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    /// Stable site identifier (matches `drafts.site_id`)
    pub id: String,

    /// Human-readable site name
    #[serde(default)]
    pub name: String,

    /// Public origin, e.g. https://example.com
    pub base_url: String,

    /// Locales the site serves
    pub locales: Vec<String>,

    /// Locale served without a path prefix
    pub default_locale: String,

    /// Path prefix of article routes, e.g. "/blog"
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,

    /// Word count the writers aim for
    #[serde(default = "default_target_word_count")]
    pub target_word_count: u32,

    /// Byline attached during scoring
    #[serde(default)]
    pub author: String,

    /// Site-relative paths that can be linked from articles
    #[serde(default)]
    pub internal_links: Vec<String>,
}

impl SiteConfig {
    /// Resolve the localized public route of an article
    ///
    /// Returns `None` when the site does not serve `locale` or the slug is empty.
    pub fn route_for(&self, locale: &str, slug: &str) -> Option<String> {
        if slug.is_empty() || !self.locales.iter().any(|l| l == locale) {
            return None;
        }
        let prefix = self.route_prefix.trim_end_matches('/');
        if locale == self.default_locale {
            Some(format!("{}/{}", prefix, slug))
        } else {
            Some(format!("/{}{}/{}", locale, prefix, slug))
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.draftmill")
}

fn default_budget_secs() -> u64 {
    53
}

fn default_min_margin_secs() -> u64 {
    8
}

fn default_max_units() -> u32 {
    1
}

fn default_sections_per_invocation() -> u32 {
    2
}

fn default_stuck_after_secs() -> u64 {
    3 * 60 * 60
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_fallback_order() -> Vec<String> {
    vec![
        "anthropic".to_string(),
        "gemini".to_string(),
        "openrouter".to_string(),
    ]
}

fn default_request_timeout_secs() -> u64 {
    25
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_per_run_cap() -> u32 {
    3
}

fn default_daily_cap() -> u32 {
    5
}

fn default_min_seo_score() -> f64 {
    50.0
}

fn default_min_words() -> u32 {
    1000
}

fn default_min_internal_links() -> u32 {
    3
}

fn default_min_readability() -> f64 {
    30.0
}

fn default_max_cliche_hits() -> u32 {
    2
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_token_env() -> String {
    "DRAFTMILL_TRIGGER_TOKEN".to_string()
}

fn default_requests_per_minute() -> u32 {
    30
}

fn default_route_prefix() -> String {
    "/blog".to_string()
}

fn default_target_word_count() -> u32 {
    1500
}

impl Config {
    /// Load configuration from the default location (~/.draftmill/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, TOML parsing fails, or
    /// validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.draftmill/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".draftmill").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            pipeline: PipelineConfig::default(),
            llm: LLMConfig::default(),
            publisher: PublisherConfig::default(),
            gate: GateConfig::default(),
            api: ApiConfig::default(),
            sites: vec![SiteConfig {
                id: "main".to_string(),
                name: "Main site".to_string(),
                base_url: "https://example.com".to_string(),
                locales: vec!["en".to_string()],
                default_locale: "en".to_string(),
                route_prefix: default_route_prefix(),
                target_word_count: default_target_word_count(),
                author: "Editorial Team".to_string(),
                internal_links: Vec::new(),
            }],
        }
    }

    /// Find a site by id
    pub fn site(&self, site_id: &str) -> Result<&SiteConfig, EngineError> {
        self.sites
            .iter()
            .find(|s| s.id == site_id)
            .ok_or_else(|| EngineError::UnknownSite(site_id.to_string()))
    }

    /// Validate and process configuration
    ///
    /// Checks value ranges and cross-field constraints, then expands ~ in
    /// the data directory and creates it.
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        self.validate_pipeline()?;
        self.validate_llm()?;
        self.validate_sites()?;

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }

    fn validate_pipeline(&self) -> Result<(), EngineError> {
        if self.pipeline.min_margin_secs == 0 {
            return Err(EngineError::Config(
                "pipeline.min_margin_secs must be at least 1".to_string(),
            ));
        }
        if self.pipeline.budget_secs <= self.pipeline.min_margin_secs {
            return Err(EngineError::Config(format!(
                "pipeline.budget_secs ({}) must be greater than pipeline.min_margin_secs ({})",
                self.pipeline.budget_secs, self.pipeline.min_margin_secs
            )));
        }
        if self.pipeline.max_units_per_invocation == 0 {
            return Err(EngineError::Config(
                "pipeline.max_units_per_invocation must be at least 1".to_string(),
            ));
        }
        if self.pipeline.sections_per_invocation == 0 {
            return Err(EngineError::Config(
                "pipeline.sections_per_invocation must be at least 1".to_string(),
            ));
        }
        if self.publisher.per_run_cap == 0 || self.publisher.daily_cap_per_locale == 0 {
            return Err(EngineError::Config(
                "publisher caps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_llm(&self) -> Result<(), EngineError> {
        let names = std::iter::once(&self.llm.default_provider).chain(&self.llm.fallback_order);
        for name in names {
            name.parse::<ProviderKey>().map_err(|_| {
                EngineError::Config(format!(
                    "Invalid provider '{}'. Must be one of: {}",
                    name,
                    ProviderKey::ALL
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })?;
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_sites(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for site in &self.sites {
            if site.id.trim().is_empty() {
                return Err(EngineError::Config("site id must not be empty".to_string()));
            }
            if !seen.insert(site.id.as_str()) {
                return Err(EngineError::Config(format!(
                    "Duplicate site id '{}'",
                    site.id
                )));
            }
            if !site.locales.contains(&site.default_locale) {
                return Err(EngineError::Config(format!(
                    "Site '{}' default_locale '{}' is not in its locales",
                    site.id, site.default_locale
                )));
            }
        }
        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
