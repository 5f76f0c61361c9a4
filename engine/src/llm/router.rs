//! AI Provider Router
//!
//! Walks an ordered provider chain until one provider answers. The chain is
//! `[preferred, ...fallback_order without preferred]`. Providers without a
//! credential are skipped, failures are recorded and the next provider is
//! tried. The router never returns an error to its caller: exhaustion comes
//! back as a structured `GenerationFailure` that the pipeline treats as a
//! recoverable phase failure.
//!
//! Routing for a task type is read from the `provider_routes` table on every
//! call so operators can re-route without restarting anything.

use super::{
    AdapterRegistry, CredentialSource, GenerateOptions, LLMError, Message, ProviderKey,
};
use crate::config::LLMConfig;
use crate::db::ProviderRouteRepository;
use crate::pipeline::TextGenerator;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One provider attempt that did not produce content
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: String,
}

/// A provider answered
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationSuccess {
    pub content: String,
    pub provider: ProviderKey,
    pub model: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub response_time_ms: u64,
    /// Providers that failed before this one answered
    pub failures: Vec<ProviderFailure>,
}

/// No provider answered
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerationFailure {
    pub failures: Vec<ProviderFailure>,
    pub skipped: Vec<ProviderKey>,
    /// Nothing could be attempted because no provider had a credential
    pub no_provider_configured: bool,
}

impl GenerationFailure {
    /// Human-readable cause suitable for `last_error`
    pub fn describe(&self) -> String {
        if self.no_provider_configured {
            return "no AI provider configured".to_string();
        }
        let attempts = self
            .failures
            .iter()
            .map(|f| format!("{}: {}", f.provider, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        format!("all AI providers failed ({})", attempts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerationResult {
    Success(GenerationSuccess),
    Failure(GenerationFailure),
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResult::Success(_))
    }
}

/// Build `[preferred, ...fallback_order \ preferred]` without duplicates
pub fn provider_order(preferred: ProviderKey, fallback_order: &[ProviderKey]) -> Vec<ProviderKey> {
    let mut order = vec![preferred];
    for key in fallback_order {
        if !order.contains(key) {
            order.push(*key);
        }
    }
    order
}

/// Router over the registered provider adapters
pub struct ProviderRouter {
    config: Arc<LLMConfig>,
    registry: AdapterRegistry,
    credentials: Arc<dyn CredentialSource>,
    routes: Option<ProviderRouteRepository>,
    client: reqwest::Client,
}

impl ProviderRouter {
    pub fn new(config: Arc<LLMConfig>, credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            config,
            registry: AdapterRegistry::standard(),
            credentials,
            routes: None,
            client: reqwest::Client::new(),
        }
    }

    /// Read per-task routes from the store on every `generate` call
    pub fn with_routes(mut self, routes: ProviderRouteRepository) -> Self {
        self.routes = Some(routes);
        self
    }

    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Providers that currently have a credential
    pub fn configured_providers(&self) -> Vec<ProviderKey> {
        ProviderKey::ALL
            .into_iter()
            .filter(|k| self.credentials.has_credential(*k))
            .collect()
    }

    fn configured_fallback_order(&self) -> (Vec<ProviderKey>, Vec<ProviderFailure>) {
        let mut keys = Vec::new();
        let mut unknown = Vec::new();
        for name in &self.config.fallback_order {
            match name.parse::<ProviderKey>() {
                Ok(key) => keys.push(key),
                Err(e) => unknown.push(ProviderFailure {
                    provider: name.clone(),
                    error: e.to_string(),
                }),
            }
        }
        (keys, unknown)
    }

    /// Generate for a task type using its stored route
    ///
    /// The route's primary provider is preferred and its fallback is tried
    /// next, followed by the configured fallback order. The route's model
    /// only applies to the primary provider. Without a route the configured
    /// default provider is preferred.
    pub async fn generate_for_task(
        &self,
        task_type: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> GenerationResult {
        let route = match &self.routes {
            Some(repo) => match repo.get(task_type).await {
                Ok(route) => route,
                Err(e) => {
                    tracing::warn!(task_type, error = %e, "Failed to read provider route, using defaults");
                    None
                }
            },
            None => None,
        };

        let (mut fallback, mut failures) = self.configured_fallback_order();
        let mut options = options.clone();

        let preferred_name = match &route {
            Some(route) => {
                if let Some(fallback_name) = &route.fallback_provider {
                    match fallback_name.parse::<ProviderKey>() {
                        Ok(key) => fallback.insert(0, key),
                        Err(e) => failures.push(ProviderFailure {
                            provider: fallback_name.clone(),
                            error: e.to_string(),
                        }),
                    }
                }
                if route.model.is_some() {
                    options.model = route.model.clone();
                }
                route.primary_provider.clone()
            }
            None => self.config.default_provider.clone(),
        };

        tracing::debug!(task_type, preferred = %preferred_name, "Resolved provider route");

        let chain = match preferred_name.parse::<ProviderKey>() {
            Ok(preferred) => provider_order(preferred, &fallback),
            Err(e) => {
                failures.push(ProviderFailure {
                    provider: preferred_name.clone(),
                    error: e.to_string(),
                });
                // The chain's first entry receives the model override; an
                // unusable primary means no provider is entitled to it
                options.model = None;
                let mut order = Vec::new();
                for key in fallback {
                    if !order.contains(&key) {
                        order.push(key);
                    }
                }
                order
            }
        };

        self.run_chain(&chain, messages, &options, failures).await
    }

    /// Call providers in `[preferred, ...fallback_order]` order until one answers
    pub async fn generate_with_fallback(
        &self,
        preferred: ProviderKey,
        messages: &[Message],
        options: &GenerateOptions,
        fallback_order: &[ProviderKey],
    ) -> GenerationResult {
        let chain = provider_order(preferred, fallback_order);
        self.run_chain(&chain, messages, options, Vec::new()).await
    }

    async fn run_chain(
        &self,
        chain: &[ProviderKey],
        messages: &[Message],
        options: &GenerateOptions,
        mut failures: Vec<ProviderFailure>,
    ) -> GenerationResult {
        let mut skipped = Vec::new();
        let mut attempted = 0usize;

        for (position, key) in chain.iter().enumerate() {
            let Some(api_key) = self.credentials.credential(*key) else {
                tracing::debug!(provider = %key, "Skipping provider without credential");
                skipped.push(*key);
                continue;
            };
            let Some(adapter) = self.registry.get(*key) else {
                failures.push(ProviderFailure {
                    provider: key.to_string(),
                    error: "no adapter registered".to_string(),
                });
                continue;
            };

            attempted += 1;
            let endpoint = self.config.endpoint(*key);
            let model = match (&options.model, position) {
                (Some(model), 0) => model.clone(),
                _ => endpoint.model.clone(),
            };
            let request = adapter.build_request(endpoint, &api_key, &model, messages, options);

            tracing::debug!(provider = %key, model = %model, "Attempting provider");
            let started = Instant::now();

            match self.send(request).await.and_then(|body| adapter.parse_response(&body, &model)) {
                Ok(completion) => {
                    let response_time_ms = started.elapsed().as_millis() as u64;
                    tracing::info!(
                        provider = %key,
                        model = %completion.model,
                        tokens = completion.tokens_used,
                        response_time_ms,
                        "Provider succeeded"
                    );
                    return GenerationResult::Success(GenerationSuccess {
                        cost: adapter.cost(endpoint, completion.tokens_used),
                        content: completion.content,
                        provider: *key,
                        model: completion.model,
                        tokens_used: completion.tokens_used,
                        response_time_ms,
                        failures,
                    });
                }
                Err(e) => {
                    tracing::warn!(provider = %key, error = %e, "Provider failed");
                    failures.push(ProviderFailure {
                        provider: key.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let no_provider_configured = attempted == 0 && !skipped.is_empty();
        if no_provider_configured {
            tracing::error!("No AI provider has a credential configured");
        } else {
            tracing::error!(attempted, "All AI providers exhausted");
        }

        GenerationResult::Failure(GenerationFailure {
            failures,
            skipped,
            no_provider_configured,
        })
    }

    async fn send(&self, request: super::ProviderRequest) -> super::Result<serde_json::Value> {
        let timeout_secs = self.config.request_timeout_secs;

        let call = async {
            let mut builder = self.client.post(&request.url).json(&request.body);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let response = builder
                .send()
                .await
                .map_err(|e| LLMError::NetworkError(e.without_url().to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(LLMError::from_status(status.as_u16(), truncate(&text, 300)));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| LLMError::ParseError(e.without_url().to_string()))
        };

        tokio::time::timeout(Duration::from_secs(timeout_secs), call)
            .await
            .map_err(|_| LLMError::Timeout(timeout_secs))?
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

#[async_trait]
impl TextGenerator for ProviderRouter {
    async fn generate(
        &self,
        task_type: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> GenerationResult {
        self.generate_for_task(task_type, messages, options).await
    }

    fn configured_providers(&self) -> Vec<ProviderKey> {
        ProviderRouter::configured_providers(self)
    }
}
