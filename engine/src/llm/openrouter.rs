use super::openai::{chat_completion_request, parse_chat_completion};
use super::{
    Completion, GenerateOptions, Message, ProviderAdapter, ProviderKey, ProviderRequest,
    SecretString,
};
use crate::config::ProviderEndpoint;

/// OpenRouter, OpenAI-compatible with attribution headers
pub struct OpenRouterAdapter {
    app_title: String,
}

impl Default for OpenRouterAdapter {
    fn default() -> Self {
        Self {
            app_title: "Draftmill".to_string(),
        }
    }
}

impl ProviderAdapter for OpenRouterAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::OpenRouter
    }

    fn build_request(
        &self,
        endpoint: &ProviderEndpoint,
        api_key: &SecretString,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> ProviderRequest {
        let mut request = chat_completion_request(endpoint, api_key, model, messages, options);
        request
            .headers
            .push(("X-Title".to_string(), self.app_title.clone()));
        request
    }

    fn parse_response(&self, body: &serde_json::Value, model: &str) -> super::Result<Completion> {
        parse_chat_completion(body, model)
    }
}
