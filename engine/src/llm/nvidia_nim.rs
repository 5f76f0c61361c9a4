use super::openai::{chat_completion_request, parse_chat_completion};
use super::{
    Completion, GenerateOptions, Message, ProviderAdapter, ProviderKey, ProviderRequest,
    SecretString,
};
use crate::config::ProviderEndpoint;

/// NVIDIA NIM, which speaks the OpenAI chat completions protocol
pub struct NvidiaNimAdapter;

impl ProviderAdapter for NvidiaNimAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::NvidiaNim
    }

    fn build_request(
        &self,
        endpoint: &ProviderEndpoint,
        api_key: &SecretString,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> ProviderRequest {
        chat_completion_request(endpoint, api_key, model, messages, options)
    }

    fn parse_response(&self, body: &serde_json::Value, model: &str) -> super::Result<Completion> {
        parse_chat_completion(body, model)
    }
}
