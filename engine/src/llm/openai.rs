use super::{
    Completion, GenerateOptions, LLMError, Message, ProviderAdapter, ProviderKey, ProviderRequest,
    SecretString,
};
use crate::config::ProviderEndpoint;
use serde_json::json;

/// OpenAI chat completions
pub struct OpenAIAdapter;

impl ProviderAdapter for OpenAIAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::OpenAI
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

/// Request in the OpenAI `/chat/completions` shape
///
/// Shared by every OpenAI-compatible provider.
pub(crate) fn chat_completion_request(
    endpoint: &ProviderEndpoint,
    api_key: &SecretString,
    model: &str,
    messages: &[Message],
    options: &GenerateOptions,
) -> ProviderRequest {
    let api_messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|msg| {
            json!({
                "role": msg.role.to_string(),
                "content": msg.content
            })
        })
        .collect();

    let mut body = json!({
        "model": model,
        "messages": api_messages,
        "max_tokens": options.max_tokens,
    });
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }

    ProviderRequest {
        url: format!("{}/chat/completions", endpoint.base_url.trim_end_matches('/')),
        headers: vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", api_key.unsecure()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
        ],
        body,
    }
}

pub(crate) fn parse_chat_completion(
    data: &serde_json::Value,
    requested_model: &str,
) -> super::Result<Completion> {
    let choice = data
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| LLMError::ParseError("No choices in response".to_string()))?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| LLMError::ParseError("Empty content".to_string()))?;

    let tokens_used = data
        .get("usage")
        .and_then(|u| u.get("total_tokens"))
        .and_then(|t| t.as_u64())
        .unwrap_or(0);

    let model = data
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or(requested_model);

    Ok(Completion {
        content: content.to_string(),
        tokens_used,
        model: model.to_string(),
    })
}
