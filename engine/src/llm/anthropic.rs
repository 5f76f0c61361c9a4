use super::{
    Completion, GenerateOptions, LLMError, Message, MessageRole, ProviderAdapter, ProviderKey,
    ProviderRequest, SecretString,
};
use crate::config::ProviderEndpoint;
use serde_json::json;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages API
pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::Anthropic
    }

    fn build_request(
        &self,
        endpoint: &ProviderEndpoint,
        api_key: &SecretString,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> ProviderRequest {
        // System prompts travel in a top-level field, not in the message list
        let mut system_prompt = String::new();
        let mut api_messages = Vec::new();
        for msg in messages {
            if msg.role == MessageRole::System {
                system_prompt.push_str(&msg.content);
                system_prompt.push('\n');
                continue;
            }
            api_messages.push(json!({
                "role": if msg.role == MessageRole::Assistant { "assistant" } else { "user" },
                "content": msg.content
            }));
        }

        let mut body = json!({
            "model": model,
            "max_tokens": options.max_tokens,
            "messages": api_messages,
        });
        if !system_prompt.is_empty() {
            body["system"] = json!(system_prompt.trim_end());
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }

        ProviderRequest {
            url: format!("{}/messages", endpoint.base_url.trim_end_matches('/')),
            headers: vec![
                ("x-api-key".to_string(), api_key.unsecure().to_string()),
                ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body,
        }
    }

    fn parse_response(&self, data: &serde_json::Value, model: &str) -> super::Result<Completion> {
        let content_arr = data
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| LLMError::ParseError("No content array in response".to_string()))?;

        let mut full_content = String::new();
        for item in content_arr {
            if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                full_content.push_str(text);
            }
        }
        if full_content.trim().is_empty() {
            return Err(LLMError::ParseError("Empty content".to_string()));
        }

        let usage = data.get("usage");
        let tokens_used = ["input_tokens", "output_tokens"]
            .iter()
            .filter_map(|k| usage.and_then(|u| u.get(*k)).and_then(|v| v.as_u64()))
            .sum::<u64>();

        Ok(Completion {
            content: full_content,
            tokens_used,
            model: data
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(model)
                .to_string(),
        })
    }
}
