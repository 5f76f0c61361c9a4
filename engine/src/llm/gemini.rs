use super::{
    Completion, GenerateOptions, LLMError, Message, MessageRole, ProviderAdapter, ProviderKey,
    ProviderRequest, SecretString,
};
use crate::config::ProviderEndpoint;
use serde_json::json;

/// Google Gemini `generateContent`
pub struct GeminiAdapter;

impl ProviderAdapter for GeminiAdapter {
    fn key(&self) -> ProviderKey {
        ProviderKey::Gemini
    }

    fn build_request(
        &self,
        endpoint: &ProviderEndpoint,
        api_key: &SecretString,
        model: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> ProviderRequest {
        let mut contents = Vec::new();
        let mut system_instruction = None;

        for msg in messages {
            if msg.role == MessageRole::System {
                system_instruction = Some(json!({
                    "parts": [{"text": msg.content}]
                }));
                continue;
            }

            contents.push(json!({
                "role": if msg.role == MessageRole::Assistant { "model" } else { "user" },
                "parts": [{"text": msg.content}]
            }));
        }

        let mut generation_config = json!({ "maxOutputTokens": options.max_tokens });
        if let Some(temperature) = options.temperature {
            generation_config["temperature"] = json!(temperature);
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if let Some(sys) = system_instruction {
            body["systemInstruction"] = sys;
        }

        // The key goes in a header so it never lands in a logged URL
        ProviderRequest {
            url: format!(
                "{}/models/{}:generateContent",
                endpoint.base_url.trim_end_matches('/'),
                model
            ),
            headers: vec![
                ("x-goog-api-key".to_string(), api_key.unsecure().to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body,
        }
    }

    fn parse_response(&self, data: &serde_json::Value, model: &str) -> super::Result<Completion> {
        let parts = data
            .get("candidates")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
            .ok_or_else(|| LLMError::ParseError("No candidate parts in response".to_string()))?;

        let mut full_text = String::new();
        for part in parts {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                full_text.push_str(text);
            }
        }
        if full_text.trim().is_empty() {
            return Err(LLMError::ParseError("Empty content".to_string()));
        }

        let tokens_used = data
            .get("usageMetadata")
            .and_then(|u| u.get("totalTokenCount"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0);

        Ok(Completion {
            content: full_text,
            tokens_used,
            model: model.to_string(),
        })
    }
}
