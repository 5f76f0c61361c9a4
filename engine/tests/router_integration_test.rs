//! Integration tests for the provider router
//!
//! Validates the fallback chain against mock provider APIs

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use draftmill_engine::config::LLMConfig;
use draftmill_engine::db::{Database, ProviderRoute};
use draftmill_engine::llm::{
    GenerateOptions, GenerationResult, Message, ProviderKey, ProviderRouter, StaticCredentials,
};

const GEMINI_PATH: &str = "/gemini/models/gemini-1.5-flash:generateContent";

/// Point every adapter at its own prefix on the mock server
fn config_for(server: &MockServer) -> LLMConfig {
    let mut config = LLMConfig::default();
    config.openai.base_url = format!("{}/openai", server.uri());
    config.anthropic.base_url = format!("{}/anthropic", server.uri());
    config.gemini.base_url = format!("{}/gemini", server.uri());
    config.request_timeout_secs = 5;
    config
}

fn all_credentials() -> StaticCredentials {
    StaticCredentials::new()
        .with(ProviderKey::OpenAI, "sk-openai")
        .with(ProviderKey::Anthropic, "sk-anthropic")
        .with(ProviderKey::Gemini, "gemini-key")
}

async fn mount_failure(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string("upstream unavailable"))
        .mount(server)
        .await;
}

async fn mount_gemini_success(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(GEMINI_PATH))
        .and(header("x-goog-api-key", "gemini-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Pack light, "}, {"text": "layer well."}]}
            }],
            "usageMetadata": {"totalTokenCount": 42}
        })))
        .mount(server)
        .await;
}

fn messages() -> Vec<Message> {
    vec![
        Message::system("You are a travel editor."),
        Message::user("One tip for hikers"),
    ]
}

#[tokio::test]
async fn test_falls_back_until_a_provider_answers() {
    let server = MockServer::start().await;
    mount_failure(&server, "/openai/chat/completions", 500).await;
    mount_failure(&server, "/anthropic/messages", 500).await;
    mount_gemini_success(&server).await;

    let router = ProviderRouter::new(Arc::new(config_for(&server)), Arc::new(all_credentials()));

    let result = router
        .generate_with_fallback(
            ProviderKey::OpenAI,
            &messages(),
            &GenerateOptions::default(),
            &[ProviderKey::Anthropic, ProviderKey::Gemini],
        )
        .await;

    let GenerationResult::Success(success) = result else {
        panic!("expected the gemini fallback to answer");
    };
    assert_eq!(success.provider, ProviderKey::Gemini);
    assert_eq!(success.content, "Pack light, layer well.");
    assert_eq!(success.tokens_used, 42);

    // Exactly the two failed attempts are recorded, in chain order
    assert_eq!(success.failures.len(), 2);
    assert_eq!(success.failures[0].provider, "openai");
    assert_eq!(success.failures[1].provider, "anthropic");
    assert!(success.failures[0].error.contains("500"));
}

#[tokio::test]
async fn test_slow_provider_times_out_and_falls_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"choices": []}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    mount_gemini_success(&server).await;

    let mut config = config_for(&server);
    config.request_timeout_secs = 1;
    let router = ProviderRouter::new(Arc::new(config), Arc::new(all_credentials()));

    let result = router
        .generate_with_fallback(
            ProviderKey::OpenAI,
            &messages(),
            &GenerateOptions::default(),
            &[ProviderKey::Gemini],
        )
        .await;

    let GenerationResult::Success(success) = result else {
        panic!("expected gemini to answer after the timeout");
    };
    assert_eq!(success.provider, ProviderKey::Gemini);
    assert_eq!(success.failures.len(), 1);
    assert_eq!(success.failures[0].provider, "openai");
    assert!(success.failures[0].error.contains("Timeout after 1s"));
}

#[tokio::test]
async fn test_providers_without_credentials_are_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/chat/completions"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    mount_gemini_success(&server).await;

    let credentials = StaticCredentials::new().with(ProviderKey::Gemini, "gemini-key");
    let router = ProviderRouter::new(Arc::new(config_for(&server)), Arc::new(credentials));

    let result = router
        .generate_with_fallback(
            ProviderKey::OpenAI,
            &messages(),
            &GenerateOptions::default(),
            &[ProviderKey::Anthropic, ProviderKey::Gemini],
        )
        .await;

    match result {
        GenerationResult::Success(success) => {
            assert_eq!(success.provider, ProviderKey::Gemini);
            assert!(success.failures.is_empty());
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn test_exhaustion_is_a_structured_failure() {
    let server = MockServer::start().await;
    mount_failure(&server, "/openai/chat/completions", 503).await;
    mount_failure(&server, "/anthropic/messages", 429).await;
    mount_failure(&server, GEMINI_PATH, 500).await;

    let router = ProviderRouter::new(Arc::new(config_for(&server)), Arc::new(all_credentials()));

    let result = router
        .generate_with_fallback(
            ProviderKey::OpenAI,
            &messages(),
            &GenerateOptions::default(),
            &[ProviderKey::Anthropic, ProviderKey::Gemini],
        )
        .await;

    let GenerationResult::Failure(failure) = result else {
        panic!("expected every provider to fail");
    };
    assert!(!failure.no_provider_configured);
    assert_eq!(failure.failures.len(), 3);
    assert_eq!(
        failure
            .failures
            .iter()
            .map(|f| f.provider.as_str())
            .collect::<Vec<_>>(),
        vec!["openai", "anthropic", "gemini"]
    );
    assert!(failure.describe().starts_with("all AI providers failed"));
}

#[tokio::test]
async fn test_no_credentials_reports_configuration_failure() {
    let server = MockServer::start().await;
    let router = ProviderRouter::new(
        Arc::new(config_for(&server)),
        Arc::new(StaticCredentials::new()),
    );

    let result = router
        .generate_with_fallback(
            ProviderKey::OpenAI,
            &messages(),
            &GenerateOptions::default(),
            &[ProviderKey::Anthropic],
        )
        .await;

    let GenerationResult::Failure(failure) = result else {
        panic!("nothing should answer without credentials");
    };
    assert!(failure.no_provider_configured);
    assert!(failure.failures.is_empty());
    assert_eq!(failure.describe(), "no AI provider configured");
}

#[tokio::test]
async fn test_stored_route_overrides_defaults() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/anthropic/messages"))
        .and(body_partial_json(json!({ "model": "claude-outline" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "[\"Gear\", \"Routes\", \"Safety\"]"}],
            "usage": {"input_tokens": 30, "output_tokens": 12}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("routes.db")).await.unwrap();
    db.routes()
        .upsert(&ProviderRoute {
            task_type: "outline".to_string(),
            primary_provider: "anthropic".to_string(),
            fallback_provider: None,
            model: Some("claude-outline".to_string()),
            updated_at: 0,
        })
        .await
        .unwrap();

    let router = ProviderRouter::new(Arc::new(config_for(&server)), Arc::new(all_credentials()))
        .with_routes(db.routes());

    let result = router
        .generate_for_task("outline", &messages(), &GenerateOptions::default())
        .await;

    match result {
        GenerationResult::Success(success) => {
            assert_eq!(success.provider, ProviderKey::Anthropic);
            assert_eq!(success.tokens_used, 42);
            assert!(success.failures.is_empty());
        }
        other => panic!("expected the routed provider to answer, got {:?}", other),
    }
}
