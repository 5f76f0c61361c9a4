//! Trigger API tests driven through the router with `oneshot`

use api_server::{router, ApiState};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use draftmill_engine::clock::ManualClock;
use draftmill_engine::config::Config;
use draftmill_engine::db::Database;
use draftmill_engine::llm::StaticCredentials;
use draftmill_engine::services::Services;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const TOKEN: &str = "test-trigger-token";

async fn app(requests_per_minute: u32, credentials: StaticCredentials) -> (TempDir, Router) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("api.db")).await.unwrap();

    let mut config = Config::default_config();
    config.api.requests_per_minute = requests_per_minute;

    let services = Services::with_parts(
        db,
        config,
        Arc::new(credentials),
        Arc::new(ManualClock::new(1_710_084_600_000)),
    );
    let state = ApiState::new(Arc::new(services), Some(TOKEN.to_string()));
    (temp_dir, router(state))
}

fn trigger(body: Value, token: Option<&str>, client: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/pipeline/trigger")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    if let Some(client) = client {
        builder = builder.header("X-Client-Id", client);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let (_dir, app) = app(10, StaticCredentials::new()).await;

    let response = app
        .oneshot(trigger(json!({ "action": "health" }), None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_token_is_unauthorized() {
    let (_dir, app) = app(10, StaticCredentials::new()).await;

    let response = app
        .oneshot(trigger(json!({ "action": "health" }), Some("guess"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_create_returns_summary() {
    let (_dir, app) = app(10, StaticCredentials::new()).await;

    let response = app
        .oneshot(trigger(
            json!({
                "action": "create",
                "siteId": "main",
                "locale": "en",
                "keywords": ["hiking boots", "trail maps", "  "]
            }),
            Some(TOKEN),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["processed"], 3);
    assert_eq!(body["succeeded"], 2);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["deferred"], 0);
    assert!(body.get("durationMs").is_some());
}

#[tokio::test]
async fn test_advance_without_provider_reports_blocker() {
    let (_dir, app) = app(10, StaticCredentials::new()).await;

    let response = app
        .oneshot(trigger(json!({ "action": "advance" }), Some(TOKEN), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["processed"], 0);
}

#[tokio::test]
async fn test_unknown_site_is_bad_request() {
    let (_dir, app) = app(10, StaticCredentials::new()).await;

    let response = app
        .oneshot(trigger(
            json!({ "action": "advance", "siteId": "elsewhere" }),
            Some(TOKEN),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let (_dir, app) = app(10, StaticCredentials::new()).await;

    let response = app
        .oneshot(trigger(json!({ "action": "explode" }), Some(TOKEN), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rate_limited_per_client() {
    let (_dir, app) = app(2, StaticCredentials::new()).await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(trigger(json!({ "action": "health" }), Some(TOKEN), Some("cron-a")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let limited = app
        .clone()
        .oneshot(trigger(json!({ "action": "health" }), Some(TOKEN), Some("cron-a")))
        .await
        .unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

    // Another client has its own allowance
    let other = app
        .oneshot(trigger(json!({ "action": "health" }), Some(TOKEN), Some("cron-b")))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, app) = app(10, StaticCredentials::new().with(
        draftmill_engine::llm::ProviderKey::Anthropic,
        "sk-test",
    ))
    .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header("Authorization", format!("Bearer {}", TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["configured_providers"], json!(["anthropic"]));
    assert_eq!(body["stuck"], json!([]));
}
