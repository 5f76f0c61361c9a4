//! Trigger API
//!
//! HTTP surface for external schedulers. Each request runs one stateless
//! pipeline invocation and returns its summary.
//!
//! # Endpoints
//!
//! - POST /api/pipeline/trigger - Run one action (requires Bearer token)
//! - GET /api/health - Provider configuration and stuck drafts (requires Bearer token)
//!
//! # Authentication
//!
//! The expected token is read once at startup from the environment variable
//! named by `api.token_env`. When it is unset every request is refused.
//!
//! # Rate limiting
//!
//! Requests are counted per client: the `X-Client-Id` header when present,
//! otherwise a hash of the bearer token. Counts live in the store so several
//! server processes share them.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use draftmill_engine::rate_limiter::{token_source, RateLimiter};
use draftmill_engine::services::Services;
use sdk::errors::ErrorExt;
use sdk::{EngineError, TriggerRequest};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// State shared across handlers
#[derive(Clone)]
pub struct ApiState {
    services: Arc<Services>,
    limiter: RateLimiter,
    token_digest: Option<[u8; 32]>,
}

impl ApiState {
    pub fn new(services: Arc<Services>, token: Option<String>) -> Self {
        let limiter = RateLimiter::per_minute(
            services.database.pool().clone(),
            services.clock.clone(),
            services.config.api.requests_per_minute,
        );
        let token_digest = token.filter(|t| !t.is_empty()).map(|t| digest(&t));

        if token_digest.is_none() {
            tracing::warn!(
                token_env = %services.config.api.token_env,
                "Trigger token not set; all requests will be refused"
            );
        }

        Self {
            services,
            limiter,
            token_digest,
        }
    }

    /// Read the expected token from the configured environment variable
    pub fn from_env(services: Arc<Services>) -> Self {
        let token = std::env::var(&services.config.api.token_env).ok();
        Self::new(services, token)
    }

    /// Authenticate, then charge the request to its client
    async fn admit(&self, headers: &HeaderMap) -> Result<(), Response> {
        let token = headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| error_response(&EngineError::Unauthorized))?;

        match &self.token_digest {
            Some(expected) if *expected == digest(token) => {}
            _ => return Err(error_response(&EngineError::Unauthorized)),
        }

        let source = headers
            .get(CLIENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| format!("client:{}", v))
            .unwrap_or_else(|| token_source(token));

        self.limiter.acquire(&source).await.map_err(|e| {
            match e.downcast::<EngineError>() {
                Ok(engine_err) => error_response(&engine_err),
                Err(other) => {
                    tracing::error!(error = %format!("{:#}", other), "Rate limiter failed");
                    error_response(&EngineError::Database(other.to_string()))
                }
            }
        })
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

/// Build the router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/pipeline/trigger", post(trigger_handler))
        .route("/api/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C
pub async fn serve(state: ApiState) -> anyhow::Result<()> {
    let bind = state.services.config.api.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| EngineError::Network(format!("Failed to bind to {}: {}", bind, e)))?;

    tracing::info!("Trigger API listening on http://{}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Trigger API shutting down gracefully");
        })
        .await?;

    Ok(())
}

/// Run one pipeline invocation
async fn trigger_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, Response> {
    state.admit(&headers).await?;

    let request: TriggerRequest = serde_json::from_slice(&body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": format!("Invalid request body: {}", e) })),
        )
            .into_response()
    })?;

    let runner = state
        .services
        .runner()
        .map_err(|e| error_response(&EngineError::Config(format!("{:#}", e))))?;

    match runner.run(&request).await {
        Ok(summary) => Ok(Json(summary.to_response()).into_response()),
        Err(e) => Err(error_response(&e)),
    }
}

/// Provider configuration health and stuck drafts
async fn health_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    state.admit(&headers).await?;

    let runner = state
        .services
        .runner()
        .map_err(|e| error_response(&EngineError::Config(format!("{:#}", e))))?;
    let report = runner.health_report().await.map_err(|e| error_response(&e))?;

    Ok(Json(report).into_response())
}

fn status_for(error: &EngineError) -> StatusCode {
    match error {
        EngineError::Unauthorized => StatusCode::UNAUTHORIZED,
        EngineError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        EngineError::Config(_) | EngineError::UnknownSite(_) | EngineError::UnknownAction(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &EngineError) -> Response {
    let status = status_for(error);
    if status.is_server_error() {
        tracing::error!(error = %error, "Trigger request failed");
    }
    (
        status,
        Json(json!({
            "success": false,
            "error": error.to_string(),
            "hint": error.user_hint(),
        })),
    )
        .into_response()
}
