//! Rate limiting module
//!
//! Limits how often a client may hit the trigger API. Requests are tracked
//! per source (the `X-Client-Id` header, or a hash of the bearer token) in
//! the `rate_limits` table so overlapping server processes share one view.
//!
//! A source may make at most `limit` requests in any sliding `window`.
//! Entries older than the window are removed whenever a request is recorded.

use anyhow::{Context, Result};
use sdk::errors::EngineError;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::Clock;

/// Rate-limit source for a caller that sent no client id
///
/// The token itself is never stored.
pub fn token_source(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("token:{}", &hex::encode(digest)[..16])
}

/// Persisted sliding-window rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>, limit: u32, window: Duration) -> Self {
        Self {
            pool,
            clock,
            limit,
            window,
        }
    }

    /// Limiter allowing `requests_per_minute` per source
    pub fn per_minute(pool: SqlitePool, clock: Arc<dyn Clock>, requests_per_minute: u32) -> Self {
        Self::new(pool, clock, requests_per_minute, Duration::from_secs(60))
    }

    fn window_ms(&self) -> i64 {
        self.window.as_millis() as i64
    }

    /// Check whether `source` may make another request
    pub async fn check_limit(&self, source: &str) -> Result<()> {
        let now = self.clock.now_millis();
        let count = self.count_requests(source, now - self.window_ms()).await?;
        debug!(source, count, limit = self.limit, "Rate limit check");

        if count >= i64::from(self.limit) {
            return Err(self.exceeded(source, count));
        }
        Ok(())
    }

    fn exceeded(&self, source: &str, count: i64) -> anyhow::Error {
        warn!(source, count, limit = self.limit, "Rate limit exceeded");
        EngineError::RateLimitExceeded {
            src: source.to_string(),
            count,
            limit: i64::from(self.limit),
            window: format!("{}s", self.window.as_secs()),
        }
        .into()
    }

    /// Record a request and drop entries that fell out of the window
    pub async fn record_request(&self, source: &str) -> Result<()> {
        let now = self.clock.now_millis();

        sqlx::query("INSERT INTO rate_limits (source, timestamp) VALUES (?, ?)")
            .bind(source)
            .bind(now)
            .execute(&self.pool)
            .await
            .context("Failed to record request")?;

        self.cleanup_old_entries(now).await
    }

    /// Record a request for `source` if it is under the limit
    ///
    /// The count and the insert are one statement, so concurrent callers
    /// cannot both take the last slot in the window.
    pub async fn acquire(&self, source: &str) -> Result<()> {
        let now = self.clock.now_millis();
        let since = now - self.window_ms();

        let result = sqlx::query(
            "INSERT INTO rate_limits (source, timestamp)
             SELECT ?, ?
             WHERE (SELECT COUNT(*) FROM rate_limits WHERE source = ? AND timestamp > ?) < ?",
        )
        .bind(source)
        .bind(now)
        .bind(source)
        .bind(since)
        .bind(i64::from(self.limit))
        .execute(&self.pool)
        .await
        .context("Failed to record request")?;

        if result.rows_affected() == 0 {
            let count = self.count_requests(source, since).await?;
            return Err(self.exceeded(source, count));
        }
        debug!(source, limit = self.limit, "Request admitted");

        self.cleanup_old_entries(now).await
    }

    async fn count_requests(&self, source: &str, since: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rate_limits WHERE source = ? AND timestamp > ?")
                .bind(source)
                .bind(since)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count requests")?;

        Ok(count)
    }

    async fn cleanup_old_entries(&self, now: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE timestamp <= ?")
            .bind(now - self.window_ms())
            .execute(&self.pool)
            .await
            .context("Failed to clean up old entries")?;

        if result.rows_affected() > 0 {
            debug!(removed = result.rows_affected(), "Cleaned up old rate limit entries");
        }
        Ok(())
    }
}
