/// Provider routing table
///
/// Maps a task type (research, outline, ...) to a primary provider, an
/// optional fallback and an optional model override. The router reads this
/// table on every call, so edits apply to the next generation without a
/// restart.
use anyhow::{Context, Result};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Stored route
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderRoute {
    pub task_type: String,
    pub primary_provider: String,
    pub fallback_provider: Option<String>,
    pub model: Option<String>,
    pub updated_at: i64,
}

impl ProviderRoute {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let primary_provider: String = row.try_get("primary_provider")?;
        if primary_provider.trim().is_empty() {
            return Err(EngineError::InvalidStoredValue {
                field: "provider_routes.primary_provider".to_string(),
                value: primary_provider,
            }
            .into());
        }
        Ok(Self {
            task_type: row.try_get("task_type")?,
            primary_provider,
            fallback_provider: row.try_get("fallback_provider")?,
            model: row.try_get("model")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Clone)]
pub struct ProviderRouteRepository {
    pool: SqlitePool,
}

impl ProviderRouteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, task_type: &str) -> Result<Option<ProviderRoute>> {
        let row = sqlx::query(
            "SELECT task_type, primary_provider, fallback_provider, model, updated_at
             FROM provider_routes WHERE task_type = ?",
        )
        .bind(task_type)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch provider route")?;

        row.as_ref().map(ProviderRoute::from_row).transpose()
    }

    /// Insert or replace the route for a task type
    pub async fn upsert(&self, route: &ProviderRoute) -> Result<()> {
        sqlx::query(
            "INSERT INTO provider_routes (task_type, primary_provider, fallback_provider, model, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(task_type) DO UPDATE SET
                 primary_provider = excluded.primary_provider,
                 fallback_provider = excluded.fallback_provider,
                 model = excluded.model,
                 updated_at = excluded.updated_at",
        )
        .bind(&route.task_type)
        .bind(&route.primary_provider)
        .bind(&route.fallback_provider)
        .bind(&route.model)
        .bind(route.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert provider route")?;

        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ProviderRoute>> {
        let rows = sqlx::query(
            "SELECT task_type, primary_provider, fallback_provider, model, updated_at
             FROM provider_routes ORDER BY task_type",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list provider routes")?;

        rows.iter().map(ProviderRoute::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upsert_replaces_existing_route() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let repo = db.routes();

        assert!(repo.get("research").await.unwrap().is_none());

        let mut route = ProviderRoute {
            task_type: "research".to_string(),
            primary_provider: "openai".to_string(),
            fallback_provider: Some("anthropic".to_string()),
            model: None,
            updated_at: 1,
        };
        repo.upsert(&route).await.unwrap();

        route.primary_provider = "gemini".to_string();
        route.model = Some("gemini-1.5-pro".to_string());
        route.updated_at = 2;
        repo.upsert(&route).await.unwrap();

        let stored = repo.get("research").await.unwrap().unwrap();
        assert_eq!(stored, route);
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}
