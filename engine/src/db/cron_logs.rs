/// Audit log persistence
///
/// Every runner invocation appends exactly one row. Rows are never updated.
use anyhow::{Context, Result};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Outcome of one invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Partial,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }

    /// Classify a run from its item counts
    ///
    /// A run with no failures is a success even when it processed nothing.
    /// A run where every processed item failed is failed; anything mixed is
    /// partial.
    pub fn from_counts(succeeded: u32, failed: u32) -> Self {
        match (succeeded, failed) {
            (_, 0) => JobStatus::Success,
            (0, _) => JobStatus::Failed,
            _ => JobStatus::Partial,
        }
    }
}

impl FromStr for JobStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(JobStatus::Success),
            "partial" => Ok(JobStatus::Partial),
            "failed" => Ok(JobStatus::Failed),
            other => Err(EngineError::InvalidStoredValue {
                field: "cron_job_logs.status".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Row to append
#[derive(Debug, Clone)]
pub struct NewCronJobLog {
    pub job_name: String,
    pub status: JobStatus,
    pub started_at: i64,
    pub duration_ms: i64,
    pub items_processed: i64,
    pub items_succeeded: i64,
    pub items_failed: i64,
    pub result_summary: serde_json::Value,
}

/// Stored audit row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobLog {
    pub id: i64,
    pub job_name: String,
    pub status: JobStatus,
    pub started_at: i64,
    pub duration_ms: i64,
    pub items_processed: i64,
    pub items_succeeded: i64,
    pub items_failed: i64,
    pub result_summary: Option<serde_json::Value>,
}

impl CronJobLog {
    /// Convert a row, validating the status column and summary JSON
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.try_get("status")?;
        let summary: Option<String> = row.try_get("result_summary")?;
        Ok(Self {
            id: row.try_get("id")?,
            job_name: row.try_get("job_name")?,
            status: status.parse()?,
            started_at: row.try_get("started_at")?,
            duration_ms: row.try_get("duration_ms")?,
            items_processed: row.try_get("items_processed")?,
            items_succeeded: row.try_get("items_succeeded")?,
            items_failed: row.try_get("items_failed")?,
            result_summary: summary
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .context("Invalid result_summary JSON")?,
        })
    }
}

/// Audit log repository
#[derive(Clone)]
pub struct CronJobLogRepository {
    pool: SqlitePool,
}

impl CronJobLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a row and return its id
    pub async fn append(&self, entry: &NewCronJobLog) -> Result<i64> {
        let summary = serde_json::to_string(&entry.result_summary)?;

        let result = sqlx::query(
            "INSERT INTO cron_job_logs
             (job_name, status, started_at, duration_ms, items_processed, items_succeeded, items_failed, result_summary)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.job_name)
        .bind(entry.status.as_str())
        .bind(entry.started_at)
        .bind(entry.duration_ms)
        .bind(entry.items_processed)
        .bind(entry.items_succeeded)
        .bind(entry.items_failed)
        .bind(summary)
        .execute(&self.pool)
        .await
        .context("Failed to append cron job log")?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent rows first
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<CronJobLog>> {
        let rows = sqlx::query(
            "SELECT id, job_name, status, started_at, duration_ms, items_processed,
                    items_succeeded, items_failed, result_summary
             FROM cron_job_logs
             ORDER BY started_at DESC, id DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list cron job logs")?;

        rows.iter().map(CronJobLog::from_row).collect()
    }

    /// Most recent row for a job name
    pub async fn latest_for(&self, job_name: &str) -> Result<Option<CronJobLog>> {
        let row = sqlx::query(
            "SELECT id, job_name, status, started_at, duration_ms, items_processed,
                    items_succeeded, items_failed, result_summary
             FROM cron_job_logs
             WHERE job_name = ?
             ORDER BY started_at DESC, id DESC
             LIMIT 1",
        )
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest cron job log")?;

        row.as_ref().map(CronJobLog::from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_status_from_counts() {
        assert_eq!(JobStatus::from_counts(0, 0), JobStatus::Success);
        assert_eq!(JobStatus::from_counts(3, 0), JobStatus::Success);
        assert_eq!(JobStatus::from_counts(2, 1), JobStatus::Partial);
        assert_eq!(JobStatus::from_counts(0, 2), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_append_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let repo = db.cron_logs();

        for (i, name) in ["pipeline.advance", "pipeline.publish"].iter().enumerate() {
            repo.append(&NewCronJobLog {
                job_name: name.to_string(),
                status: JobStatus::Success,
                started_at: 1_000 + i as i64,
                duration_ms: 12,
                items_processed: 1,
                items_succeeded: 1,
                items_failed: 0,
                result_summary: json!({ "deferred": 0 }),
            })
            .await
            .unwrap();
        }

        let logs = repo.list_recent(10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].job_name, "pipeline.publish");
        assert_eq!(logs[1].result_summary, Some(json!({ "deferred": 0 })));

        let latest = repo.latest_for("pipeline.advance").await.unwrap().unwrap();
        assert_eq!(latest.started_at, 1_000);
    }
}
