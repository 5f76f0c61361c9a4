/// Draft persistence operations
///
/// Every write that changes a draft's phase is a compare-and-swap: the
/// `WHERE` clause restates the state the writer believes the row is in, and
/// a write that matches no row is reported instead of silently applied.
/// All queries are parameterized.
use anyhow::{Context, Result};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::str::FromStr;

/// Column list shared by every SELECT and RETURNING clause
const DRAFT_COLUMNS: &str = "id, site_id, locale, keyword, slug, current_phase, status, \
     phase_attempts, last_error, phase_started_at, quality_score, seo_score, word_count, \
     sections_total, sections_completed, paired_draft_id, rejection_reason, research_notes, \
     outline, sections, content, title, meta_title, meta_description, images, \
     structured_data, author, gate_report, created_at, updated_at, completed_at";

/// Failures tolerated in one phase before the draft is rejected
pub const MAX_PHASE_ATTEMPTS: i64 = 3;

/// Rejection reason written when a phase fails `MAX_PHASE_ATTEMPTS` times
pub const MAX_ATTEMPTS_REASON: &str = "max phase attempts exceeded";

/// Production phase of a draft
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Research,
    Outline,
    Drafting,
    Assembly,
    Images,
    Seo,
    Scoring,
    Reservoir,
    Published,
    Rejected,
}

impl Phase {
    /// Phases a claimed draft can be worked in, in pipeline order
    pub const ACTIVE: [Phase; 7] = [
        Phase::Research,
        Phase::Outline,
        Phase::Drafting,
        Phase::Assembly,
        Phase::Images,
        Phase::Seo,
        Phase::Scoring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Research => "research",
            Phase::Outline => "outline",
            Phase::Drafting => "drafting",
            Phase::Assembly => "assembly",
            Phase::Images => "images",
            Phase::Seo => "seo",
            Phase::Scoring => "scoring",
            Phase::Reservoir => "reservoir",
            Phase::Published => "published",
            Phase::Rejected => "rejected",
        }
    }

    /// The phase a successful execution of `self` advances to
    ///
    /// Reservoir and the terminal phases have no successor in the state
    /// machine: leaving the reservoir is the publisher's decision.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Research => Some(Phase::Outline),
            Phase::Outline => Some(Phase::Drafting),
            Phase::Drafting => Some(Phase::Assembly),
            Phase::Assembly => Some(Phase::Images),
            Phase::Images => Some(Phase::Seo),
            Phase::Seo => Some(Phase::Scoring),
            Phase::Scoring => Some(Phase::Reservoir),
            Phase::Reservoir | Phase::Published | Phase::Rejected => None,
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Published | Phase::Rejected)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "research" => Ok(Phase::Research),
            "outline" => Ok(Phase::Outline),
            "drafting" => Ok(Phase::Drafting),
            "assembly" => Ok(Phase::Assembly),
            "images" => Ok(Phase::Images),
            "seo" => Ok(Phase::Seo),
            "scoring" => Ok(Phase::Scoring),
            "reservoir" => Ok(Phase::Reservoir),
            "published" => Ok(Phase::Published),
            "rejected" => Ok(Phase::Rejected),
            other => Err(EngineError::InvalidStoredValue {
                field: "current_phase".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Claim flag of a draft
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Idle,
    Generating,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Idle => "idle",
            DraftStatus::Generating => "generating",
        }
    }
}

impl FromStr for DraftStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "idle" => Ok(DraftStatus::Idle),
            "generating" => Ok(DraftStatus::Generating),
            other => Err(EngineError::InvalidStoredValue {
                field: "status".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Image slot planned by the images phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSpec {
    pub prompt: String,
    #[serde(default)]
    pub alt: String,
}

/// Draft record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Draft {
    pub id: String,
    pub site_id: String,
    pub locale: String,
    pub keyword: String,
    pub slug: String,
    pub current_phase: Phase,
    pub status: DraftStatus,
    pub phase_attempts: i64,
    pub last_error: Option<String>,
    pub phase_started_at: Option<i64>,
    pub quality_score: Option<f64>,
    pub seo_score: Option<f64>,
    pub word_count: i64,
    pub sections_total: i64,
    pub sections_completed: i64,
    pub paired_draft_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub research_notes: Option<String>,
    pub outline: Vec<String>,
    pub sections: Vec<String>,
    pub content: Option<String>,
    pub title: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub images: Vec<ImageSpec>,
    pub structured_data: Option<String>,
    pub author: Option<String>,
    pub gate_report: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Draft {
    /// Convert a row into a draft, validating enum columns and JSON columns
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let phase: String = row.try_get("current_phase")?;
        let status: String = row.try_get("status")?;

        Ok(Self {
            id: row.try_get("id")?,
            site_id: row.try_get("site_id")?,
            locale: row.try_get("locale")?,
            keyword: row.try_get("keyword")?,
            slug: row.try_get("slug")?,
            current_phase: phase.parse()?,
            status: status.parse()?,
            phase_attempts: row.try_get("phase_attempts")?,
            last_error: row.try_get("last_error")?,
            phase_started_at: row.try_get("phase_started_at")?,
            quality_score: row.try_get("quality_score")?,
            seo_score: row.try_get("seo_score")?,
            word_count: row.try_get("word_count")?,
            sections_total: row.try_get("sections_total")?,
            sections_completed: row.try_get("sections_completed")?,
            paired_draft_id: row.try_get("paired_draft_id")?,
            rejection_reason: row.try_get("rejection_reason")?,
            research_notes: row.try_get("research_notes")?,
            outline: json_column(row, "outline")?,
            sections: json_column(row, "sections")?,
            content: row.try_get("content")?,
            title: row.try_get("title")?,
            meta_title: row.try_get("meta_title")?,
            meta_description: row.try_get("meta_description")?,
            images: json_column(row, "images")?,
            structured_data: row.try_get("structured_data")?,
            author: row.try_get("author")?,
            gate_report: row.try_get("gate_report")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

fn json_column<T>(row: &SqliteRow, column: &str) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        None => Ok(Vec::new()),
        Some(text) if text.trim().is_empty() => Ok(Vec::new()),
        Some(text) => serde_json::from_str(&text).map_err(|_| {
            EngineError::InvalidStoredValue {
                field: column.to_string(),
                value: text.chars().take(80).collect(),
            }
            .into()
        }),
    }
}

/// Fields a phase produces; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftFields {
    pub research_notes: Option<String>,
    pub outline: Option<Vec<String>>,
    pub sections: Option<Vec<String>>,
    pub sections_total: Option<i64>,
    pub sections_completed: Option<i64>,
    pub content: Option<String>,
    pub word_count: Option<i64>,
    pub title: Option<String>,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub images: Option<Vec<ImageSpec>>,
    pub structured_data: Option<String>,
    pub seo_score: Option<f64>,
    pub quality_score: Option<f64>,
    pub author: Option<String>,
}

impl DraftFields {
    /// Apply the patch to an in-memory snapshot
    pub fn apply_to(&self, draft: &mut Draft) {
        if let Some(v) = &self.research_notes {
            draft.research_notes = Some(v.clone());
        }
        if let Some(v) = &self.outline {
            draft.outline = v.clone();
        }
        if let Some(v) = &self.sections {
            draft.sections = v.clone();
        }
        if let Some(v) = self.sections_total {
            draft.sections_total = v;
        }
        if let Some(v) = self.sections_completed {
            draft.sections_completed = v;
        }
        if let Some(v) = &self.content {
            draft.content = Some(v.clone());
        }
        if let Some(v) = self.word_count {
            draft.word_count = v;
        }
        if let Some(v) = &self.title {
            draft.title = Some(v.clone());
        }
        if let Some(v) = &self.meta_title {
            draft.meta_title = Some(v.clone());
        }
        if let Some(v) = &self.meta_description {
            draft.meta_description = Some(v.clone());
        }
        if let Some(v) = &self.images {
            draft.images = v.clone();
        }
        if let Some(v) = &self.structured_data {
            draft.structured_data = Some(v.clone());
        }
        if let Some(v) = self.seo_score {
            draft.seo_score = Some(v);
        }
        if let Some(v) = self.quality_score {
            draft.quality_score = Some(v);
        }
        if let Some(v) = &self.author {
            draft.author = Some(v.clone());
        }
    }
}

/// SET fragment for `DraftFields`; binds in `bind_fields` order
const FIELDS_SET: &str = "research_notes = COALESCE(?, research_notes), \
     outline = COALESCE(?, outline), \
     sections = COALESCE(?, sections), \
     sections_total = COALESCE(?, sections_total), \
     sections_completed = COALESCE(?, sections_completed), \
     content = COALESCE(?, content), \
     word_count = COALESCE(?, word_count), \
     title = COALESCE(?, title), \
     meta_title = COALESCE(?, meta_title), \
     meta_description = COALESCE(?, meta_description), \
     images = COALESCE(?, images), \
     structured_data = COALESCE(?, structured_data), \
     seo_score = COALESCE(?, seo_score), \
     quality_score = COALESCE(?, quality_score), \
     author = COALESCE(?, author)";

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_fields<'q>(query: SqliteQuery<'q>, fields: &DraftFields) -> Result<SqliteQuery<'q>> {
    let outline = fields.outline.as_ref().map(serde_json::to_string).transpose()?;
    let sections = fields
        .sections
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let images = fields.images.as_ref().map(serde_json::to_string).transpose()?;

    Ok(query
        .bind(fields.research_notes.clone())
        .bind(outline)
        .bind(sections)
        .bind(fields.sections_total)
        .bind(fields.sections_completed)
        .bind(fields.content.clone())
        .bind(fields.word_count)
        .bind(fields.title.clone())
        .bind(fields.meta_title.clone())
        .bind(fields.meta_description.clone())
        .bind(images)
        .bind(fields.structured_data.clone())
        .bind(fields.seo_score)
        .bind(fields.quality_score)
        .bind(fields.author.clone()))
}

/// Input for creating a draft
#[derive(Debug, Clone)]
pub struct NewDraft {
    pub site_id: String,
    pub locale: String,
    pub keyword: String,
}

/// Optional (site, locale) restriction on claims and scans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub site_id: Option<String>,
    pub locale: Option<String>,
}

impl Scope {
    pub fn new(site_id: Option<String>, locale: Option<String>) -> Self {
        Self { site_id, locale }
    }
}

/// Result of recording a phase failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    pub phase_attempts: i64,
    pub rejected: bool,
}

async fn insert_row<'e, E>(
    executor: E,
    id: &str,
    new: &NewDraft,
    paired_draft_id: Option<&str>,
    now: i64,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO drafts (id, site_id, locale, keyword, slug, paired_draft_id, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(&new.site_id)
    .bind(&new.locale)
    .bind(&new.keyword)
    .bind(slugify(&new.keyword))
    .bind(paired_draft_id)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await
    .context("Failed to create draft")?;
    Ok(())
}

/// Draft repository for database operations
#[derive(Clone)]
pub struct DraftRepository {
    pool: SqlitePool,
}

impl DraftRepository {
    /// Create a new draft repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a draft in the research phase
    pub async fn create(&self, new: &NewDraft, now: i64) -> Result<Draft> {
        let id = uuid::Uuid::new_v4().to_string();
        insert_row(&self.pool, &id, new, None, now).await?;
        self.require(&id).await
    }

    /// Create two drafts for the same keyword in two locales, linked to each other
    pub async fn create_pair(
        &self,
        new: &NewDraft,
        pair_locale: &str,
        now: i64,
    ) -> Result<(Draft, Draft)> {
        let first_id = uuid::Uuid::new_v4().to_string();
        let second_id = uuid::Uuid::new_v4().to_string();
        let second = NewDraft {
            site_id: new.site_id.clone(),
            locale: pair_locale.to_string(),
            keyword: new.keyword.clone(),
        };

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        insert_row(&mut *tx, &first_id, new, Some(&second_id), now).await?;
        insert_row(&mut *tx, &second_id, &second, Some(&first_id), now).await?;
        tx.commit().await.context("Failed to commit paired drafts")?;

        let first = self.require(&first_id).await?;
        let second = self.require(&second_id).await?;
        Ok((first, second))
    }

    /// Get a draft by ID
    pub async fn get(&self, id: &str) -> Result<Option<Draft>> {
        let row = sqlx::query(&format!("SELECT {} FROM drafts WHERE id = ?", DRAFT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch draft")?;

        row.as_ref().map(Draft::from_row).transpose()
    }

    async fn require(&self, id: &str) -> Result<Draft> {
        self.get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Draft {} not found", id))
    }

    /// Whether a non-rejected draft already uses this slug for (site, locale)
    pub async fn slug_taken(&self, site_id: &str, locale: &str, slug: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM drafts
             WHERE site_id = ? AND locale = ? AND slug = ? AND current_phase != 'rejected'",
        )
        .bind(site_id)
        .bind(locale)
        .bind(slug)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check slug")?;

        Ok(count > 0)
    }

    /// Atomically claim the oldest eligible draft in `phase`
    ///
    /// Eligible means: in `phase`, not already `generating`, fewer than
    /// `MAX_PHASE_ATTEMPTS` failures, inside `scope`. The selection and the
    /// status flip happen in one UPDATE statement, so two callers can never
    /// receive the same row.
    pub async fn claim(&self, phase: Phase, scope: &Scope, now: i64) -> Result<Option<Draft>> {
        self.claim_excluding(phase, scope, &[], now).await
    }

    /// Same as [`claim`](Self::claim), skipping the drafts in `exclude`
    pub async fn claim_excluding(
        &self,
        phase: Phase,
        scope: &Scope,
        exclude: &[String],
        now: i64,
    ) -> Result<Option<Draft>> {
        let sql = format!(
            "UPDATE drafts
             SET status = 'generating', phase_started_at = ?, updated_at = ?
             WHERE id = (
                 SELECT id FROM drafts
                 WHERE current_phase = ?
                   AND status != 'generating'
                   AND phase_attempts < ?
                   AND (? IS NULL OR site_id = ?)
                   AND (? IS NULL OR locale = ?)
                   AND id NOT IN (SELECT value FROM json_each(?))
                 ORDER BY updated_at ASC, created_at ASC, id ASC
                 LIMIT 1
             )
             AND status != 'generating'
             RETURNING {}",
            DRAFT_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(now)
            .bind(now)
            .bind(phase.as_str())
            .bind(MAX_PHASE_ATTEMPTS)
            .bind(scope.site_id.as_deref())
            .bind(scope.site_id.as_deref())
            .bind(scope.locale.as_deref())
            .bind(scope.locale.as_deref())
            .bind(serde_json::to_string(exclude)?)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to claim draft")?;

        row.as_ref().map(Draft::from_row).transpose()
    }

    /// Count drafts a claim in any active phase could pick up, ignoring `exclude`
    pub async fn count_eligible(&self, scope: &Scope, exclude: &[String]) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM drafts
             WHERE current_phase IN ('research', 'outline', 'drafting', 'assembly', 'images', 'seo', 'scoring')
               AND status != 'generating'
               AND phase_attempts < ?
               AND (? IS NULL OR site_id = ?)
               AND (? IS NULL OR locale = ?)
               AND id NOT IN (SELECT value FROM json_each(?))",
        )
        .bind(MAX_PHASE_ATTEMPTS)
        .bind(scope.site_id.as_deref())
        .bind(scope.site_id.as_deref())
        .bind(scope.locale.as_deref())
        .bind(scope.locale.as_deref())
        .bind(serde_json::to_string(exclude)?)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count eligible drafts")?;

        Ok(count)
    }

    /// Persist a successful phase: advance one step and reset attempts, in one write
    pub async fn advance(
        &self,
        draft_id: &str,
        from: Phase,
        fields: &DraftFields,
        now: i64,
    ) -> Result<Phase> {
        let to = from.next().ok_or_else(|| EngineError::PhaseFailed {
            phase: from.to_string(),
            reason: "phase has no successor".to_string(),
        })?;

        let sql = format!(
            "UPDATE drafts
             SET {}, current_phase = ?, phase_attempts = 0, status = 'idle',
                 last_error = NULL, phase_started_at = NULL, updated_at = ?
             WHERE id = ? AND status = 'generating' AND current_phase = ?",
            FIELDS_SET
        );

        let result = bind_fields(sqlx::query(&sql), fields)?
            .bind(to.as_str())
            .bind(now)
            .bind(draft_id)
            .bind(from.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to advance draft")?;

        if result.rows_affected() == 0 {
            return Err(lost_claim(draft_id, from));
        }
        Ok(to)
    }

    /// Persist partial work without moving the phase or touching attempts
    pub async fn record_progress(
        &self,
        draft_id: &str,
        phase: Phase,
        fields: &DraftFields,
        now: i64,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE drafts
             SET {}, status = 'idle', last_error = NULL, phase_started_at = NULL, updated_at = ?
             WHERE id = ? AND status = 'generating' AND current_phase = ?",
            FIELDS_SET
        );

        let result = bind_fields(sqlx::query(&sql), fields)?
            .bind(now)
            .bind(draft_id)
            .bind(phase.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to record draft progress")?;

        if result.rows_affected() == 0 {
            return Err(lost_claim(draft_id, phase));
        }
        Ok(())
    }

    /// Persist a failed phase: increment attempts, and reject on the last one
    ///
    /// The increment and the forced transition to `rejected` are the same
    /// statement, so a draft is never observed with exhausted attempts in an
    /// active phase.
    pub async fn record_failure(
        &self,
        draft_id: &str,
        phase: Phase,
        error: &str,
        now: i64,
    ) -> Result<FailureRecord> {
        let row = sqlx::query(
            "UPDATE drafts
             SET phase_attempts = phase_attempts + 1,
                 last_error = ?,
                 status = 'idle',
                 phase_started_at = NULL,
                 current_phase = CASE WHEN phase_attempts + 1 >= ? THEN 'rejected' ELSE current_phase END,
                 rejection_reason = CASE WHEN phase_attempts + 1 >= ? THEN ? ELSE rejection_reason END,
                 completed_at = CASE WHEN phase_attempts + 1 >= ? THEN ? ELSE completed_at END,
                 updated_at = ?
             WHERE id = ? AND status = 'generating' AND current_phase = ?
             RETURNING phase_attempts, current_phase",
        )
        .bind(error)
        .bind(MAX_PHASE_ATTEMPTS)
        .bind(MAX_PHASE_ATTEMPTS)
        .bind(MAX_ATTEMPTS_REASON)
        .bind(MAX_PHASE_ATTEMPTS)
        .bind(now)
        .bind(now)
        .bind(draft_id)
        .bind(phase.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to record phase failure")?;

        let row = row.ok_or_else(|| lost_claim(draft_id, phase))?;
        let phase_attempts: i64 = row.try_get("phase_attempts")?;
        let current_phase: String = row.try_get("current_phase")?;

        Ok(FailureRecord {
            phase_attempts,
            rejected: current_phase.parse::<Phase>()? == Phase::Rejected,
        })
    }

    /// Drafts waiting in the reservoir, oldest first
    pub async fn list_reservoir(&self, scope: &Scope, limit: i64) -> Result<Vec<Draft>> {
        self.list_in_phase(Phase::Reservoir, scope, limit).await
    }

    /// Drafts in a phase, oldest `updated_at` first
    pub async fn list_in_phase(&self, phase: Phase, scope: &Scope, limit: i64) -> Result<Vec<Draft>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM drafts
             WHERE current_phase = ?
               AND (? IS NULL OR site_id = ?)
               AND (? IS NULL OR locale = ?)
             ORDER BY updated_at ASC, created_at ASC, id ASC
             LIMIT ?",
            DRAFT_COLUMNS
        ))
        .bind(phase.as_str())
        .bind(scope.site_id.as_deref())
        .bind(scope.site_id.as_deref())
        .bind(scope.locale.as_deref())
        .bind(scope.locale.as_deref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list drafts")?;

        rows.iter().map(Draft::from_row).collect()
    }

    /// Promote a reservoir draft to published
    ///
    /// Returns false when the draft was no longer in the reservoir.
    pub async fn publish(&self, draft_id: &str, gate_report: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE drafts
             SET current_phase = 'published', completed_at = ?, updated_at = ?,
                 gate_report = ?, last_error = NULL
             WHERE id = ? AND current_phase = 'reservoir' AND status != 'generating'",
        )
        .bind(now)
        .bind(now)
        .bind(gate_report)
        .bind(draft_id)
        .execute(&self.pool)
        .await
        .context("Failed to publish draft")?;

        Ok(result.rows_affected() == 1)
    }

    /// Attach gate diagnostics to a draft that stays in the reservoir
    pub async fn record_gate_report(
        &self,
        draft_id: &str,
        gate_report: &str,
        last_error: Option<&str>,
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE drafts SET gate_report = ?, last_error = ?, updated_at = ?
             WHERE id = ? AND current_phase = 'reservoir'",
        )
        .bind(gate_report)
        .bind(last_error)
        .bind(now)
        .bind(draft_id)
        .execute(&self.pool)
        .await
        .context("Failed to record gate report")?;

        Ok(())
    }

    /// Published drafts for (site, locale) completed at or after `since`
    pub async fn count_published_since(&self, site_id: &str, locale: &str, since: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM drafts
             WHERE site_id = ? AND locale = ? AND current_phase = 'published' AND completed_at >= ?",
        )
        .bind(site_id)
        .bind(locale)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count published drafts")?;

        Ok(count)
    }

    /// Drafts held in 'generating' since before `started_before`
    pub async fn find_stuck(&self, started_before: i64) -> Result<Vec<Draft>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM drafts
             WHERE status = 'generating' AND phase_started_at IS NOT NULL AND phase_started_at < ?
             ORDER BY phase_started_at ASC",
            DRAFT_COLUMNS
        ))
        .bind(started_before)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query stuck drafts")?;

        rows.iter().map(Draft::from_row).collect()
    }

    /// Draft counts per phase, in pipeline order
    pub async fn phase_counts(&self) -> Result<Vec<(Phase, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT current_phase, COUNT(*) FROM drafts GROUP BY current_phase")
                .fetch_all(&self.pool)
                .await
                .context("Failed to count drafts by phase")?;

        let mut counts = rows
            .into_iter()
            .map(|(phase, count)| Ok((phase.parse::<Phase>()?, count)))
            .collect::<Result<Vec<_>>>()?;
        counts.sort_by_key(|(phase, _)| *phase);
        Ok(counts)
    }
}

fn lost_claim(draft_id: &str, phase: Phase) -> anyhow::Error {
    EngineError::LostClaim {
        draft_id: draft_id.to_string(),
        phase: phase.to_string(),
    }
    .into()
}

/// Build a URL slug from a keyword
pub fn slugify(keyword: &str) -> String {
    let mut slug = String::with_capacity(keyword.len());
    let mut pending_dash = false;
    for ch in keyword.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
