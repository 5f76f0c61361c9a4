//! Pipeline runner
//!
//! The stateless entry point for one invocation. It validates the requested
//! scope, owns the budget guard, dispatches the action and appends exactly
//! one audit row, whether the action succeeded or not.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::{Config, SiteConfig};
use crate::db::{
    slugify, CronJobLogRepository, Database, DraftRepository, JobStatus, NewCronJobLog, NewDraft,
    Scope,
};
use crate::pipeline::budget::BudgetGuard;
use crate::pipeline::executor::{PhaseExecutor, UnitOutcome};
use crate::pipeline::gate::Gate;
use crate::pipeline::health::{HealthReport, NO_PROVIDER_BLOCKER};
use crate::pipeline::publisher::Publisher;
use crate::pipeline::{FailureKind, TextGenerator};
use sdk::errors::EngineError;
use sdk::{Action, TriggerRequest, TriggerResponse};

const SCAN_LIMIT: i64 = 500;

/// What one invocation did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub action: Action,
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub deferred: u32,
    /// Drafts rejected after exhausting their attempts during this run
    pub rejected: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_blocker: Option<String>,
    pub details: serde_json::Value,
}

impl RunSummary {
    fn empty(action: Action) -> Self {
        Self {
            action,
            processed: 0,
            succeeded: 0,
            failed: 0,
            deferred: 0,
            rejected: 0,
            duration_ms: 0,
            config_blocker: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn job_status(&self) -> JobStatus {
        if self.config_blocker.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::from_counts(self.succeeded, self.failed)
        }
    }

    pub fn to_response(&self) -> TriggerResponse {
        TriggerResponse {
            success: self.config_blocker.is_none(),
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            deferred: self.deferred,
            duration_ms: self.duration_ms,
        }
    }
}

pub struct PipelineRunner {
    drafts: DraftRepository,
    cron_logs: CronJobLogRepository,
    executor: PhaseExecutor,
    publisher: Publisher,
    generator: Arc<dyn TextGenerator>,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
}

impl PipelineRunner {
    pub fn new(
        db: &Database,
        config: Arc<Config>,
        generator: Arc<dyn TextGenerator>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let executor = PhaseExecutor::new(
            db.drafts(),
            generator.clone(),
            config.clone(),
            clock.clone(),
        )?;
        let publisher = Publisher::new(
            db.drafts(),
            Gate::standard(config.gate.clone())?,
            config.clone(),
            clock.clone(),
        );

        Ok(Self {
            drafts: db.drafts(),
            cron_logs: db.cron_logs(),
            executor,
            publisher,
            generator,
            config,
            clock,
        })
    }

    /// Run one invocation and record it in the audit log
    pub async fn run(&self, request: &TriggerRequest) -> Result<RunSummary, EngineError> {
        let budget = BudgetGuard::from_config(self.clock.clone(), &self.config.pipeline);
        let action = request.action;
        info!(action = %action, site_id = ?request.site_id, locale = ?request.locale, "Pipeline run started");

        let result = match self.scope(request) {
            Ok(scope) => self.dispatch(request, &scope, &budget).await,
            Err(e) => Err(e),
        };
        let duration_ms = budget.elapsed_ms().max(0) as u64;

        match result {
            Ok(mut summary) => {
                summary.duration_ms = duration_ms;
                self.audit(&summary, budget.started_at()).await;
                info!(
                    action = %action,
                    processed = summary.processed,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    deferred = summary.deferred,
                    duration_ms,
                    "Pipeline run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(action = %action, error = %e, "Pipeline run aborted");
                let mut summary = RunSummary::empty(action);
                summary.duration_ms = duration_ms;
                summary.details = json!({ "error": e.to_string() });
                self.append_log(&summary, JobStatus::Failed, budget.started_at())
                    .await;
                Err(e)
            }
        }
    }

    fn scope(&self, request: &TriggerRequest) -> Result<Scope, EngineError> {
        if let Some(site_id) = request.site_id.as_deref() {
            let site = self.config.site(site_id)?;
            if let Some(locale) = request.locale.as_deref() {
                require_locale(site, locale)?;
            }
        }
        Ok(Scope::new(request.site_id.clone(), request.locale.clone()))
    }

    async fn dispatch(
        &self,
        request: &TriggerRequest,
        scope: &Scope,
        budget: &BudgetGuard,
    ) -> Result<RunSummary, EngineError> {
        match request.action {
            Action::Advance => self.advance(scope, budget).await,
            Action::Publish => self.publish(scope, budget).await,
            Action::Scan => self.scan(scope, budget).await,
            Action::Create => self.create(request, budget).await,
            Action::Health => self.health().await,
        }
    }

    async fn advance(&self, scope: &Scope, budget: &BudgetGuard) -> Result<RunSummary, EngineError> {
        let mut summary = RunSummary::empty(Action::Advance);

        if !self.generator.any_provider_configured() {
            warn!("No AI provider configured; advance skipped");
            summary.config_blocker = Some(NO_PROVIDER_BLOCKER.to_string());
            summary.details = json!({ "failure_kind": FailureKind::Configuration });
            return Ok(summary);
        }

        let max_units = self.config.pipeline.max_units_per_invocation;
        let mut outcomes = Vec::new();
        // A draft gets at most one phase per invocation
        let mut touched: Vec<String> = Vec::new();
        let mut out_of_budget = false;

        while summary.processed < max_units {
            if !budget.can_start_next() {
                out_of_budget = true;
                break;
            }

            let outcome = self.executor.run_unit(scope, &touched).await?;
            match &outcome {
                UnitOutcome::Idle => break,
                UnitOutcome::Advanced { draft_id, .. }
                | UnitOutcome::Progressed { draft_id, .. } => {
                    touched.push(draft_id.clone());
                    summary.succeeded += 1;
                }
                UnitOutcome::Failed { draft_id, kind, .. } => {
                    touched.push(draft_id.clone());
                    summary.failed += 1;
                    if *kind == FailureKind::ExhaustedRetries {
                        summary.rejected += 1;
                    }
                }
            }
            summary.processed += 1;
            outcomes.push(outcome);
        }

        if out_of_budget {
            let eligible = self
                .drafts
                .count_eligible(scope, &touched)
                .await
                .map_err(database)?;
            let quota = i64::from(max_units - summary.processed);
            summary.deferred = eligible.min(quota).max(0) as u32;
            info!(deferred = summary.deferred, "Budget exhausted; remaining units deferred");
        }

        summary.details = json!({ "units": outcomes });
        Ok(summary)
    }

    async fn publish(&self, scope: &Scope, budget: &BudgetGuard) -> Result<RunSummary, EngineError> {
        let published = self.publisher.run(scope, budget).await.map_err(database)?;

        let mut summary = RunSummary::empty(Action::Publish);
        summary.processed = published.evaluated;
        summary.succeeded = published.published;
        summary.failed = published.held;
        summary.deferred = published.deferred;
        summary.details = serde_json::to_value(&published).unwrap_or_default();
        Ok(summary)
    }

    /// Re-run the gate over the reservoir and refresh the attached reports
    async fn scan(&self, scope: &Scope, budget: &BudgetGuard) -> Result<RunSummary, EngineError> {
        let mut summary = RunSummary::empty(Action::Scan);
        let candidates = self
            .drafts
            .list_reservoir(scope, SCAN_LIMIT)
            .await
            .map_err(database)?;
        let mut blocked = Vec::new();

        for (index, draft) in candidates.iter().enumerate() {
            if !budget.can_start_next() {
                summary.deferred = (candidates.len() - index) as u32;
                break;
            }

            let report = match self.config.site(&draft.site_id) {
                Ok(site) => self.publisher.gate().evaluate(draft, site),
                Err(e) => {
                    warn!(draft_id = %draft.id, error = %e, "Reservoir draft references unknown site");
                    summary.processed += 1;
                    summary.failed += 1;
                    continue;
                }
            };
            let last_error = (!report.passed()).then(|| report.summary());
            self.drafts
                .record_gate_report(
                    &draft.id,
                    &report.to_json(),
                    last_error.as_deref(),
                    self.clock.now_millis(),
                )
                .await
                .map_err(database)?;

            summary.processed += 1;
            if report.passed() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
                blocked.push(json!({ "draft_id": draft.id, "reason": last_error }));
            }
        }

        let stuck = self
            .executor
            .allocator()
            .find_stuck()
            .await
            .map_err(database)?;
        summary.details = json!({ "blocked": blocked, "stuck": stuck });
        Ok(summary)
    }

    /// Create research-phase drafts from a keyword list
    async fn create(
        &self,
        request: &TriggerRequest,
        budget: &BudgetGuard,
    ) -> Result<RunSummary, EngineError> {
        let (Some(site_id), Some(locale)) = (request.site_id.as_deref(), request.locale.as_deref())
        else {
            return Err(EngineError::Config(
                "create requires siteId and locale".to_string(),
            ));
        };
        let site = self.config.site(site_id)?;
        if let Some(pair) = request.pair_locale.as_deref() {
            require_locale(site, pair)?;
            if pair == locale {
                return Err(EngineError::Config(
                    "pairLocale must differ from locale".to_string(),
                ));
            }
        }

        let mut summary = RunSummary::empty(Action::Create);
        let mut created = Vec::new();
        let mut skipped = Vec::new();

        for (index, keyword) in request.keywords.iter().enumerate() {
            if !budget.can_start_next() {
                summary.deferred = (request.keywords.len() - index) as u32;
                break;
            }
            summary.processed += 1;

            let keyword = keyword.trim();
            if keyword.is_empty() || slugify(keyword).is_empty() {
                summary.failed += 1;
                skipped.push(json!({ "keyword": keyword, "reason": "blank keyword" }));
                continue;
            }

            match self
                .create_one(site_id, locale, request.pair_locale.as_deref(), keyword)
                .await
            {
                Ok(Some(ids)) => {
                    summary.succeeded += 1;
                    created.extend(ids);
                }
                Ok(None) => {
                    summary.failed += 1;
                    skipped.push(json!({ "keyword": keyword, "reason": "slug already in use" }));
                }
                Err(e) => {
                    warn!(keyword, error = %format!("{:#}", e), "Failed to create draft");
                    summary.failed += 1;
                    skipped.push(json!({ "keyword": keyword, "reason": format!("{:#}", e) }));
                }
            }
        }

        summary.details = json!({ "created": created, "skipped": skipped });
        Ok(summary)
    }

    async fn create_one(
        &self,
        site_id: &str,
        locale: &str,
        pair_locale: Option<&str>,
        keyword: &str,
    ) -> anyhow::Result<Option<Vec<String>>> {
        let slug = slugify(keyword);
        for l in std::iter::once(locale).chain(pair_locale) {
            if self.drafts.slug_taken(site_id, l, &slug).await? {
                return Ok(None);
            }
        }

        let new = NewDraft {
            site_id: site_id.to_string(),
            locale: locale.to_string(),
            keyword: keyword.to_string(),
        };
        let now = self.clock.now_millis();

        let ids = match pair_locale {
            Some(pair) => {
                let (first, second) = self.drafts.create_pair(&new, pair, now).await?;
                vec![first.id, second.id]
            }
            None => vec![self.drafts.create(&new, now).await?.id],
        };
        info!(site_id, locale, keyword, drafts = ids.len(), "Drafts created");
        Ok(Some(ids))
    }

    async fn health(&self) -> Result<RunSummary, EngineError> {
        let report = self.health_report().await?;
        let mut summary = RunSummary::empty(Action::Health);
        summary.config_blocker = report.config_blocker.clone();
        summary.details = serde_json::to_value(&report).unwrap_or_default();
        Ok(summary)
    }

    /// Provider configuration, stuck drafts and phase counts
    pub async fn health_report(&self) -> Result<HealthReport, EngineError> {
        let stuck = self
            .executor
            .allocator()
            .find_stuck()
            .await
            .map_err(database)?;
        let phase_counts = self.drafts.phase_counts().await.map_err(database)?;

        Ok(HealthReport::new(
            self.generator.configured_providers(),
            stuck,
            phase_counts,
        ))
    }

    async fn audit(&self, summary: &RunSummary, started_at: i64) {
        self.append_log(summary, summary.job_status(), started_at).await;
    }

    async fn append_log(&self, summary: &RunSummary, status: JobStatus, started_at: i64) {
        let entry = NewCronJobLog {
            job_name: summary.action.job_name(),
            status,
            started_at,
            duration_ms: summary.duration_ms as i64,
            items_processed: i64::from(summary.processed),
            items_succeeded: i64::from(summary.succeeded),
            items_failed: i64::from(summary.failed),
            result_summary: serde_json::to_value(summary).unwrap_or_default(),
        };

        if let Err(e) = self.cron_logs.append(&entry).await {
            error!(job_name = %entry.job_name, error = %format!("{:#}", e), "Failed to append audit row");
        }
    }
}

fn require_locale(site: &SiteConfig, locale: &str) -> Result<(), EngineError> {
    if site.locales.iter().any(|l| l == locale) {
        Ok(())
    } else {
        Err(EngineError::Config(format!(
            "locale '{}' is not configured for site '{}'",
            locale, site.id
        )))
    }
}

fn database(e: anyhow::Error) -> EngineError {
    EngineError::Database(format!("{:#}", e))
}
