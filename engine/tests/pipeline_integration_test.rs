//! Integration tests for the pipeline runner
//!
//! Drives whole invocations against an on-disk store with a scripted text
//! generator and a manual clock:
//! - a draft walks all seven phases into the reservoir, one phase per
//!   invocation, and is published
//! - a failed phase counts once per invocation, even with units to spare
//! - a store error after a phase ran still releases the claim
//! - repeated phase failures reject the draft, after which it is left alone
//! - a success after a failure resets the attempt counter
//! - the budget guard stops starting units and reports the rest as deferred
//! - a draft abandoned in 'generating' is reported, never reclaimed
//! - the gate holds drafts in the reservoir, failing closed on a panic

use async_trait::async_trait;
use draftmill_engine::clock::{Clock, ManualClock};
use draftmill_engine::config::{Config, GateConfig};
use draftmill_engine::db::{Database, Draft, DraftStatus, Phase, Scope};
use draftmill_engine::llm::{
    GenerateOptions, GenerationFailure, GenerationResult, GenerationSuccess, Message, ProviderKey,
};
use draftmill_engine::llm::router::ProviderFailure;
use draftmill_engine::pipeline::gate::{CheckOutcome, GateCheck, GateContext};
use draftmill_engine::pipeline::{
    BudgetGuard, Gate, HealthStatus, PipelineRunner, Publisher, TextGenerator,
};
use sdk::{Action, TriggerRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const START: i64 = 1_710_084_600_000;
const KEYWORD: &str = "hiking boots";

/// Answers each task type from a script; tasks listed in `fail_first`
/// fail that many times before answering.
struct ScriptedGenerator {
    clock: ManualClock,
    millis_per_call: i64,
    fail_first: Mutex<HashMap<&'static str, usize>>,
    always_fail: Option<&'static str>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    fn new(clock: &ManualClock) -> Self {
        Self {
            clock: clock.clone(),
            millis_per_call: 0,
            fail_first: Mutex::new(HashMap::new()),
            always_fail: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn answer(task_type: &str) -> String {
        match task_type {
            "research" => "- Waterproof membranes matter\n- Fit is the top cause of blisters".to_string(),
            "outline" => r#"["Why boots matter", "Choosing a fit", "Care and storage"]"#.to_string(),
            "drafting" => "We tested 12 pairs of boots across 40 km of wet trails in 2023. \
                           Good boots keep your feet dry and stable. "
                .repeat(20),
            "images" => r#"[{"prompt": "hiker lacing boots at a trailhead", "alt": "A hiker lacing boots"}]"#
                .to_string(),
            "seo" => r#"```json
{"title": "The Best Hiking Boots for Wet Trails",
 "meta_title": "Best Hiking Boots 2024: Tested Picks",
 "meta_description": "We compared waterproof hiking boots on muddy trails to find the pairs that stay dry and comfortable."}
```"#
                .to_string(),
            "scoring" => r#"{"score": 82}"#.to_string(),
            other => panic!("unexpected task type {}", other),
        }
    }

    fn failure() -> GenerationResult {
        GenerationResult::Failure(GenerationFailure {
            failures: vec![ProviderFailure {
                provider: "openai".to_string(),
                error: "HTTP 503: overloaded".to_string(),
            }],
            skipped: vec![],
            no_provider_configured: false,
        })
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        task_type: &str,
        _messages: &[Message],
        _options: &GenerateOptions,
    ) -> GenerationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.clock.advance_millis(self.millis_per_call);

        if self.always_fail == Some(task_type) {
            return Self::failure();
        }
        {
            let mut fail_first = self.fail_first.lock().unwrap();
            if let Some(remaining) = fail_first.get_mut(task_type) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Self::failure();
                }
            }
        }

        GenerationResult::Success(GenerationSuccess {
            content: Self::answer(task_type),
            provider: ProviderKey::OpenAI,
            model: "gpt-4o-mini".to_string(),
            tokens_used: 100,
            cost: 0.0,
            response_time_ms: 5,
            failures: vec![],
        })
    }

    fn configured_providers(&self) -> Vec<ProviderKey> {
        vec![ProviderKey::OpenAI]
    }
}

struct Harness {
    _dir: TempDir,
    db: Database,
    clock: ManualClock,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let db = Database::new(&dir.path().join("draftmill.db")).await.unwrap();
    Harness {
        _dir: dir,
        db,
        clock: ManualClock::new(START),
    }
}

fn config(max_units: u32) -> Config {
    let mut config = Config::default_config();
    config.pipeline.max_units_per_invocation = max_units;
    config
}

impl Harness {
    fn runner(&self, config: Config, generator: ScriptedGenerator) -> PipelineRunner {
        PipelineRunner::new(
            &self.db,
            Arc::new(config),
            Arc::new(generator),
            Arc::new(self.clock.clone()),
        )
        .unwrap()
    }

    async fn only_draft(&self) -> Draft {
        let mut drafts = Vec::new();
        for phase in [
            Phase::Research,
            Phase::Outline,
            Phase::Drafting,
            Phase::Assembly,
            Phase::Images,
            Phase::Seo,
            Phase::Scoring,
            Phase::Reservoir,
            Phase::Published,
            Phase::Rejected,
        ] {
            drafts.extend(
                self.db
                    .drafts()
                    .list_in_phase(phase, &Scope::default(), 10)
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(drafts.len(), 1);
        drafts.remove(0)
    }
}

/// Run advance invocations until the draft reaches the reservoir
///
/// Returns how many invocations it took; every one must move the draft by
/// exactly one unit of work.
async fn advance_to_reservoir(h: &Harness, runner: &PipelineRunner) -> usize {
    let mut invocations = 0;
    while h.only_draft().await.current_phase != Phase::Reservoir {
        assert!(invocations < 12, "draft never reached the reservoir");
        let run = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
        assert_eq!(run.processed, 1);
        assert_eq!(run.succeeded, 1);
        invocations += 1;
        h.clock.advance_secs(1);
    }
    invocations
}

fn create(keywords: &[&str]) -> TriggerRequest {
    let mut request = TriggerRequest::new(Action::Create).with_scope("main", "en");
    request.keywords = keywords.iter().map(|k| k.to_string()).collect();
    request
}

#[tokio::test]
async fn test_end_to_end_draft_is_published() {
    let h = harness().await;
    let runner = h.runner(config(20), ScriptedGenerator::new(&h.clock));

    let created = runner.run(&create(&[KEYWORD])).await.unwrap();
    assert_eq!(created.succeeded, 1);

    // research, outline, drafting x2, assembly, images, seo, scoring
    assert_eq!(advance_to_reservoir(&h, &runner).await, 8);

    let idle = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
    assert_eq!(idle.processed, 0);

    let draft = h.only_draft().await;
    assert_eq!(draft.current_phase, Phase::Reservoir);
    assert_eq!(draft.status, DraftStatus::Idle);
    assert_eq!(draft.sections_completed, 3);
    assert!(draft.word_count >= 1000);
    assert!(draft.seo_score.unwrap() >= 50.0);
    assert!(draft.quality_score.is_some());
    assert_eq!(draft.author.as_deref(), Some("Editorial Team"));
    assert!(draft.completed_at.is_none());

    h.clock.advance_secs(60);
    let published = runner.run(&TriggerRequest::new(Action::Publish)).await.unwrap();
    assert_eq!(published.succeeded, 1);
    assert_eq!(published.failed, 0);

    let draft = h.only_draft().await;
    assert_eq!(draft.current_phase, Phase::Published);
    assert_eq!(draft.completed_at, Some(h.clock.now_millis()));
    assert!(draft.gate_report.unwrap().contains(r#""verdict":"passed""#));

    // One audit row per invocation
    let logs = h.db.cron_logs().list_recent(20).await.unwrap();
    assert_eq!(logs.len(), 11);
    let advances = logs
        .iter()
        .filter(|l| l.job_name == "pipeline.advance")
        .count();
    assert_eq!(advances, 9);
}

#[tokio::test]
async fn test_invocation_runs_one_phase_per_draft() {
    let h = harness().await;
    let runner = h.runner(config(3), ScriptedGenerator::new(&h.clock));
    runner.run(&create(&[KEYWORD])).await.unwrap();

    let run = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
    assert_eq!(run.processed, 1);
    assert_eq!(run.succeeded, 1);
    assert_eq!(run.deferred, 0);

    let draft = h.only_draft().await;
    assert_eq!(draft.current_phase, Phase::Outline);
    assert_eq!(draft.status, DraftStatus::Idle);
}

#[tokio::test]
async fn test_failed_phase_counts_once_per_invocation() {
    let h = harness().await;
    let mut generator = ScriptedGenerator::new(&h.clock);
    generator.always_fail = Some("research");
    let runner = h.runner(config(3), generator);
    runner.run(&create(&[KEYWORD])).await.unwrap();

    let run = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
    assert_eq!(run.processed, 1);
    assert_eq!(run.failed, 1);
    assert_eq!(run.rejected, 0);

    let draft = h.only_draft().await;
    assert_eq!(draft.current_phase, Phase::Research);
    assert_eq!(draft.phase_attempts, 1);
}

#[tokio::test]
async fn test_store_error_after_phase_releases_claim() {
    let h = harness().await;
    let runner = h.runner(config(1), ScriptedGenerator::new(&h.clock));
    runner.run(&create(&[KEYWORD])).await.unwrap();

    // Phase transitions fail while the trigger exists; other writes still land
    sqlx::query(
        "CREATE TRIGGER block_phase_change BEFORE UPDATE OF current_phase ON drafts
         WHEN NEW.current_phase != OLD.current_phase
         BEGIN SELECT RAISE(ABORT, 'store unavailable'); END",
    )
    .execute(h.db.pool())
    .await
    .unwrap();

    let run = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
    assert_eq!(run.processed, 1);
    assert_eq!(run.failed, 1);

    let draft = h.only_draft().await;
    assert_eq!(draft.current_phase, Phase::Research);
    assert_eq!(draft.status, DraftStatus::Idle);
    assert_eq!(draft.phase_attempts, 1);
    assert!(draft.last_error.as_deref().unwrap().contains("store unavailable"));

    // Released, so the next invocation picks it up again
    sqlx::query("DROP TRIGGER block_phase_change")
        .execute(h.db.pool())
        .await
        .unwrap();
    h.clock.advance_secs(1);
    let retry = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
    assert_eq!(retry.succeeded, 1);

    let draft = h.only_draft().await;
    assert_eq!(draft.current_phase, Phase::Outline);
    assert_eq!(draft.phase_attempts, 0);
}

#[tokio::test]
async fn test_exhausted_retries_reject_then_noop() {
    let h = harness().await;
    let mut generator = ScriptedGenerator::new(&h.clock);
    generator.always_fail = Some("outline");
    let runner = h.runner(config(1), generator);

    runner.run(&create(&[KEYWORD])).await.unwrap();
    let research = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
    assert_eq!(research.succeeded, 1);

    for attempt in 1..=3 {
        h.clock.advance_secs(1);
        let run = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
        assert_eq!(run.failed, 1, "attempt {}", attempt);
        assert_eq!(run.rejected, u32::from(attempt == 3));
    }

    let rejected = h.only_draft().await;
    assert_eq!(rejected.current_phase, Phase::Rejected);
    assert_eq!(rejected.status, DraftStatus::Idle);
    assert_eq!(
        rejected.rejection_reason.as_deref(),
        Some("max phase attempts exceeded")
    );
    assert!(rejected.last_error.as_deref().unwrap().contains("503"));
    assert!(rejected.completed_at.is_some());

    // Further invocations leave the rejected draft alone
    h.clock.advance_secs(1);
    let after = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
    assert_eq!(after.processed, 0);
    assert_eq!(h.only_draft().await, rejected);
}

#[tokio::test]
async fn test_success_resets_attempts() {
    let h = harness().await;
    let generator = ScriptedGenerator::new(&h.clock);
    generator.fail_first.lock().unwrap().insert("outline", 2);
    let runner = h.runner(config(1), generator);

    runner.run(&create(&[KEYWORD])).await.unwrap();
    runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();

    for _ in 0..2 {
        h.clock.advance_secs(1);
        runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
    }
    let failing = h.only_draft().await;
    assert_eq!(failing.current_phase, Phase::Outline);
    assert_eq!(failing.phase_attempts, 2);

    h.clock.advance_secs(1);
    let run = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
    assert_eq!(run.succeeded, 1);

    let draft = h.only_draft().await;
    assert_eq!(draft.current_phase, Phase::Drafting);
    assert_eq!(draft.phase_attempts, 0);
    assert_eq!(draft.outline.len(), 3);
}

#[tokio::test]
async fn test_budget_defers_remaining_units() {
    let h = harness().await;
    let mut generator = ScriptedGenerator::new(&h.clock);
    // Each provider call takes 20s of the 53s budget
    generator.millis_per_call = 20_000;
    let mut config = config(10);
    config.pipeline.budget_secs = 53;
    config.pipeline.min_margin_secs = 8;
    let runner = h.runner(config, generator);

    runner
        .run(&create(&["boots one", "boots two", "boots three", "boots four"]))
        .await
        .unwrap();

    let run = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
    // Started at 0s, 20s and 40s; at 60s less than the margin remains.
    // The three drafts already advanced wait for the next invocation.
    assert_eq!(run.processed, 3);
    assert_eq!(run.succeeded, 3);
    assert_eq!(run.deferred, 1);

    let logs = h.db.cron_logs().list_recent(1).await.unwrap();
    assert_eq!(logs[0].job_name, "pipeline.advance");
    assert_eq!(logs[0].items_processed, 3);
}

#[tokio::test]
async fn test_stuck_draft_reported_not_reclaimed() {
    let h = harness().await;
    let runner = h.runner(config(5), ScriptedGenerator::new(&h.clock));
    runner.run(&create(&[KEYWORD])).await.unwrap();

    // An invocation claims the draft and dies mid-phase
    let claimed = h
        .db
        .drafts()
        .claim(Phase::Research, &Scope::default(), h.clock.now_millis())
        .await
        .unwrap()
        .unwrap();

    h.clock.advance_secs(4 * 60 * 60);

    let report = runner.health_report().await.unwrap();
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.stuck.len(), 1);
    assert_eq!(report.stuck[0].id, claimed.id);
    assert_eq!(report.stuck[0].stuck_for_secs, 4 * 60 * 60);

    let run = runner.run(&TriggerRequest::new(Action::Advance)).await.unwrap();
    assert_eq!(run.processed, 0);

    let draft = h.only_draft().await;
    assert_eq!(draft.status, DraftStatus::Generating);
    assert_eq!(draft.current_phase, Phase::Research);
}

struct Panicking;

impl GateCheck for Panicking {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn run(&self, _draft: &Draft, _ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        panic!("check crashed")
    }
}

#[tokio::test]
async fn test_gate_holds_drafts_in_reservoir() {
    let h = harness().await;
    let mut strict = config(20);
    strict.gate.min_words = 5_000;
    let runner = h.runner(strict, ScriptedGenerator::new(&h.clock));

    runner.run(&create(&[KEYWORD])).await.unwrap();
    advance_to_reservoir(&h, &runner).await;

    let publish = runner.run(&TriggerRequest::new(Action::Publish)).await.unwrap();
    assert_eq!(publish.succeeded, 0);
    assert_eq!(publish.failed, 1);

    let held = h.only_draft().await;
    assert_eq!(held.current_phase, Phase::Reservoir);
    assert!(held.last_error.as_deref().unwrap().contains("content_length"));
    assert!(held.gate_report.as_deref().unwrap().contains("blocked"));

    // A crashing check blocks even though it is advisory
    let publisher = Publisher::new(
        h.db.drafts(),
        Gate::with_checks(GateConfig::default(), vec![Box::new(Panicking)]).unwrap(),
        Arc::new(config(1)),
        Arc::new(h.clock.clone()),
    );
    let budget = BudgetGuard::start(
        Arc::new(h.clock.clone()),
        Duration::from_secs(53),
        Duration::from_secs(8),
    );
    let summary = publisher.run(&Scope::default(), &budget).await.unwrap();
    assert_eq!(summary.held, 1);
    assert_eq!(summary.published, 0);

    let still_held = h.only_draft().await;
    assert_eq!(still_held.current_phase, Phase::Reservoir);
    assert!(still_held.last_error.as_deref().unwrap().contains("panicked"));
}

#[tokio::test]
async fn test_create_pairs_locales_and_rejects_duplicate_slugs() {
    let h = harness().await;
    let mut bilingual = config(1);
    bilingual.sites[0].locales.push("de".to_string());
    let runner = h.runner(bilingual, ScriptedGenerator::new(&h.clock));

    let mut request = create(&[KEYWORD]);
    request.pair_locale = Some("de".to_string());
    let first = runner.run(&request).await.unwrap();
    assert_eq!(first.succeeded, 1);
    assert_eq!(first.details["created"].as_array().unwrap().len(), 2);

    let drafts = h
        .db
        .drafts()
        .list_in_phase(Phase::Research, &Scope::default(), 10)
        .await
        .unwrap();
    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[0].paired_draft_id.as_deref(), Some(drafts[1].id.as_str()));
    assert_eq!(drafts[1].paired_draft_id.as_deref(), Some(drafts[0].id.as_str()));

    // Same keyword again collides on the slug
    let again = runner.run(&create(&["Hiking Boots!"])).await.unwrap();
    assert_eq!(again.processed, 1);
    assert_eq!(again.failed, 1);
    assert_eq!(again.details["skipped"][0]["reason"], "slug already in use");
}

#[tokio::test]
async fn test_scan_refreshes_gate_reports() {
    let h = harness().await;
    let mut strict = config(20);
    strict.gate.min_words = 5_000;
    let runner = h.runner(strict, ScriptedGenerator::new(&h.clock));

    runner.run(&create(&[KEYWORD])).await.unwrap();
    advance_to_reservoir(&h, &runner).await;

    let scan = runner.run(&TriggerRequest::new(Action::Scan)).await.unwrap();
    assert_eq!(scan.processed, 1);
    assert_eq!(scan.failed, 1);
    assert_eq!(scan.details["blocked"].as_array().unwrap().len(), 1);
    assert_eq!(scan.details["stuck"], serde_json::json!([]));

    // Scanning never moves a draft
    let draft = h.only_draft().await;
    assert_eq!(draft.current_phase, Phase::Reservoir);
    assert!(draft.gate_report.is_some());
}
