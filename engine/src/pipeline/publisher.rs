//! Selector / publisher
//!
//! Promotes gate-passed reservoir drafts to published under a per-run cap
//! and a per-(site, locale) daily cap. Drafts the gate blocks stay in the
//! reservoir with the report attached; they are never rejected here.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{utc_day_start, Clock};
use crate::config::Config;
use crate::db::{Draft, DraftRepository, Scope};
use crate::pipeline::budget::BudgetGuard;
use crate::pipeline::gate::{CheckResult, Gate, GateReport, GateVerdict};

/// Upper bound on reservoir rows read per run
const SCAN_LIMIT: i64 = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishSummary {
    /// Gate evaluations performed
    pub evaluated: u32,
    /// Drafts promoted, counterparts included
    pub published: u32,
    /// Counterparts promoted alongside their pair
    pub co_published: u32,
    /// Drafts the gate blocked
    pub held: u32,
    /// Gate-passed or unevaluated drafts skipped because a cap was reached
    pub capped: u32,
    /// Drafts not looked at because the budget ran out
    pub deferred: u32,
    pub published_ids: Vec<String>,
}

enum Decision {
    Published,
    Held,
    Capped,
}

pub struct Publisher {
    drafts: DraftRepository,
    gate: Gate,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
}

impl Publisher {
    pub fn new(drafts: DraftRepository, gate: Gate, config: Arc<Config>, clock: Arc<dyn Clock>) -> Self {
        Self {
            drafts,
            gate,
            config,
            clock,
        }
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Scan the reservoir oldest first and promote what the gate and caps allow
    pub async fn run(&self, scope: &Scope, budget: &BudgetGuard) -> Result<PublishSummary> {
        let candidates = self.drafts.list_reservoir(scope, SCAN_LIMIT).await?;
        let per_run_cap = self.config.publisher.per_run_cap;
        let mut summary = PublishSummary::default();
        let mut handled: HashSet<String> = HashSet::new();
        let mut promoted_primary = 0u32;

        info!(candidates = candidates.len(), per_run_cap, "Publisher scan started");

        for (index, draft) in candidates.iter().enumerate() {
            if handled.contains(&draft.id) {
                continue;
            }
            if !budget.can_start_next() {
                summary.deferred = candidates[index..]
                    .iter()
                    .filter(|d| !handled.contains(&d.id))
                    .count() as u32;
                info!(deferred = summary.deferred, "Budget exhausted; remaining candidates deferred");
                break;
            }
            if promoted_primary >= per_run_cap {
                summary.capped += 1;
                handled.insert(draft.id.clone());
                continue;
            }

            handled.insert(draft.id.clone());
            match self.consider(draft, &mut summary).await? {
                Decision::Published => {
                    promoted_primary += 1;
                    summary.published += 1;
                    summary.published_ids.push(draft.id.clone());
                }
                Decision::Held => summary.held += 1,
                Decision::Capped => summary.capped += 1,
            }

            if let Some(pair_id) = draft.paired_draft_id.as_deref() {
                if summary.published_ids.iter().any(|id| id == &draft.id) && !handled.contains(pair_id) {
                    self.co_publish(pair_id, budget, &mut summary, &mut handled).await?;
                }
            }
        }

        info!(
            evaluated = summary.evaluated,
            published = summary.published,
            held = summary.held,
            capped = summary.capped,
            deferred = summary.deferred,
            "Publisher scan finished"
        );
        Ok(summary)
    }

    /// Promote the bilingual counterpart of a just-published draft
    ///
    /// Exempt from the per-run cap; the counterpart's daily cap still applies.
    async fn co_publish(
        &self,
        pair_id: &str,
        budget: &BudgetGuard,
        summary: &mut PublishSummary,
        handled: &mut HashSet<String>,
    ) -> Result<()> {
        let Some(pair) = self.drafts.get(pair_id).await? else {
            return Ok(());
        };
        if pair.current_phase != crate::db::Phase::Reservoir {
            debug!(draft_id = %pair.id, phase = %pair.current_phase, "Counterpart not in reservoir");
            return Ok(());
        }
        if !budget.can_start_next() {
            return Ok(());
        }

        handled.insert(pair.id.clone());
        match self.consider(&pair, summary).await? {
            Decision::Published => {
                summary.published += 1;
                summary.co_published += 1;
                summary.published_ids.push(pair.id.clone());
                info!(draft_id = %pair.id, "Counterpart co-published");
            }
            Decision::Held => summary.held += 1,
            Decision::Capped => summary.capped += 1,
        }
        Ok(())
    }

    async fn consider(&self, draft: &Draft, summary: &mut PublishSummary) -> Result<Decision> {
        let now = self.clock.now_millis();

        let published_today = self
            .drafts
            .count_published_since(&draft.site_id, &draft.locale, utc_day_start(now))
            .await?;
        if published_today >= i64::from(self.config.publisher.daily_cap_per_locale) {
            debug!(
                draft_id = %draft.id,
                site_id = %draft.site_id,
                locale = %draft.locale,
                published_today,
                "Daily cap reached"
            );
            return Ok(Decision::Capped);
        }

        summary.evaluated += 1;
        let report = match self.config.site(&draft.site_id) {
            Ok(site) => self.gate.evaluate(draft, site),
            Err(e) => GateReport {
                verdict: GateVerdict::Blocked,
                checks: vec![CheckResult {
                    name: "route_exists".to_string(),
                    passed: false,
                    message: e.to_string(),
                    blocking: true,
                }],
            },
        };

        if !report.passed() {
            let reason = report.summary();
            warn!(draft_id = %draft.id, reason = %reason, "Gate held draft in reservoir");
            self.drafts
                .record_gate_report(&draft.id, &report.to_json(), Some(&reason), now)
                .await?;
            return Ok(Decision::Held);
        }

        if self.drafts.publish(&draft.id, &report.to_json(), now).await? {
            info!(draft_id = %draft.id, site_id = %draft.site_id, locale = %draft.locale, "Draft published");
            Ok(Decision::Published)
        } else {
            // Someone else moved it first
            debug!(draft_id = %draft.id, "Publish CAS lost");
            Ok(Decision::Held)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::GateConfig;
    use crate::db::{Database, NewDraft};
    use crate::pipeline::gate::{CheckOutcome, GateCheck, GateContext};
    use std::time::Duration;
    use tempfile::TempDir;

    const NOW: i64 = 1_710_084_600_000;

    struct TitleRequired;

    impl GateCheck for TitleRequired {
        fn name(&self) -> &'static str {
            "title_required"
        }

        fn blocking(&self) -> bool {
            true
        }

        fn run(&self, draft: &Draft, _ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
            Ok(match draft.title.as_deref() {
                Some(t) if !t.is_empty() => CheckOutcome::pass("title present"),
                _ => CheckOutcome::fail("title missing"),
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        db: Database,
        clock: ManualClock,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("test.db")).await.unwrap();
        Fixture {
            _dir: dir,
            db,
            clock: ManualClock::new(NOW),
        }
    }

    fn publisher(f: &Fixture, per_run_cap: u32, daily_cap: u32) -> Publisher {
        let mut config = Config::default_config();
        config.sites[0].locales = vec!["en".to_string(), "fr".to_string()];
        config.publisher.per_run_cap = per_run_cap;
        config.publisher.daily_cap_per_locale = daily_cap;
        let gate = Gate::with_checks(GateConfig::default(), vec![Box::new(TitleRequired)]).unwrap();
        Publisher::new(f.db.drafts(), gate, Arc::new(config), Arc::new(f.clock.clone()))
    }

    fn budget(f: &Fixture) -> BudgetGuard {
        BudgetGuard::start(
            Arc::new(f.clock.clone()),
            Duration::from_secs(60),
            Duration::from_secs(5),
        )
    }

    async fn reservoir_draft(f: &Fixture, keyword: &str, title: Option<&str>) -> String {
        let draft = f
            .db
            .drafts()
            .create(
                &NewDraft {
                    site_id: "main".to_string(),
                    locale: "en".to_string(),
                    keyword: keyword.to_string(),
                },
                NOW,
            )
            .await
            .unwrap();
        move_to_reservoir(f, &draft.id, title).await;
        draft.id
    }

    async fn move_to_reservoir(f: &Fixture, id: &str, title: Option<&str>) {
        sqlx::query("UPDATE drafts SET current_phase = 'reservoir', title = ? WHERE id = ?")
            .bind(title)
            .bind(id)
            .execute(f.db.pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_publishes_passing_and_holds_failing() {
        let f = fixture().await;
        let good = reservoir_draft(&f, "good one", Some("Good")).await;
        let bad = reservoir_draft(&f, "bad one", None).await;

        let summary = publisher(&f, 3, 5).run(&Scope::default(), &budget(&f)).await.unwrap();
        assert_eq!(summary.published, 1);
        assert_eq!(summary.held, 1);

        let published = f.db.drafts().get(&good).await.unwrap().unwrap();
        assert_eq!(published.current_phase, crate::db::Phase::Published);
        assert_eq!(published.completed_at, Some(NOW));

        let held = f.db.drafts().get(&bad).await.unwrap().unwrap();
        assert_eq!(held.current_phase, crate::db::Phase::Reservoir);
        assert!(held.last_error.unwrap().contains("title_required"));
        assert!(held.gate_report.unwrap().contains("blocked"));
    }

    #[tokio::test]
    async fn test_per_run_cap() {
        let f = fixture().await;
        for i in 0..4 {
            reservoir_draft(&f, &format!("topic {}", i), Some("T")).await;
        }

        let summary = publisher(&f, 2, 10).run(&Scope::default(), &budget(&f)).await.unwrap();
        assert_eq!(summary.published, 2);
        assert_eq!(summary.capped, 2);
        assert_eq!(summary.evaluated, 2);
    }

    #[tokio::test]
    async fn test_daily_cap_counts_earlier_runs() {
        let f = fixture().await;
        for i in 0..3 {
            reservoir_draft(&f, &format!("topic {}", i), Some("T")).await;
        }
        let p = publisher(&f, 1, 2);

        assert_eq!(p.run(&Scope::default(), &budget(&f)).await.unwrap().published, 1);
        assert_eq!(p.run(&Scope::default(), &budget(&f)).await.unwrap().published, 1);
        let third = p.run(&Scope::default(), &budget(&f)).await.unwrap();
        assert_eq!(third.published, 0);
        assert_eq!(third.capped, 1);

        // Next UTC day the cap resets
        f.clock.advance_secs(86_400);
        assert_eq!(p.run(&Scope::default(), &budget(&f)).await.unwrap().published, 1);
    }

    #[tokio::test]
    async fn test_counterpart_co_published_beyond_run_cap() {
        let f = fixture().await;
        let (en, fr) = f
            .db
            .drafts()
            .create_pair(
                &NewDraft {
                    site_id: "main".to_string(),
                    locale: "en".to_string(),
                    keyword: "trail running".to_string(),
                },
                "fr",
                NOW,
            )
            .await
            .unwrap();
        move_to_reservoir(&f, &en.id, Some("Trail running")).await;
        move_to_reservoir(&f, &fr.id, Some("Course en sentier")).await;

        let summary = publisher(&f, 1, 5).run(&Scope::default(), &budget(&f)).await.unwrap();
        assert_eq!(summary.published, 2);
        assert_eq!(summary.co_published, 1);

        for id in [&en.id, &fr.id] {
            let draft = f.db.drafts().get(id).await.unwrap().unwrap();
            assert_eq!(draft.current_phase, crate::db::Phase::Published);
        }
    }

    #[tokio::test]
    async fn test_exhausted_budget_defers_everything() {
        let f = fixture().await;
        reservoir_draft(&f, "late", Some("Late")).await;
        let guard = budget(&f);
        f.clock.advance_secs(58);

        let summary = publisher(&f, 3, 5).run(&Scope::default(), &guard).await.unwrap();
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.evaluated, 0);
        assert_eq!(summary.published, 0);
    }
}
