//! Phase executor
//!
//! One unit of work: claim one draft, run exactly one phase for it, persist
//! the outcome in a single compare-and-swap write. Per-draft errors become
//! outcomes; only a claim allocator failure is returned as an error.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::content_analyzer::ContentAnalyzer;
use crate::db::{Draft, DraftRepository, FailureRecord, Phase, Scope};
use crate::pipeline::claim::ClaimAllocator;
use crate::pipeline::phases::{self, PhaseContext, PhaseOutput};
use crate::pipeline::{FailureKind, TextGenerator};
use sdk::errors::EngineError;

/// How one unit of work ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// Nothing eligible to claim
    Idle,
    Advanced {
        draft_id: String,
        from: Phase,
        to: Phase,
    },
    /// Partial work persisted; phase and attempts unchanged
    Progressed { draft_id: String, phase: Phase },
    Failed {
        draft_id: String,
        phase: Phase,
        kind: FailureKind,
        error: String,
    },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Advanced { .. } | UnitOutcome::Progressed { .. })
    }
}

pub struct PhaseExecutor {
    drafts: DraftRepository,
    allocator: ClaimAllocator,
    generator: Arc<dyn TextGenerator>,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    analyzer: ContentAnalyzer,
}

impl PhaseExecutor {
    pub fn new(
        drafts: DraftRepository,
        generator: Arc<dyn TextGenerator>,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let allocator = ClaimAllocator::new(
            drafts.clone(),
            clock.clone(),
            config.pipeline.stuck_after_secs,
        );
        Ok(Self {
            drafts,
            allocator,
            generator,
            config,
            clock,
            analyzer: ContentAnalyzer::new()?,
        })
    }

    pub fn allocator(&self) -> &ClaimAllocator {
        &self.allocator
    }

    /// Claim one draft outside `exclude` and execute one phase for it
    pub async fn run_unit(
        &self,
        scope: &Scope,
        exclude: &[String],
    ) -> Result<UnitOutcome, EngineError> {
        let Some(draft) = self.allocator.claim_next(scope, exclude).await? else {
            return Ok(UnitOutcome::Idle);
        };
        let phase = draft.current_phase;
        info!(draft_id = %draft.id, phase = %phase, attempts = draft.phase_attempts, "Executing phase");

        let output = match self.config.site(&draft.site_id) {
            Ok(site) => {
                let ctx = PhaseContext {
                    site,
                    pipeline: &self.config.pipeline,
                    gate: &self.config.gate,
                    max_tokens: self.config.llm.max_tokens,
                    generator: self.generator.as_ref(),
                    analyzer: &self.analyzer,
                };
                phases::execute(phase, &draft, &ctx).await
            }
            Err(e) => PhaseOutput::Failed(e.to_string()),
        };

        Ok(self.persist(&draft, phase, output).await)
    }

    async fn persist(&self, draft: &Draft, phase: Phase, output: PhaseOutput) -> UnitOutcome {
        let now = self.clock.now_millis();

        match output {
            PhaseOutput::Advance(fields) => {
                match self.drafts.advance(&draft.id, phase, &fields, now).await {
                    Ok(to) => {
                        info!(draft_id = %draft.id, from = %phase, to = %to, "Phase complete");
                        UnitOutcome::Advanced {
                            draft_id: draft.id.clone(),
                            from: phase,
                            to,
                        }
                    }
                    Err(e) => self.release_after_write_error(draft, phase, e, now).await,
                }
            }
            PhaseOutput::Progress(fields) => {
                match self.drafts.record_progress(&draft.id, phase, &fields, now).await {
                    Ok(()) => {
                        info!(
                            draft_id = %draft.id,
                            phase = %phase,
                            sections_completed = fields.sections_completed.unwrap_or_default(),
                            "Phase progressed"
                        );
                        UnitOutcome::Progressed {
                            draft_id: draft.id.clone(),
                            phase,
                        }
                    }
                    Err(e) => self.release_after_write_error(draft, phase, e, now).await,
                }
            }
            PhaseOutput::Failed(reason) => {
                match self.drafts.record_failure(&draft.id, phase, &reason, now).await {
                    Ok(record) => failure_outcome(draft, phase, reason, record),
                    Err(e) => unwritten(draft, phase, e),
                }
            }
        }
    }

    /// The outcome write failed after the phase ran
    ///
    /// A lost claim belongs to whoever holds the draft now. Any other error
    /// is recorded as a failed attempt so the draft leaves `generating` and
    /// counts toward its retry limit.
    async fn release_after_write_error(
        &self,
        draft: &Draft,
        phase: Phase,
        e: anyhow::Error,
        now: i64,
    ) -> UnitOutcome {
        if is_lost_claim(&e) {
            return unwritten(draft, phase, e);
        }

        let reason = format!("{:#}", e);
        error!(draft_id = %draft.id, phase = %phase, error = %reason, "Failed to persist phase outcome");
        match self.drafts.record_failure(&draft.id, phase, &reason, now).await {
            Ok(record) => failure_outcome(draft, phase, reason, record),
            Err(e) => unwritten(draft, phase, e),
        }
    }
}

fn failure_outcome(draft: &Draft, phase: Phase, reason: String, record: FailureRecord) -> UnitOutcome {
    let kind = if record.rejected {
        warn!(draft_id = %draft.id, phase = %phase, error = %reason, "Draft rejected after max attempts");
        FailureKind::ExhaustedRetries
    } else {
        warn!(
            draft_id = %draft.id,
            phase = %phase,
            attempts = record.phase_attempts,
            error = %reason,
            "Phase failed"
        );
        FailureKind::Recoverable
    };
    UnitOutcome::Failed {
        draft_id: draft.id.clone(),
        phase,
        kind,
        error: reason,
    }
}

/// Nothing about the outcome reached the store
fn unwritten(draft: &Draft, phase: Phase, e: anyhow::Error) -> UnitOutcome {
    let error = format!("{:#}", e);
    if is_lost_claim(&e) {
        warn!(draft_id = %draft.id, phase = %phase, error = %error, "Claim lost before outcome was written");
    } else {
        error!(draft_id = %draft.id, phase = %phase, error = %error, "Failed to release draft");
    }
    UnitOutcome::Failed {
        draft_id: draft.id.clone(),
        phase,
        kind: FailureKind::Recoverable,
        error,
    }
}

fn is_lost_claim(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<EngineError>(),
        Some(EngineError::LostClaim { .. })
    )
}
