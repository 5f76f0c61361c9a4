//! Claim allocator
//!
//! Hands out at most one draft per call by flipping it to `generating` in a
//! single conditional UPDATE. Drafts held in `generating` past the staleness
//! threshold are reported as stuck for an operator; they are never reclaimed
//! automatically, since their phase may already have spent AI budget.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::db::{Draft, DraftRepository, Phase, Scope};
use sdk::errors::EngineError;

/// A draft held in `generating` for longer than the threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StuckDraft {
    pub id: String,
    pub site_id: String,
    pub locale: String,
    pub phase: Phase,
    pub phase_started_at: i64,
    pub stuck_for_secs: i64,
}

pub struct ClaimAllocator {
    drafts: DraftRepository,
    clock: Arc<dyn Clock>,
    stuck_after_ms: i64,
}

impl ClaimAllocator {
    pub fn new(drafts: DraftRepository, clock: Arc<dyn Clock>, stuck_after_secs: u64) -> Self {
        Self {
            drafts,
            clock,
            stuck_after_ms: stuck_after_secs as i64 * 1000,
        }
    }

    /// Claim the oldest eligible draft in one phase, skipping `exclude`
    pub async fn claim(
        &self,
        phase: Phase,
        scope: &Scope,
        exclude: &[String],
    ) -> Result<Option<Draft>, EngineError> {
        let now = self.clock.now_millis();
        self.drafts
            .claim_excluding(phase, scope, exclude, now)
            .await
            .map_err(|e| EngineError::ClaimFailed(format!("{:#}", e)))
    }

    /// Claim from the earliest phase that has an eligible draft
    ///
    /// Drafts in `exclude` were already handled by the current invocation and
    /// must wait for the next one.
    pub async fn claim_next(
        &self,
        scope: &Scope,
        exclude: &[String],
    ) -> Result<Option<Draft>, EngineError> {
        for phase in Phase::ACTIVE {
            if let Some(draft) = self.claim(phase, scope, exclude).await? {
                debug!(draft_id = %draft.id, phase = %phase, "Claimed draft");
                return Ok(Some(draft));
            }
        }
        Ok(None)
    }

    /// Drafts held in `generating` longer than the staleness threshold
    pub async fn find_stuck(&self) -> Result<Vec<StuckDraft>> {
        let now = self.clock.now_millis();
        let stuck = self.drafts.find_stuck(now - self.stuck_after_ms).await?;

        Ok(stuck
            .into_iter()
            .map(|draft| {
                let started = draft.phase_started_at.unwrap_or(now);
                let stuck = StuckDraft {
                    stuck_for_secs: (now - started) / 1000,
                    id: draft.id,
                    site_id: draft.site_id,
                    locale: draft.locale,
                    phase: draft.current_phase,
                    phase_started_at: started,
                };
                warn!(
                    draft_id = %stuck.id,
                    phase = %stuck.phase,
                    stuck_for_secs = stuck.stuck_for_secs,
                    "Draft stuck in generating"
                );
                stuck
            })
            .collect())
    }
}
