use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::PipelineConfig;

/// Wall-clock budget for one invocation.
///
/// The guard only decides whether to *start* the next unit of work. Work
/// already in flight is never interrupted.
pub struct BudgetGuard {
    clock: Arc<dyn Clock>,
    started_at: i64,
    budget_ms: i64,
    margin_ms: i64,
}

impl BudgetGuard {
    /// Start the budget at the clock's current time
    pub fn start(clock: Arc<dyn Clock>, budget: Duration, margin: Duration) -> Self {
        let started_at = clock.now_millis();
        Self {
            clock,
            started_at,
            budget_ms: budget.as_millis() as i64,
            margin_ms: margin.as_millis() as i64,
        }
    }

    pub fn from_config(clock: Arc<dyn Clock>, config: &PipelineConfig) -> Self {
        Self::start(
            clock,
            Duration::from_secs(config.budget_secs),
            Duration::from_secs(config.min_margin_secs),
        )
    }

    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.clock.now_millis() - self.started_at).max(0)
    }

    /// Budget left; negative once the budget is overrun
    pub fn remaining_ms(&self) -> i64 {
        self.budget_ms - self.elapsed_ms()
    }

    /// Whether there is enough budget left to begin another unit
    pub fn can_start_next(&self) -> bool {
        let remaining = self.remaining_ms();
        let ok = remaining >= self.margin_ms;
        if !ok {
            info!(
                remaining_ms = remaining,
                margin_ms = self.margin_ms,
                "Budget exhausted, deferring remaining work"
            );
        } else {
            debug!(remaining_ms = remaining, "Budget allows next unit");
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn guard(clock: &ManualClock) -> BudgetGuard {
        BudgetGuard::start(
            Arc::new(clock.clone()),
            Duration::from_secs(53),
            Duration::from_secs(8),
        )
    }

    #[test]
    fn fresh_budget_allows_work() {
        let clock = ManualClock::new(10_000);
        let guard = guard(&clock);
        assert_eq!(guard.remaining_ms(), 53_000);
        assert!(guard.can_start_next());
    }

    #[test]
    fn stops_when_remaining_below_margin() {
        let clock = ManualClock::new(0);
        let guard = guard(&clock);

        clock.advance_secs(45);
        assert_eq!(guard.remaining_ms(), 8_000);
        assert!(guard.can_start_next());

        clock.advance_millis(1);
        assert!(!guard.can_start_next());
    }

    #[test]
    fn overrun_goes_negative() {
        let clock = ManualClock::new(0);
        let guard = guard(&clock);
        clock.advance_secs(60);
        assert_eq!(guard.remaining_ms(), -7_000);
        assert_eq!(guard.elapsed_ms(), 60_000);
    }
}
