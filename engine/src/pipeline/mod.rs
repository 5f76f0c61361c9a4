//! Content pipeline
//!
//! A draft moves through research → outline → drafting → assembly → images →
//! seo → scoring → reservoir, one phase per unit of work, then the publisher
//! promotes it (or leaves it in the reservoir with a gate report). All
//! coordination between overlapping invocations goes through the draft rows:
//! the claim allocator is the only concurrency primitive.

use async_trait::async_trait;
use serde::Serialize;

use crate::llm::{GenerateOptions, GenerationResult, Message, ProviderKey};

pub mod budget;
pub mod claim;
pub mod executor;
pub mod gate;
pub mod health;
pub mod phases;
pub mod publisher;
pub mod runner;

pub use budget::BudgetGuard;
pub use claim::ClaimAllocator;
pub use executor::{PhaseExecutor, UnitOutcome};
pub use gate::{CheckResult, Gate, GateReport, GateVerdict};
pub use health::{HealthReport, HealthStatus};
pub use publisher::{PublishSummary, Publisher};
pub use runner::{PipelineRunner, RunSummary};

/// Source of AI-generated text for the phases
///
/// Implemented by the provider router; tests substitute scripted generators.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate for a task type (`research`, `outline`, ...)
    ///
    /// Never errors: exhaustion is a `GenerationResult::Failure`.
    async fn generate(
        &self,
        task_type: &str,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> GenerationResult;

    /// Providers that have a credential and could be attempted
    fn configured_providers(&self) -> Vec<ProviderKey>;

    fn any_provider_configured(&self) -> bool {
        !self.configured_providers().is_empty()
    }
}

/// How a unit of work ended, when it did not simply succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The phase failed and will be retried by a later invocation
    Recoverable,
    /// The phase failed for the last allowed time; the draft is rejected
    ExhaustedRetries,
    /// A blocking gate check failed; the draft stays in the reservoir
    GateBlocked,
    /// Not started because the budget ran out; not an error
    BudgetDeferred,
    /// No AI provider is configured; nothing can progress
    Configuration,
}
