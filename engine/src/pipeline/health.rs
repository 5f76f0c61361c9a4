//! Pipeline health report

use serde::Serialize;
use std::collections::BTreeMap;

use crate::db::Phase;
use crate::llm::ProviderKey;
use crate::pipeline::claim::StuckDraft;

pub const NO_PROVIDER_BLOCKER: &str =
    "no AI provider configured: set at least one provider API key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Work can progress but an operator should look at stuck drafts
    Degraded,
    /// Nothing can progress until configuration is fixed
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub configured_providers: Vec<ProviderKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_blocker: Option<String>,
    pub stuck: Vec<StuckDraft>,
    pub phase_counts: BTreeMap<String, i64>,
}

impl HealthReport {
    pub fn new(
        configured_providers: Vec<ProviderKey>,
        stuck: Vec<StuckDraft>,
        phase_counts: Vec<(Phase, i64)>,
    ) -> Self {
        let config_blocker = configured_providers
            .is_empty()
            .then(|| NO_PROVIDER_BLOCKER.to_string());

        let status = if config_blocker.is_some() {
            HealthStatus::Blocked
        } else if !stuck.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            configured_providers,
            config_blocker,
            stuck,
            phase_counts: phase_counts
                .into_iter()
                .map(|(phase, count)| (phase.as_str().to_string(), count))
                .collect(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
