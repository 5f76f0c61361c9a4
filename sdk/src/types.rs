//! Trigger request/response types
//!
//! These are the wire types of the scheduler-facing trigger endpoint. The
//! engine produces a `TriggerResponse` from each run summary; the api-server
//! and the CLI both speak these shapes.

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline action requested by a scheduler
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Claim drafts and execute one phase each
    Advance,

    /// Run the gate over reservoir drafts and promote passing ones
    Publish,

    /// Run the gate over reservoir drafts without promoting anything
    Scan,

    /// Create research-phase drafts from a keyword list
    Create,

    /// Report stuck drafts and provider configuration health
    Health,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Advance => "advance",
            Action::Publish => "publish",
            Action::Scan => "scan",
            Action::Create => "create",
            Action::Health => "health",
        }
    }

    /// Name written to the audit log for runs of this action
    pub fn job_name(&self) -> String {
        format!("pipeline.{}", self.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advance" => Ok(Action::Advance),
            "publish" => Ok(Action::Publish),
            "scan" => Ok(Action::Scan),
            "create" => Ok(Action::Create),
            "health" => Ok(Action::Health),
            other => Err(EngineError::UnknownAction(other.to_string())),
        }
    }
}

/// Body of `POST /api/pipeline/trigger`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub action: Action,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    /// Keywords for the `create` action
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,

    /// Second locale for bilingual pairs created by the `create` action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_locale: Option<String>,
}

impl TriggerRequest {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            site_id: None,
            locale: None,
            keywords: Vec::new(),
            pair_locale: None,
        }
    }

    pub fn with_scope(mut self, site_id: impl Into<String>, locale: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self.locale = Some(locale.into());
        self
    }
}

/// Response of `POST /api/pipeline/trigger`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub success: bool,
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub deferred: u32,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_uses_camel_case() {
        let json = r#"{"action":"advance","siteId":"blog","locale":"en"}"#;
        let req: TriggerRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.action, Action::Advance);
        assert_eq!(req.site_id.as_deref(), Some("blog"));
        assert!(req.keywords.is_empty());
    }

    #[test]
    fn test_response_field_names() {
        let resp = TriggerResponse {
            success: true,
            processed: 2,
            succeeded: 1,
            failed: 1,
            deferred: 3,
            duration_ms: 1200,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["durationMs"], 1200);
        assert_eq!(json["deferred"], 3);
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("publish".parse::<Action>().unwrap(), Action::Publish);
        assert!("explode".parse::<Action>().is_err());
        assert_eq!(Action::Scan.job_name(), "pipeline.scan");
    }
}
