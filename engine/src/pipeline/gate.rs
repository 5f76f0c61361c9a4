//! Pre-publication gate
//!
//! A fixed, ordered list of independent checks run against an assembled
//! draft. The verdict is fail-closed: a blocking check that fails, or any
//! check that returns an error or panics, blocks publication. The gate has
//! no side effects; the publisher decides what to do with the report.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::config::{GateConfig, SiteConfig};
use crate::content_analyzer::ContentAnalyzer;
use crate::db::Draft;

/// Result of one check, as reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub blocking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateVerdict {
    Passed,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub verdict: GateVerdict,
    pub checks: Vec<CheckResult>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.verdict == GateVerdict::Passed
    }

    /// Blocking checks that did not pass
    pub fn blocking_failures(&self) -> Vec<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.blocking && !c.passed)
            .collect()
    }

    /// One-line summary of why the gate blocked, for `last_error`
    pub fn summary(&self) -> String {
        let failures = self
            .blocking_failures()
            .iter()
            .map(|c| format!("{}: {}", c.name, c.message))
            .collect::<Vec<_>>();
        if failures.is_empty() {
            "gate passed".to_string()
        } else {
            format!("gate blocked ({})", failures.join("; "))
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// What a check reports when it ran to completion
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub passed: bool,
    pub message: String,
}

impl CheckOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }

    fn from_bool(passed: bool, message: String) -> Self {
        Self { passed, message }
    }
}

/// Inputs shared by every check
pub struct GateContext<'a> {
    pub site: &'a SiteConfig,
    pub config: &'a GateConfig,
    pub analyzer: &'a ContentAnalyzer,
}

/// One independent gate check
pub trait GateCheck: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a failure of this check blocks publication
    fn blocking(&self) -> bool;

    fn run(&self, draft: &Draft, ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome>;
}

pub struct Gate {
    checks: Vec<Box<dyn GateCheck>>,
    config: GateConfig,
    analyzer: ContentAnalyzer,
}

impl Gate {
    /// Gate with the standard twelve checks
    pub fn standard(config: GateConfig) -> anyhow::Result<Self> {
        Self::with_checks(config, standard_checks())
    }

    pub fn with_checks(config: GateConfig, checks: Vec<Box<dyn GateCheck>>) -> anyhow::Result<Self> {
        Ok(Self {
            checks,
            config,
            analyzer: ContentAnalyzer::new()?,
        })
    }

    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check and compute the verdict
    pub fn evaluate(&self, draft: &Draft, site: &SiteConfig) -> GateReport {
        let ctx = GateContext {
            site,
            config: &self.config,
            analyzer: &self.analyzer,
        };

        let mut results = Vec::with_capacity(self.checks.len());
        let mut blocked = false;

        for check in &self.checks {
            let outcome = catch_unwind(AssertUnwindSafe(|| check.run(draft, &ctx)));
            let result = match outcome {
                Ok(Ok(outcome)) => CheckResult {
                    name: check.name().to_string(),
                    passed: outcome.passed,
                    message: outcome.message,
                    blocking: check.blocking(),
                },
                // A check that could not run is a failed blocking check
                Ok(Err(e)) => CheckResult {
                    name: check.name().to_string(),
                    passed: false,
                    message: format!("check errored: {:#}", e),
                    blocking: true,
                },
                Err(panic) => CheckResult {
                    name: check.name().to_string(),
                    passed: false,
                    message: format!("check panicked: {}", panic_message(&panic)),
                    blocking: true,
                },
            };

            if result.blocking && !result.passed {
                blocked = true;
            }
            results.push(result);
        }

        let verdict = if blocked {
            GateVerdict::Blocked
        } else {
            GateVerdict::Passed
        };
        tracing::debug!(draft_id = %draft.id, ?verdict, "Gate evaluated");

        GateReport {
            verdict,
            checks: results,
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub fn standard_checks() -> Vec<Box<dyn GateCheck>> {
    vec![
        Box::new(RouteExists),
        Box::new(SeoScore),
        Box::new(MetadataPresent),
        Box::new(ContentLength),
        Box::new(HeadingHierarchy),
        Box::new(TargetWordCount),
        Box::new(InternalLinks),
        Box::new(Readability),
        Box::new(ImageAltText),
        Box::new(AuthorAttribution),
        Box::new(StructuredData),
        Box::new(Authenticity),
    ]
}

fn content(draft: &Draft) -> &str {
    draft.content.as_deref().unwrap_or("")
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

struct RouteExists;

impl GateCheck for RouteExists {
    fn name(&self) -> &'static str {
        "route_exists"
    }

    fn blocking(&self) -> bool {
        true
    }

    fn run(&self, draft: &Draft, ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        Ok(match ctx.site.route_for(&draft.locale, &draft.slug) {
            Some(route) => CheckOutcome::pass(route),
            None => CheckOutcome::fail(format!(
                "site '{}' has no route for locale '{}' and slug '{}'",
                ctx.site.id, draft.locale, draft.slug
            )),
        })
    }
}

struct SeoScore;

impl GateCheck for SeoScore {
    fn name(&self) -> &'static str {
        "seo_score"
    }

    fn blocking(&self) -> bool {
        true
    }

    fn run(&self, draft: &Draft, ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        Ok(match draft.seo_score {
            Some(score) => CheckOutcome::from_bool(
                score >= ctx.config.min_seo_score,
                format!("score {:.0} (min {:.0})", score, ctx.config.min_seo_score),
            ),
            None => CheckOutcome::fail("no SEO score"),
        })
    }
}

struct MetadataPresent;

impl GateCheck for MetadataPresent {
    fn name(&self) -> &'static str {
        "metadata_present"
    }

    fn blocking(&self) -> bool {
        true
    }

    fn run(&self, draft: &Draft, _ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        let missing: Vec<&str> = [
            ("title", &draft.title),
            ("meta_title", &draft.meta_title),
            ("meta_description", &draft.meta_description),
        ]
        .into_iter()
        .filter(|(_, value)| !present(value))
        .map(|(name, _)| name)
        .collect();

        Ok(if missing.is_empty() {
            CheckOutcome::pass("title and meta present")
        } else {
            CheckOutcome::fail(format!("missing {}", missing.join(", ")))
        })
    }
}

struct ContentLength;

impl GateCheck for ContentLength {
    fn name(&self) -> &'static str {
        "content_length"
    }

    fn blocking(&self) -> bool {
        true
    }

    fn run(&self, draft: &Draft, ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        let words = ctx.analyzer.word_count(content(draft));
        Ok(CheckOutcome::from_bool(
            words >= ctx.config.min_words as usize,
            format!("{} words (min {})", words, ctx.config.min_words),
        ))
    }
}

struct HeadingHierarchy;

impl GateCheck for HeadingHierarchy {
    fn name(&self) -> &'static str {
        "heading_hierarchy"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn run(&self, draft: &Draft, ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        Ok(match ctx.analyzer.check_heading_hierarchy(content(draft)) {
            Ok(()) => CheckOutcome::pass("headings nest correctly"),
            Err(reason) => CheckOutcome::fail(reason),
        })
    }
}

struct TargetWordCount;

impl GateCheck for TargetWordCount {
    fn name(&self) -> &'static str {
        "target_word_count"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn run(&self, draft: &Draft, ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        let words = ctx.analyzer.word_count(content(draft));
        // Within 20% below target counts as on target
        let floor = (ctx.site.target_word_count as f64 * 0.8).round() as usize;
        Ok(CheckOutcome::from_bool(
            words >= floor,
            format!("{} words (target {})", words, ctx.site.target_word_count),
        ))
    }
}

struct InternalLinks;

impl GateCheck for InternalLinks {
    fn name(&self) -> &'static str {
        "internal_links"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn run(&self, draft: &Draft, ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        let links = ctx.analyzer.internal_links(content(draft)).len();
        Ok(CheckOutcome::from_bool(
            links >= ctx.config.min_internal_links as usize,
            format!("{} internal links (min {})", links, ctx.config.min_internal_links),
        ))
    }
}

struct Readability;

impl GateCheck for Readability {
    fn name(&self) -> &'static str {
        "readability"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn run(&self, draft: &Draft, ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        let score = ctx.analyzer.readability(content(draft));
        Ok(CheckOutcome::from_bool(
            score >= ctx.config.min_readability,
            format!("reading ease {:.1} (min {:.0})", score, ctx.config.min_readability),
        ))
    }
}

struct ImageAltText;

impl GateCheck for ImageAltText {
    fn name(&self) -> &'static str {
        "image_alt_text"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn run(&self, draft: &Draft, _ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        if draft.images.is_empty() {
            return Ok(CheckOutcome::fail("no images planned"));
        }
        let with_alt = draft
            .images
            .iter()
            .filter(|image| !image.alt.trim().is_empty())
            .count();
        Ok(CheckOutcome::from_bool(
            with_alt == draft.images.len(),
            format!("{}/{} images have alt text", with_alt, draft.images.len()),
        ))
    }
}

struct AuthorAttribution;

impl GateCheck for AuthorAttribution {
    fn name(&self) -> &'static str {
        "author_attribution"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn run(&self, draft: &Draft, _ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        Ok(match draft.author.as_deref().filter(|a| !a.trim().is_empty()) {
            Some(author) => CheckOutcome::pass(format!("by {}", author)),
            None => CheckOutcome::fail("no author"),
        })
    }
}

struct StructuredData;

impl GateCheck for StructuredData {
    fn name(&self) -> &'static str {
        "structured_data"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn run(&self, draft: &Draft, _ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        let Some(raw) = draft.structured_data.as_deref() else {
            return Ok(CheckOutcome::fail("no structured data"));
        };
        let value: serde_json::Value = serde_json::from_str(raw)?;
        Ok(match value.get("@type").and_then(|t| t.as_str()) {
            Some(kind) => CheckOutcome::pass(format!("JSON-LD {}", kind)),
            None => CheckOutcome::fail("JSON-LD has no @type"),
        })
    }
}

struct Authenticity;

impl GateCheck for Authenticity {
    fn name(&self) -> &'static str {
        "authenticity"
    }

    fn blocking(&self) -> bool {
        false
    }

    fn run(&self, draft: &Draft, ctx: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
        let text = content(draft);
        let cliches = ctx.analyzer.cliche_hits(text).len();
        let signals = ctx.analyzer.authenticity_signals(text);
        Ok(CheckOutcome::from_bool(
            cliches <= ctx.config.max_cliche_hits as usize && signals >= 1,
            format!(
                "{} cliches (max {}), {} authenticity signals",
                cliches, ctx.config.max_cliche_hits, signals
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{DraftStatus, ImageSpec, Phase};

    fn site() -> SiteConfig {
        let mut site = Config::default_config().sites.remove(0);
        site.locales = vec!["en".to_string(), "es".to_string()];
        site
    }

    fn assembled_draft() -> Draft {
        let body = "We tested twelve boots over 40 km of trail in 2023. The fit was good. ".repeat(120);
        let content = format!(
            "## Fit\n\n{}\n\n## Care\n\nSee [care](/care), [fit](/fit) and [sizes](/sizes).\n",
            body
        );
        Draft {
            id: "d1".to_string(),
            site_id: "main".to_string(),
            locale: "en".to_string(),
            keyword: "hiking boots".to_string(),
            slug: "hiking-boots".to_string(),
            current_phase: Phase::Reservoir,
            status: DraftStatus::Idle,
            phase_attempts: 0,
            last_error: None,
            phase_started_at: None,
            quality_score: Some(80.0),
            seo_score: Some(75.0),
            word_count: 0,
            sections_total: 2,
            sections_completed: 2,
            paired_draft_id: None,
            rejection_reason: None,
            research_notes: None,
            outline: vec!["Fit".to_string(), "Care".to_string()],
            sections: vec![],
            content: Some(content),
            title: Some("Hiking boots".to_string()),
            meta_title: Some("Hiking boots tested".to_string()),
            meta_description: Some("What we learned".to_string()),
            images: vec![ImageSpec {
                prompt: "boots".to_string(),
                alt: "A pair of boots".to_string(),
            }],
            structured_data: Some(r#"{"@type":"BlogPosting"}"#.to_string()),
            author: Some("Editorial Team".to_string()),
            gate_report: None,
            created_at: 0,
            updated_at: 0,
            completed_at: None,
        }
    }

    struct Erroring;

    impl GateCheck for Erroring {
        fn name(&self) -> &'static str {
            "erroring"
        }
        fn blocking(&self) -> bool {
            false
        }
        fn run(&self, _: &Draft, _: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
            anyhow::bail!("backing service unavailable")
        }
    }

    struct Panicking;

    impl GateCheck for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }
        fn blocking(&self) -> bool {
            false
        }
        fn run(&self, _: &Draft, _: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
            panic!("index out of bounds")
        }
    }

    struct AlwaysPass;

    impl GateCheck for AlwaysPass {
        fn name(&self) -> &'static str {
            "always_pass"
        }
        fn blocking(&self) -> bool {
            true
        }
        fn run(&self, _: &Draft, _: &GateContext<'_>) -> anyhow::Result<CheckOutcome> {
            Ok(CheckOutcome::pass("ok"))
        }
    }

    #[test]
    fn test_standard_gate_has_twelve_ordered_checks() {
        let gate = Gate::standard(GateConfig::default()).unwrap();
        let names = gate.check_names();
        assert_eq!(names.len(), 12);
        assert_eq!(names[0], "route_exists");
        assert_eq!(names[11], "authenticity");
    }

    #[test]
    fn test_assembled_draft_passes() {
        let gate = Gate::standard(GateConfig::default()).unwrap();
        let report = gate.evaluate(&assembled_draft(), &site());
        assert!(report.passed(), "{}", report.summary());
        assert_eq!(report.checks.len(), 12);
    }

    #[test]
    fn test_blocking_failures_block() {
        let gate = Gate::standard(GateConfig::default()).unwrap();
        let mut draft = assembled_draft();
        draft.seo_score = Some(10.0);
        draft.meta_title = None;

        let report = gate.evaluate(&draft, &site());
        assert_eq!(report.verdict, GateVerdict::Blocked);
        let names: Vec<&str> = report
            .blocking_failures()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["seo_score", "metadata_present"]);
        assert!(report.summary().starts_with("gate blocked"));
    }

    #[test]
    fn test_unserved_locale_blocks() {
        let gate = Gate::standard(GateConfig::default()).unwrap();
        let mut draft = assembled_draft();
        draft.locale = "fr".to_string();
        let report = gate.evaluate(&draft, &site());
        assert!(!report.passed());
        assert!(!report.checks[0].passed);
    }

    #[test]
    fn test_advisory_failures_do_not_block() {
        let gate = Gate::standard(GateConfig::default()).unwrap();
        let mut draft = assembled_draft();
        draft.author = None;
        draft.images.clear();

        let report = gate.evaluate(&draft, &site());
        assert!(report.passed());
        assert!(report.checks.iter().any(|c| c.name == "author_attribution" && !c.passed));
    }

    #[test]
    fn test_erroring_check_fails_closed() {
        let gate = Gate::with_checks(
            GateConfig::default(),
            vec![Box::new(AlwaysPass), Box::new(Erroring)],
        )
        .unwrap();

        let report = gate.evaluate(&assembled_draft(), &site());
        assert_eq!(report.verdict, GateVerdict::Blocked);
        let failed = &report.checks[1];
        assert!(failed.blocking);
        assert!(failed.message.contains("backing service unavailable"));
    }

    #[test]
    fn test_panicking_check_fails_closed() {
        let gate = Gate::with_checks(
            GateConfig::default(),
            vec![Box::new(Panicking), Box::new(AlwaysPass)],
        )
        .unwrap();

        let report = gate.evaluate(&assembled_draft(), &site());
        assert_eq!(report.verdict, GateVerdict::Blocked);
        assert!(report.checks[0].message.contains("index out of bounds"));
        // Later checks still run
        assert!(report.checks[1].passed);
    }

    #[test]
    fn test_malformed_structured_data_fails_closed() {
        let gate = Gate::standard(GateConfig::default()).unwrap();
        let mut draft = assembled_draft();
        draft.structured_data = Some("{not json".to_string());

        let report = gate.evaluate(&draft, &site());
        assert!(!report.passed());
        assert!(report
            .checks
            .iter()
            .any(|c| c.name == "structured_data" && c.blocking && !c.passed));
    }

    #[test]
    fn test_report_round_trips_as_json() {
        let gate = Gate::standard(GateConfig::default()).unwrap();
        let report = gate.evaluate(&assembled_draft(), &site());
        let parsed: GateReport = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(parsed, report);
    }
}
