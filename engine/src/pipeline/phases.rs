//! Phase work
//!
//! Each phase is a function of (draft snapshot, text generator, site config)
//! to new fields plus an outcome. Phases never touch the store; the executor
//! persists what they return.

use serde::Deserialize;
use serde_json::json;

use crate::config::{GateConfig, PipelineConfig, SiteConfig};
use crate::content_analyzer::ContentAnalyzer;
use crate::db::{Draft, DraftFields, ImageSpec, Phase};
use crate::llm::{strip_code_fence, GenerateOptions, GenerationResult, Message};
use crate::pipeline::TextGenerator;

pub const MIN_OUTLINE_SECTIONS: usize = 3;
pub const MAX_OUTLINE_SECTIONS: usize = 12;

/// Weight of the AI review in the blended quality score
const AI_REVIEW_WEIGHT: f64 = 0.7;

/// What a phase produced
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutput {
    /// Phase complete; advance to the next phase
    Advance(DraftFields),
    /// Partial work to keep; same phase, attempts untouched
    Progress(DraftFields),
    /// Recoverable failure with a human-readable cause
    Failed(String),
}

/// Everything a phase may read besides the draft itself
pub struct PhaseContext<'a> {
    pub site: &'a SiteConfig,
    pub pipeline: &'a PipelineConfig,
    pub gate: &'a GateConfig,
    pub max_tokens: u32,
    pub generator: &'a dyn TextGenerator,
    pub analyzer: &'a ContentAnalyzer,
}

impl PhaseContext<'_> {
    async fn ask(&self, task_type: &str, system: String, user: String) -> Result<String, String> {
        let messages = [Message::system(system), Message::user(user)];
        let options = GenerateOptions::with_max_tokens(self.max_tokens);
        match self.generator.generate(task_type, &messages, &options).await {
            GenerationResult::Success(success) if !success.content.trim().is_empty() => {
                Ok(success.content)
            }
            GenerationResult::Success(success) => Err(format!(
                "{} returned empty content for {}",
                success.provider, task_type
            )),
            GenerationResult::Failure(failure) => Err(failure.describe()),
        }
    }
}

/// Run the work of `phase` for `draft`
pub async fn execute(phase: Phase, draft: &Draft, ctx: &PhaseContext<'_>) -> PhaseOutput {
    match phase {
        Phase::Research => research(draft, ctx).await,
        Phase::Outline => outline(draft, ctx).await,
        Phase::Drafting => drafting(draft, ctx).await,
        Phase::Assembly => assembly(draft, ctx),
        Phase::Images => images(draft, ctx).await,
        Phase::Seo => seo(draft, ctx).await,
        Phase::Scoring => scoring(draft, ctx).await,
        Phase::Reservoir | Phase::Published | Phase::Rejected => {
            PhaseOutput::Failed(format!("phase {} has no work", phase))
        }
    }
}

fn writer_persona(draft: &Draft, site: &SiteConfig) -> String {
    format!(
        "You are a senior editor writing for {} ({}). Write in the language of locale '{}'. \
         Be concrete, cite specifics and avoid filler phrases.",
        if site.name.is_empty() { &site.id } else { &site.name },
        site.base_url,
        draft.locale
    )
}

async fn research(draft: &Draft, ctx: &PhaseContext<'_>) -> PhaseOutput {
    let user = format!(
        "Research the topic \"{}\" for readers in locale '{}'. List the key facts, \
         common questions, pitfalls and concrete numbers a thorough article must cover. \
         Answer as concise bullet notes.",
        draft.keyword, draft.locale
    );

    match ctx.ask("research", writer_persona(draft, ctx.site), user).await {
        Ok(notes) => PhaseOutput::Advance(DraftFields {
            research_notes: Some(notes.trim().to_string()),
            ..Default::default()
        }),
        Err(e) => PhaseOutput::Failed(e),
    }
}

async fn outline(draft: &Draft, ctx: &PhaseContext<'_>) -> PhaseOutput {
    let user = format!(
        "Using these research notes, propose the H2 section headings for an article about \
         \"{}\". Return only a JSON array of {} to {} strings.\n\nNotes:\n{}",
        draft.keyword,
        MIN_OUTLINE_SECTIONS,
        MAX_OUTLINE_SECTIONS,
        draft.research_notes.as_deref().unwrap_or("(none)")
    );

    let content = match ctx.ask("outline", writer_persona(draft, ctx.site), user).await {
        Ok(content) => content,
        Err(e) => return PhaseOutput::Failed(e),
    };

    let headings: Vec<String> = match parse_json(&content) {
        Ok(headings) => headings,
        Err(e) => return PhaseOutput::Failed(format!("outline: {}", e)),
    };
    let headings: Vec<String> = headings
        .into_iter()
        .map(|h| h.trim().trim_start_matches('#').trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();

    if !(MIN_OUTLINE_SECTIONS..=MAX_OUTLINE_SECTIONS).contains(&headings.len()) {
        return PhaseOutput::Failed(format!(
            "outline: expected {}-{} headings, got {}",
            MIN_OUTLINE_SECTIONS,
            MAX_OUTLINE_SECTIONS,
            headings.len()
        ));
    }

    PhaseOutput::Advance(DraftFields {
        sections_total: Some(headings.len() as i64),
        sections_completed: Some(0),
        sections: Some(Vec::new()),
        outline: Some(headings),
        ..Default::default()
    })
}

async fn drafting(draft: &Draft, ctx: &PhaseContext<'_>) -> PhaseOutput {
    if draft.outline.is_empty() {
        return PhaseOutput::Failed("drafting: draft has no outline".to_string());
    }

    let mut sections = draft.sections.clone();
    sections.truncate(draft.outline.len());
    let words_per_section = (ctx.site.target_word_count as usize / draft.outline.len()).max(150);
    let mut written = 0usize;

    while sections.len() < draft.outline.len() && written < ctx.pipeline.sections_per_invocation as usize {
        let heading = &draft.outline[sections.len()];
        let user = format!(
            "Write the section \"{}\" of an article about \"{}\". Aim for about {} words. \
             Do not repeat the heading. You may use H3 subheadings (###).\n\n\
             Full outline: {}\n\nResearch notes:\n{}",
            heading,
            draft.keyword,
            words_per_section,
            draft.outline.join(" | "),
            draft.research_notes.as_deref().unwrap_or("(none)")
        );

        match ctx.ask("drafting", writer_persona(draft, ctx.site), user).await {
            Ok(body) => {
                sections.push(strip_leading_heading(&body));
                written += 1;
            }
            Err(e) if written == 0 => return PhaseOutput::Failed(e),
            Err(e) => {
                // Keep what this run wrote; the failing section is retried next time
                tracing::warn!(draft_id = %draft.id, error = %e, "Section failed after progress");
                break;
            }
        }
    }

    let fields = DraftFields {
        sections_completed: Some(sections.len() as i64),
        sections: Some(sections.clone()),
        ..Default::default()
    };

    if sections.len() == draft.outline.len() {
        PhaseOutput::Advance(fields)
    } else {
        PhaseOutput::Progress(fields)
    }
}

fn strip_leading_heading(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.lines().next() {
        Some(first) if first.trim_start().starts_with("# ") || first.trim_start().starts_with("## ") => {
            trimmed[first.len()..].trim().to_string()
        }
        _ => trimmed.to_string(),
    }
}

fn assembly(draft: &Draft, ctx: &PhaseContext<'_>) -> PhaseOutput {
    if draft.sections.is_empty() || draft.sections.len() != draft.outline.len() {
        return PhaseOutput::Failed(format!(
            "assembly: {} of {} sections written",
            draft.sections.len(),
            draft.outline.len()
        ));
    }

    let content = assemble_markdown(&draft.outline, &draft.sections);
    let word_count = ctx.analyzer.word_count(&content);
    if word_count == 0 {
        return PhaseOutput::Failed("assembly: content is empty".to_string());
    }

    PhaseOutput::Advance(DraftFields {
        content: Some(content),
        word_count: Some(word_count as i64),
        ..Default::default()
    })
}

/// Join outline headings and section bodies into markdown
pub fn assemble_markdown(outline: &[String], sections: &[String]) -> String {
    outline
        .iter()
        .zip(sections)
        .map(|(heading, body)| format!("## {}\n\n{}\n", heading, body.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn images(draft: &Draft, ctx: &PhaseContext<'_>) -> PhaseOutput {
    let user = format!(
        "Plan illustrations for an article about \"{}\": one hero image, then one per section \
         where useful. Sections: {}. Return only a JSON array of objects with \"prompt\" \
         (image generation prompt) and \"alt\" (alt text in locale '{}').",
        draft.keyword,
        draft.outline.join(" | "),
        draft.locale
    );

    let content = match ctx.ask("images", writer_persona(draft, ctx.site), user).await {
        Ok(content) => content,
        Err(e) => return PhaseOutput::Failed(e),
    };

    let mut specs: Vec<ImageSpec> = match parse_json(&content) {
        Ok(specs) => specs,
        Err(e) => return PhaseOutput::Failed(format!("images: {}", e)),
    };
    specs.retain(|s| !s.prompt.trim().is_empty());
    if specs.is_empty() {
        return PhaseOutput::Failed("images: no usable image prompts".to_string());
    }
    specs.truncate(draft.outline.len() + 1);

    PhaseOutput::Advance(DraftFields {
        images: Some(specs),
        ..Default::default()
    })
}

#[derive(Debug, Deserialize)]
struct SeoMeta {
    title: String,
    meta_title: String,
    meta_description: String,
}

async fn seo(draft: &Draft, ctx: &PhaseContext<'_>) -> PhaseOutput {
    let Some(content) = draft.content.as_deref() else {
        return PhaseOutput::Failed("seo: draft has no content".to_string());
    };

    let user = format!(
        "Write SEO metadata for an article about \"{}\" with sections: {}. Return only a JSON \
         object with \"title\" (20-70 chars, includes the topic), \"meta_title\" (30-60 chars) \
         and \"meta_description\" (70-160 chars).",
        draft.keyword,
        draft.outline.join(" | ")
    );

    let raw = match ctx.ask("seo", writer_persona(draft, ctx.site), user).await {
        Ok(raw) => raw,
        Err(e) => return PhaseOutput::Failed(e),
    };
    let meta: SeoMeta = match parse_json(&raw) {
        Ok(meta) => meta,
        Err(e) => return PhaseOutput::Failed(format!("seo: {}", e)),
    };
    let (title, meta_title, meta_description) = (
        meta.title.trim().to_string(),
        meta.meta_title.trim().to_string(),
        meta.meta_description.trim().to_string(),
    );
    if title.is_empty() || meta_title.is_empty() || meta_description.is_empty() {
        return PhaseOutput::Failed("seo: metadata has empty fields".to_string());
    }

    let content = append_internal_links(
        content,
        &ctx.site.internal_links,
        ctx.analyzer,
        ctx.gate.min_internal_links as usize,
    );
    let word_count = ctx.analyzer.word_count(&content);

    let structured_data = json!({
        "@context": "https://schema.org",
        "@type": "BlogPosting",
        "headline": title,
        "description": meta_description,
        "inLanguage": draft.locale,
        "keywords": draft.keyword,
        "wordCount": word_count,
        "url": ctx
            .site
            .route_for(&draft.locale, &draft.slug)
            .map(|route| format!("{}{}", ctx.site.base_url.trim_end_matches('/'), route)),
        "author": { "@type": "Person", "name": ctx.site.author },
    });

    let score = seo_score(
        &SeoInputs {
            keyword: &draft.keyword,
            title: &title,
            meta_title: &meta_title,
            meta_description: &meta_description,
            content: &content,
        },
        ctx.analyzer,
    );

    PhaseOutput::Advance(DraftFields {
        content: Some(content),
        word_count: Some(word_count as i64),
        title: Some(title),
        meta_title: Some(meta_title),
        meta_description: Some(meta_description),
        structured_data: Some(structured_data.to_string()),
        seo_score: Some(score),
        ..Default::default()
    })
}

/// Append a related-reading list until `min_links` internal links are present
pub fn append_internal_links(
    content: &str,
    candidates: &[String],
    analyzer: &ContentAnalyzer,
    min_links: usize,
) -> String {
    let existing = analyzer.internal_links(content);
    if existing.len() >= min_links {
        return content.to_string();
    }

    let needed = min_links - existing.len();
    let additions: Vec<&String> = candidates
        .iter()
        .filter(|path| !existing.contains(path))
        .take(needed)
        .collect();
    if additions.is_empty() {
        return content.to_string();
    }

    let mut out = content.trim_end().to_string();
    out.push_str("\n\n## Related reading\n\n");
    for path in additions {
        out.push_str(&format!("- [{}]({})\n", link_label(path), path));
    }
    out
}

fn link_label(path: &str) -> String {
    let segment = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .replace(['-', '_'], " ");
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => path.to_string(),
    }
}

pub struct SeoInputs<'a> {
    pub keyword: &'a str,
    pub title: &'a str,
    pub meta_title: &'a str,
    pub meta_description: &'a str,
    pub content: &'a str,
}

/// Rule-based SEO score in 0..=100
pub fn seo_score(inputs: &SeoInputs<'_>, analyzer: &ContentAnalyzer) -> f64 {
    fn length_points(text: &str, range: std::ops::RangeInclusive<usize>) -> f64 {
        let len = text.chars().count();
        if len == 0 {
            0.0
        } else if range.contains(&len) {
            15.0
        } else {
            5.0
        }
    }

    let keyword = inputs.keyword.to_lowercase();
    let mut score = 0.0;

    score += length_points(inputs.title, 20..=70);
    score += length_points(inputs.meta_title, 30..=60);
    score += length_points(inputs.meta_description, 70..=160);

    if !keyword.is_empty() && inputs.title.to_lowercase().contains(&keyword) {
        score += 15.0;
    }

    let opening: String = inputs
        .content
        .split_whitespace()
        .take(100)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if !keyword.is_empty() && opening.contains(&keyword) {
        score += 10.0;
    }

    let h2_count = analyzer
        .headings(inputs.content)
        .iter()
        .filter(|h| h.level == 2)
        .count();
    if h2_count >= 3 {
        score += 10.0;
    }
    if analyzer.internal_links(inputs.content).len() >= 3 {
        score += 10.0;
    }
    if analyzer.word_count(inputs.content) >= 1000 {
        score += 10.0;
    }

    score
}

#[derive(Debug, Deserialize)]
struct Review {
    score: f64,
}

async fn scoring(draft: &Draft, ctx: &PhaseContext<'_>) -> PhaseOutput {
    let Some(content) = draft.content.as_deref() else {
        return PhaseOutput::Failed("scoring: draft has no content".to_string());
    };

    let user = format!(
        "Review this article about \"{}\" for accuracy, depth, originality and usefulness. \
         Return only a JSON object {{\"score\": <0-100>}}.\n\n{}",
        draft.keyword, content
    );

    let raw = match ctx.ask("scoring", writer_persona(draft, ctx.site), user).await {
        Ok(raw) => raw,
        Err(e) => return PhaseOutput::Failed(e),
    };
    let review: Review = match parse_json(&raw) {
        Ok(review) => review,
        Err(e) => return PhaseOutput::Failed(format!("scoring: {}", e)),
    };
    if !(0.0..=100.0).contains(&review.score) {
        return PhaseOutput::Failed(format!("scoring: score {} out of range", review.score));
    }

    let readability = ctx.analyzer.readability(content);
    let quality = blend_quality(review.score, readability);
    tracing::debug!(draft_id = %draft.id, ai = review.score, readability, quality, "Scored draft");

    PhaseOutput::Advance(DraftFields {
        quality_score: Some(quality),
        author: Some(ctx.site.author.clone()).filter(|a| !a.trim().is_empty()),
        ..Default::default()
    })
}

/// Blend the AI review with local readability, rounded to one decimal
pub fn blend_quality(ai_score: f64, readability: f64) -> f64 {
    let blended = AI_REVIEW_WEIGHT * ai_score + (1.0 - AI_REVIEW_WEIGHT) * readability;
    (blended * 10.0).round() / 10.0
}

fn parse_json<T: for<'de> Deserialize<'de>>(content: &str) -> Result<T, String> {
    serde_json::from_str(strip_code_fence(content)).map_err(|e| format!("malformed JSON: {}", e))
}
