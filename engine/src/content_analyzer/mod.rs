use regex::Regex;

/// Phrase match inside article text
#[derive(Debug, Clone, PartialEq)]
pub struct PhraseMatch {
    /// The text that matched
    pub matched: String,
    /// Byte position in the scanned text
    pub position: usize,
}

/// Markdown heading
#[derive(Debug, Clone, PartialEq)]
pub struct Heading {
    pub level: usize,
    pub text: String,
}

/// Local, deterministic text metrics for generated articles
///
/// Used by the SEO and scoring phases and by the publication gate. Nothing
/// here calls an AI provider.
///
/// # Example
///
/// ```
/// use draftmill_engine::content_analyzer::ContentAnalyzer;
///
/// let analyzer = ContentAnalyzer::new().unwrap();
/// let text = "## Setup\n\nLet's delve into the details. See [pricing](/pricing).";
///
/// assert_eq!(analyzer.headings(text).len(), 1);
/// assert_eq!(analyzer.internal_links(text), vec!["/pricing".to_string()]);
/// assert_eq!(analyzer.cliche_hits(text).len(), 1);
/// ```
pub struct ContentAnalyzer {
    cliches: Vec<Regex>,
    authenticity: Vec<Regex>,
    heading: Regex,
    link: Regex,
}

impl ContentAnalyzer {
    /// Create an analyzer with the built-in phrase lists
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern fails to compile.
    pub fn new() -> anyhow::Result<Self> {
        // Filler phrases that mark text as machine-written boilerplate
        let cliches = vec![
            Regex::new(r"(?i)\bdelve\b")?,
            Regex::new(r"(?i)in today's (fast-paced|digital) world")?,
            Regex::new(r"(?i)game[- ]changer")?,
            Regex::new(r"(?i)unlock the (power|potential)")?,
            Regex::new(r"(?i)navigat(e|ing) the (complex )?landscape")?,
            Regex::new(r"(?i)it'?s (important|worth) (to note|noting)")?,
            Regex::new(r"(?i)\bin conclusion\b")?,
            Regex::new(r"(?i)look no further")?,
            Regex::new(r"(?i)a testament to")?,
            Regex::new(r"(?i)\btapestry\b")?,
        ];

        // First-hand experience and concrete specifics
        let authenticity = vec![
            Regex::new(r"(?i)\b(i|we) (tested|tried|found|measured|used|visited)\b")?,
            Regex::new(r"(?i)\bin (my|our) experience\b")?,
            Regex::new(r"(?i)\bhands-on\b")?,
            Regex::new(r"\b\d+(\.\d+)?\s?(%|percent|minutes|hours|days|km|kg|€|\$)")?,
            Regex::new(r"\b(19|20)\d{2}\b")?,
        ];

        Ok(Self {
            cliches,
            authenticity,
            heading: Regex::new(r"(?m)^(#{1,6})\s+(.+?)\s*$")?,
            link: Regex::new(r"\[([^\]]+)\]\(([^)\s]+)\)")?,
        })
    }

    /// Count words, ignoring markdown markup tokens
    pub fn word_count(&self, text: &str) -> usize {
        text.split_whitespace()
            .filter(|token| token.chars().any(|c| c.is_alphanumeric()))
            .count()
    }

    pub fn headings(&self, text: &str) -> Vec<Heading> {
        self.heading
            .captures_iter(text)
            .map(|c| Heading {
                level: c[1].len(),
                text: c[2].to_string(),
            })
            .collect()
    }

    /// Check that headings never skip a level going deeper and that the body
    /// has no H1 (the title is rendered separately)
    pub fn check_heading_hierarchy(&self, text: &str) -> Result<(), String> {
        let headings = self.headings(text);
        if headings.is_empty() {
            return Err("content has no headings".to_string());
        }
        let mut previous = 1;
        for heading in &headings {
            if heading.level == 1 {
                return Err(format!("unexpected H1 '{}' in body", heading.text));
            }
            if heading.level > previous + 1 {
                return Err(format!(
                    "heading '{}' jumps from H{} to H{}",
                    heading.text, previous, heading.level
                ));
            }
            previous = heading.level;
        }
        Ok(())
    }

    /// Site-relative link targets (`/path`)
    pub fn internal_links(&self, text: &str) -> Vec<String> {
        self.link
            .captures_iter(text)
            .map(|c| c[2].to_string())
            .filter(|target| target.starts_with('/') && !target.starts_with("//"))
            .collect()
    }

    pub fn cliche_hits(&self, text: &str) -> Vec<PhraseMatch> {
        self.cliches
            .iter()
            .flat_map(|pattern| pattern.find_iter(text))
            .map(|m| PhraseMatch {
                matched: m.as_str().to_string(),
                position: m.start(),
            })
            .collect()
    }

    /// Number of distinct authenticity signal kinds present
    pub fn authenticity_signals(&self, text: &str) -> usize {
        self.authenticity.iter().filter(|p| p.is_match(text)).count()
    }

    /// Flesch reading ease, clamped to 0..=100
    pub fn readability(&self, text: &str) -> f64 {
        let prose = self.strip_markup(text);
        let words: Vec<&str> = prose
            .split_whitespace()
            .filter(|w| w.chars().any(|c| c.is_alphabetic()))
            .collect();
        if words.is_empty() {
            return 0.0;
        }

        let sentences = prose
            .split(|c| matches!(c, '.' | '!' | '?'))
            .filter(|s| s.chars().any(|c| c.is_alphabetic()))
            .count()
            .max(1);
        let syllables: usize = words.iter().map(|w| count_syllables(w)).sum();

        let words_per_sentence = words.len() as f64 / sentences as f64;
        let syllables_per_word = syllables as f64 / words.len() as f64;
        let score = 206.835 - 1.015 * words_per_sentence - 84.6 * syllables_per_word;
        score.clamp(0.0, 100.0)
    }

    fn strip_markup(&self, text: &str) -> String {
        let without_links = self.link.replace_all(text, "$1");
        without_links
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Vowel-group syllable estimate, at least one per word
pub fn count_syllables(word: &str) -> usize {
    let lower: Vec<char> = word
        .chars()
        .filter(|c| c.is_alphabetic())
        .flat_map(|c| c.to_lowercase())
        .collect();
    if lower.is_empty() {
        return 0;
    }

    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y' | 'á' | 'é' | 'í' | 'ó' | 'ú');
    let mut count = 0;
    let mut previous_vowel = false;
    for &c in &lower {
        let vowel = is_vowel(c);
        if vowel && !previous_vowel {
            count += 1;
        }
        previous_vowel = vowel;
    }
    if lower.len() > 2 && lower.ends_with(&['e']) && !lower.ends_with(&['l', 'e']) && count > 1 {
        count -= 1;
    }
    count.max(1)
}
