//! Pre-publish quality gate.
//!
//! ## Rules
//!
//! | Rule | Blocks | Default |
//! |------|--------|---------|
//! | Word count | yes | blog 900, species 600, howto 700, location 500 |
//! | Call to action in first half and last 40% | yes | required |
//! | Neutral regulatory disclaimer | yes | required |
//! | Specific regulation claims outside a neutral context | yes | rejected |
//! | Actionable paragraphs | yes | 3 |
//! | Lexical diversity (unique / total tokens) | yes | 0.30 |
//! | Sentence length standard deviation | yes | 3.0 words, from 5 sentences |
//! | Placeholder tokens | yes | rejected |
//! | Sources, FAQs, description, title length | no | warnings |
//!
//! The gate is deterministic and side-effect free. A report with any error
//! is `blocked`; warnings never block.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::canonical_content::{tokens, word_count};
use crate::error::{PublishError, Result};
use crate::types::{Document, PageType};

/// Verbs that mark a paragraph as instructional when they open it.
pub const ACTION_VERBS: &[&str] = &[
    "add", "adjust", "anchor", "avoid", "bring", "cast", "change", "check", "choose", "drift",
    "fish", "follow", "keep", "let", "look", "make", "match", "move", "pack", "pick", "plan",
    "pull", "reel", "retrieve", "rig", "set", "start", "stay", "target", "tie", "try", "use",
    "wade", "wait", "watch", "work",
];

const CTA_PATTERN: &str = r"(?i)\b(book (a|your) (guided )?(charter|trip)|contact us|plan your trip|sign up|join our newsletter|get started|reserve your spot)\b";

const DISCLAIMER_PATTERN: &str = r"(?i)\b(check (the )?(current|local|latest) (fishing )?regulations|consult (your|the) (state|local) (wildlife|fish and game|fisheries))";

const ALLOWED_CONTEXT_PATTERN: &str = r"(?i)(check (the )?(current|local|latest) (fishing )?regulations|regulations (change|vary)|verify (with|through) (your|the) (state|local)|consult (your|the) (state|local))";

const REGULATION_PATTERNS: &[&str] = &[
    r"(?i)\b(bag|creel|possession|daily) limits?\b.{0,40}?\d+",
    r"(?i)\b\d+\s*(inches|inch|cm|in\.)",
    r"(?i)\b(minimum|maximum|slot) (size|length)\b",
    r"(?i)\bseason (opens|closes|runs|starts|ends)\b",
    r"(?i)\b(it is|it's) (legal|illegal) to\b",
    r"(?i)\byou (can|may) legally\b",
    r"(?i)\bfully compliant with\b",
];

const PLACEHOLDER_PATTERN: &str = r"(?i)(lorem ipsum|\[insert|\[placeholder|\{\{|\}\})";

const PLACEHOLDER_MARKER_PATTERN: &str = r"\b(TODO|TBD|XXX)\b";

const INSTRUCTION_MARKER_PATTERN: &str = r"(?i)(\bstep \d+\b|\btip:|\bpro tip\b)";

/// Policy defining the quality gate thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPolicy {
    /// Minimum body words for blog posts.
    pub min_words_blog: usize,
    /// Minimum body words for species profiles.
    pub min_words_species: usize,
    /// Minimum body words for how-to guides.
    pub min_words_howto: usize,
    /// Minimum body words for location pages.
    pub min_words_location: usize,
    /// Require a call to action in both zones.
    pub require_cta: bool,
    /// Fraction of the body, from the start, forming the early CTA zone.
    pub cta_early_zone: f64,
    /// Fraction of the body, from the end, forming the late CTA zone.
    pub cta_late_zone: f64,
    /// Require a neutral regulatory disclaimer.
    pub require_disclaimer: bool,
    /// Reject specific regulation claims.
    pub reject_specific_regulations: bool,
    /// Characters either side of a regulation match searched for a neutral phrase.
    pub regulation_context_window: usize,
    /// Minimum instructional paragraphs.
    pub min_actionable_paragraphs: usize,
    /// Minimum ratio of unique to total tokens.
    pub min_lexical_diversity: f64,
    /// Minimum standard deviation of sentence lengths, in words.
    pub min_sentence_length_stddev: f64,
    /// Sentences needed before the variance rule applies.
    pub min_sentences_for_variance: usize,
    /// Recommended minimum FAQs.
    pub min_faqs: usize,
    /// Recommended maximum title length.
    pub max_title_chars: usize,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            min_words_blog: 900,
            min_words_species: 600,
            min_words_howto: 700,
            min_words_location: 500,
            require_cta: true,
            cta_early_zone: 0.5,
            cta_late_zone: 0.4,
            require_disclaimer: true,
            reject_specific_regulations: true,
            regulation_context_window: 160,
            min_actionable_paragraphs: 3,
            min_lexical_diversity: 0.30,
            min_sentence_length_stddev: 3.0,
            min_sentences_for_variance: 5,
            min_faqs: 3,
            max_title_chars: 70,
        }
    }
}

impl QualityPolicy {
    /// Create a lenient policy for testing.
    ///
    /// Regulation and placeholder checks stay on.
    pub fn lenient() -> Self {
        Self {
            min_words_blog: 1,
            min_words_species: 1,
            min_words_howto: 1,
            min_words_location: 1,
            require_cta: false,
            require_disclaimer: false,
            min_actionable_paragraphs: 0,
            min_lexical_diversity: 0.0,
            min_sentence_length_stddev: 0.0,
            ..Self::default()
        }
    }

    /// Create a strict policy for flagship pages.
    pub fn strict() -> Self {
        Self {
            min_words_blog: 1200,
            min_words_species: 800,
            min_words_howto: 900,
            min_words_location: 700,
            regulation_context_window: 80,
            min_actionable_paragraphs: 5,
            min_lexical_diversity: 0.35,
            min_sentence_length_stddev: 4.0,
            ..Self::default()
        }
    }

    /// Minimum body words for `page_type`.
    pub fn min_words(&self, page_type: PageType) -> usize {
        match page_type {
            PageType::Blog => self.min_words_blog,
            PageType::Species => self.min_words_species,
            PageType::HowTo => self.min_words_howto,
            PageType::Location => self.min_words_location,
        }
    }
}

/// Body zone a call to action must appear in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtaZone {
    /// First part of the body.
    Early,
    /// Last part of the body.
    Late,
}

/// Blocking rule violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum QualityViolation {
    /// Body too short.
    InsufficientWords {
        /// Minimum required.
        required: usize,
        /// Actual count.
        actual: usize,
    },
    /// No call to action in a zone.
    MissingCallToAction {
        /// Zone without a match.
        zone: CtaZone,
    },
    /// No neutral regulatory reminder.
    MissingRegulatoryDisclaimer,
    /// A specific regulation stated outside a neutral context.
    SpecificRegulationClaim {
        /// Matched text.
        excerpt: String,
    },
    /// Too few instructional paragraphs.
    InsufficientActionableParagraphs {
        /// Minimum required.
        required: usize,
        /// Actual count.
        actual: usize,
    },
    /// Degenerate repetition.
    LowLexicalDiversity {
        /// Minimum required.
        required: f64,
        /// Actual ratio.
        actual: f64,
    },
    /// Mechanically uniform sentences.
    UniformSentenceLength {
        /// Minimum required.
        required: f64,
        /// Actual standard deviation.
        actual: f64,
    },
    /// Unfilled template marker.
    PlaceholderToken {
        /// Matched token.
        token: String,
    },
}

impl std::fmt::Display for QualityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientWords { required, actual } => {
                write!(f, "Insufficient words: {} required, {} found", required, actual)
            }
            Self::MissingCallToAction { zone } => match zone {
                CtaZone::Early => write!(f, "Missing call to action in the first half of the body"),
                CtaZone::Late => write!(f, "Missing call to action in the closing section of the body"),
            },
            Self::MissingRegulatoryDisclaimer => {
                write!(f, "Missing neutral reminder to check current regulations")
            }
            Self::SpecificRegulationClaim { excerpt } => {
                write!(f, "Specific regulation claim: \"{}\"", excerpt)
            }
            Self::InsufficientActionableParagraphs { required, actual } => {
                write!(f, "Insufficient actionable paragraphs: {} required, {} found", required, actual)
            }
            Self::LowLexicalDiversity { required, actual } => {
                write!(f, "Low lexical diversity: {:.2} required, {:.2} found", required, actual)
            }
            Self::UniformSentenceLength { required, actual } => {
                write!(f, "Uniform sentence length: stddev {:.2} required, {:.2} found", required, actual)
            }
            Self::PlaceholderToken { token } => write!(f, "Placeholder token: {}", token),
        }
    }
}

/// Advisory finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum QualityWarning {
    /// No cited sources.
    NoSources,
    /// Fewer FAQs than recommended.
    FewFaqs {
        /// Recommended minimum.
        recommended: usize,
        /// Actual count.
        actual: usize,
    },
    /// Empty listing description.
    EmptyDescription,
    /// Title longer than recommended.
    TitleTooLong {
        /// Recommended maximum.
        max: usize,
        /// Actual length in characters.
        actual: usize,
    },
    /// Body closely resembles another published topic.
    NearDuplicate {
        /// Similar topic.
        topic_key: String,
        /// Estimated similarity.
        similarity: f64,
    },
}

impl std::fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSources => write!(f, "No sources cited"),
            Self::FewFaqs { recommended, actual } => {
                write!(f, "Few FAQs: {} recommended, {} found", recommended, actual)
            }
            Self::EmptyDescription => write!(f, "Empty description"),
            Self::TitleTooLong { max, actual } => {
                write!(f, "Title too long: {} characters, {} recommended", actual, max)
            }
            Self::NearDuplicate { topic_key, similarity } => {
                write!(f, "Near duplicate of {} ({:.2})", topic_key, similarity)
            }
        }
    }
}

/// Measurements taken while checking a body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMetrics {
    /// Body words.
    pub word_count: usize,
    /// Non-empty paragraphs.
    pub paragraph_count: usize,
    /// Instructional paragraphs.
    pub actionable_paragraphs: usize,
    /// Sentences with at least one word.
    pub sentence_count: usize,
    /// Mean sentence length, in words.
    pub mean_sentence_length: f64,
    /// Population standard deviation of sentence lengths.
    pub sentence_length_stddev: f64,
    /// Distinct normalized tokens.
    pub unique_tokens: usize,
    /// Normalized tokens.
    pub total_tokens: usize,
    /// `unique_tokens / total_tokens`.
    pub lexical_diversity: f64,
}

/// Result of a quality gate run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Whether any error is present.
    pub blocked: bool,
    /// Blocking violations.
    pub errors: Vec<QualityViolation>,
    /// Advisory findings.
    pub warnings: Vec<QualityWarning>,
    /// Measurements.
    pub metrics: ContentMetrics,
}

impl QualityReport {
    /// Convert a blocked report into `QualityGateBlocked`.
    pub fn into_result(self) -> Result<Self> {
        if self.blocked {
            return Err(PublishError::QualityGateBlocked {
                violations: self.errors,
            });
        }
        Ok(self)
    }
}

struct ContentRules {
    cta: Regex,
    disclaimer: Regex,
    allowed_context: Regex,
    regulations: Vec<Regex>,
    placeholder: Regex,
    placeholder_marker: Regex,
    instruction_marker: Regex,
}

impl ContentRules {
    fn compile() -> std::result::Result<Self, regex_lite::Error> {
        Ok(Self {
            cta: Regex::new(CTA_PATTERN)?,
            disclaimer: Regex::new(DISCLAIMER_PATTERN)?,
            allowed_context: Regex::new(ALLOWED_CONTEXT_PATTERN)?,
            regulations: REGULATION_PATTERNS
                .iter()
                .map(|p| Regex::new(p))
                .collect::<std::result::Result<Vec<_>, _>>()?,
            placeholder: Regex::new(PLACEHOLDER_PATTERN)?,
            placeholder_marker: Regex::new(PLACEHOLDER_MARKER_PATTERN)?,
            instruction_marker: Regex::new(INSTRUCTION_MARKER_PATTERN)?,
        })
    }
}

/// Compiled quality gate.
pub struct QualityGate {
    policy: QualityPolicy,
    rules: ContentRules,
}

impl std::fmt::Debug for QualityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityGate").field("policy", &self.policy).finish()
    }
}

impl QualityGate {
    /// Compile the content rules for `policy`.
    pub fn new(policy: QualityPolicy) -> Result<Self> {
        let rules = ContentRules::compile()
            .map_err(|e| PublishError::validation("qualityPolicy", e.to_string()))?;
        Ok(Self { policy, rules })
    }

    /// Active policy.
    pub fn policy(&self) -> &QualityPolicy {
        &self.policy
    }

    /// Check a document.
    pub fn check(&self, doc: &Document) -> QualityReport {
        let body = doc.body.as_str();
        let metrics = self.measure(body);
        let mut errors = Vec::new();

        let required = self.policy.min_words(doc.page_type);
        if metrics.word_count < required {
            errors.push(QualityViolation::InsufficientWords {
                required,
                actual: metrics.word_count,
            });
        }

        if self.policy.require_cta {
            let (early, late) = self.cta_zones(body);
            if !early {
                errors.push(QualityViolation::MissingCallToAction { zone: CtaZone::Early });
            }
            if !late {
                errors.push(QualityViolation::MissingCallToAction { zone: CtaZone::Late });
            }
        }

        if self.policy.require_disclaimer && !self.rules.disclaimer.is_match(body) {
            errors.push(QualityViolation::MissingRegulatoryDisclaimer);
        }

        if self.policy.reject_specific_regulations {
            for excerpt in self.regulation_claims(body) {
                errors.push(QualityViolation::SpecificRegulationClaim { excerpt });
            }
        }

        if metrics.actionable_paragraphs < self.policy.min_actionable_paragraphs {
            errors.push(QualityViolation::InsufficientActionableParagraphs {
                required: self.policy.min_actionable_paragraphs,
                actual: metrics.actionable_paragraphs,
            });
        }

        if metrics.total_tokens > 0 && metrics.lexical_diversity < self.policy.min_lexical_diversity {
            errors.push(QualityViolation::LowLexicalDiversity {
                required: self.policy.min_lexical_diversity,
                actual: metrics.lexical_diversity,
            });
        }

        if metrics.sentence_count >= self.policy.min_sentences_for_variance
            && metrics.sentence_length_stddev < self.policy.min_sentence_length_stddev
        {
            errors.push(QualityViolation::UniformSentenceLength {
                required: self.policy.min_sentence_length_stddev,
                actual: metrics.sentence_length_stddev,
            });
        }

        for token in self.placeholders(body) {
            errors.push(QualityViolation::PlaceholderToken { token });
        }

        let warnings = self.warnings(doc);
        QualityReport {
            blocked: !errors.is_empty(),
            errors,
            warnings,
            metrics,
        }
    }

    /// Compute body metrics.
    pub fn measure(&self, body: &str) -> ContentMetrics {
        let paragraphs = paragraphs(body);
        let actionable = paragraphs
            .iter()
            .filter(|p| self.is_actionable(p))
            .count();

        let lengths: Vec<usize> = body
            .split(['.', '!', '?'])
            .map(word_count)
            .filter(|n| *n > 0)
            .collect();
        let (mean, stddev) = mean_and_stddev(&lengths);

        let all_tokens = tokens(body);
        let unique: HashSet<&str> = all_tokens.iter().map(String::as_str).collect();
        let lexical_diversity = if all_tokens.is_empty() {
            0.0
        } else {
            unique.len() as f64 / all_tokens.len() as f64
        };

        ContentMetrics {
            word_count: word_count(body),
            paragraph_count: paragraphs.len(),
            actionable_paragraphs: actionable,
            sentence_count: lengths.len(),
            mean_sentence_length: mean,
            sentence_length_stddev: stddev,
            unique_tokens: unique.len(),
            total_tokens: all_tokens.len(),
            lexical_diversity,
        }
    }

    fn cta_zones(&self, body: &str) -> (bool, bool) {
        let len = body.len() as f64;
        let early_end = (len * self.policy.cta_early_zone) as usize;
        let late_start = (len * (1.0 - self.policy.cta_late_zone)) as usize;
        let mut early = false;
        let mut late = false;
        for m in self.rules.cta.find_iter(body) {
            if m.start() < early_end {
                early = true;
            }
            if m.start() >= late_start {
                late = true;
            }
        }
        (early, late)
    }

    fn regulation_claims(&self, body: &str) -> Vec<String> {
        let window = self.policy.regulation_context_window;
        let mut seen = HashSet::new();
        let mut claims = Vec::new();
        for rule in &self.rules.regulations {
            for m in rule.find_iter(body) {
                let from = floor_boundary(body, m.start().saturating_sub(window));
                let to = ceil_boundary(body, (m.end() + window).min(body.len()));
                if self.rules.allowed_context.is_match(&body[from..to]) {
                    continue;
                }
                let excerpt = m.as_str().trim().to_string();
                if seen.insert(excerpt.to_lowercase()) {
                    claims.push(excerpt);
                }
            }
        }
        claims
    }

    fn placeholders(&self, body: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rules
            .placeholder
            .find_iter(body)
            .chain(self.rules.placeholder_marker.find_iter(body))
            .map(|m| m.as_str().to_string())
            .filter(|t| seen.insert(t.to_lowercase()))
            .collect()
    }

    fn is_actionable(&self, paragraph: &str) -> bool {
        if self.rules.instruction_marker.is_match(paragraph) {
            return true;
        }
        let stripped = paragraph.trim_start_matches(|c: char| {
            c.is_ascii_digit() || matches!(c, '-' | '*' | '+' | '#' | '.' | ')' | '>') || c.is_whitespace()
        });
        stripped
            .split_whitespace()
            .next()
            .map(|w| {
                let w = w
                    .trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase();
                ACTION_VERBS.contains(&w.as_str())
            })
            .unwrap_or(false)
    }

    fn warnings(&self, doc: &Document) -> Vec<QualityWarning> {
        let mut warnings = Vec::new();
        if doc.sources.is_empty() {
            warnings.push(QualityWarning::NoSources);
        }
        if doc.faqs.len() < self.policy.min_faqs {
            warnings.push(QualityWarning::FewFaqs {
                recommended: self.policy.min_faqs,
                actual: doc.faqs.len(),
            });
        }
        if doc.description.trim().is_empty() {
            warnings.push(QualityWarning::EmptyDescription);
        }
        let title_chars = doc.title.chars().count();
        if title_chars > self.policy.max_title_chars {
            warnings.push(QualityWarning::TitleTooLong {
                max: self.policy.max_title_chars,
                actual: title_chars,
            });
        }
        warnings
    }
}

/// Run the gate with the default policy.
pub fn run_quality_gate(doc: &Document) -> Result<QualityReport> {
    static DEFAULT_GATE: OnceLock<QualityGate> = OnceLock::new();
    if let Some(gate) = DEFAULT_GATE.get() {
        return Ok(gate.check(doc));
    }
    let gate = QualityGate::new(QualityPolicy::default())?;
    Ok(DEFAULT_GATE.get_or_init(|| gate).check(doc))
}

fn paragraphs(body: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut last_end = 0usize;
    let mut offset = 0usize;
    for line in body.split_inclusive('\n') {
        let blank = line.trim().is_empty();
        if blank {
            if let Some(s) = start.take() {
                out.push(body[s..last_end].trim());
            }
        } else {
            if start.is_none() {
                start = Some(offset);
            }
            last_end = offset + line.len();
        }
        offset += line.len();
    }
    if let Some(s) = start {
        out.push(body[s..last_end].trim());
    }
    out
}

fn mean_and_stddev(values: &[usize]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<usize>() as f64 / n;
    let variance = values
        .iter()
        .map(|v| (*v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{passing_body, sample_document};

    fn gate() -> QualityGate {
        QualityGate::new(QualityPolicy::default()).unwrap()
    }

    fn with_body(body: String) -> Document {
        let mut doc = sample_document(PageType::Blog, "redfish-101", 0);
        doc.body = body;
        doc
    }

    // ───────────────────────────────────────────────────────────────
    // Passing content
    // ───────────────────────────────────────────────────────────────

    #[test]
    fn test_fixture_passes_default_gate() {
        for page_type in PageType::all() {
            let doc = sample_document(page_type, "redfish-101", 3);
            let report = gate().check(&doc);
            assert!(!report.blocked, "{page_type}: {:?}", report.errors);
            assert!(report.warnings.is_empty(), "{page_type}: {:?}", report.warnings);
        }
    }

    #[test]
    fn test_run_quality_gate_uses_default_policy() {
        let doc = sample_document(PageType::Blog, "redfish-101", 1);
        let report = run_quality_gate(&doc).unwrap();
        assert!(!report.blocked);
        assert!(report.metrics.word_count >= 900);
        assert!(report.into_result().is_ok());
    }

    // ───────────────────────────────────────────────────────────────
    // Blocking rules
    // ───────────────────────────────────────────────────────────────

    #[test]
    fn test_short_body_blocked() {
        let doc = with_body("Book a guided charter. Check current regulations. Plan your trip.".into());
        let report = gate().check(&doc);
        assert!(report.blocked);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, QualityViolation::InsufficientWords { required: 900, .. })));
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, PublishError::QualityGateBlocked { .. }));
    }

    #[test]
    fn test_missing_late_cta_blocked() {
        let body = passing_body(0).replace("Plan your trip", "Come back");
        let report = gate().check(&with_body(body));
        assert_eq!(
            report.errors,
            vec![QualityViolation::MissingCallToAction { zone: CtaZone::Late }]
        );
    }

    #[test]
    fn test_missing_disclaimer_blocked() {
        let body = passing_body(0).replace("check current regulations", "look at the water");
        let report = gate().check(&with_body(body));
        assert!(report
            .errors
            .contains(&QualityViolation::MissingRegulatoryDisclaimer));
    }

    #[test]
    fn test_bag_limit_claim_blocked() {
        // Right after the intro, far from the neutral reminder near the end.
        let body = passing_body(0).replacen(
            "\n\n",
            "\n\nThe bag limit is 3 fish per angler on this bay.\n\n",
            1,
        );
        let report = gate().check(&with_body(body));
        assert_eq!(
            report.errors,
            vec![QualityViolation::SpecificRegulationClaim {
                excerpt: "bag limit is 3".to_string()
            }]
        );
    }

    #[test]
    fn test_regulation_inside_neutral_context_allowed() {
        let gate = QualityGate::new(QualityPolicy::lenient()).unwrap();
        let doc = with_body(
            "Size limits such as a 20 inch minimum vary by state, so check current regulations first.".into(),
        );
        assert!(gate.check(&doc).errors.is_empty());
    }

    #[test]
    fn test_legal_claim_blocked() {
        let gate = QualityGate::new(QualityPolicy::lenient()).unwrap();
        let doc = with_body("It is legal to keep every fish you catch here.".into());
        let report = gate.check(&doc);
        assert_eq!(
            report.errors,
            vec![QualityViolation::SpecificRegulationClaim {
                excerpt: "It is legal to".to_string()
            }]
        );
    }

    #[test]
    fn test_placeholders_blocked() {
        let gate = QualityGate::new(QualityPolicy::lenient()).unwrap();
        let doc = with_body("Intro {{city}} text. TODO add tide notes. Lorem ipsum.".into());
        let tokens: Vec<String> = gate
            .check(&doc)
            .errors
            .into_iter()
            .filter_map(|e| match e {
                QualityViolation::PlaceholderToken { token } => Some(token),
                _ => None,
            })
            .collect();
        assert!(tokens.contains(&"{{".to_string()));
        assert!(tokens.contains(&"TODO".to_string()));
        assert!(tokens.contains(&"Lorem ipsum".to_string()));
    }

    #[test]
    fn test_lowercase_todo_is_not_a_placeholder() {
        let gate = QualityGate::new(QualityPolicy::lenient()).unwrap();
        let doc = with_body("There is a lot todo on the water.".into());
        assert!(gate.check(&doc).errors.is_empty());
    }

    #[test]
    fn test_repetition_blocked() {
        let gate = QualityGate::new(QualityPolicy {
            min_lexical_diversity: 0.30,
            ..QualityPolicy::lenient()
        })
        .unwrap();
        let doc = with_body("fish the flats ".repeat(200));
        let report = gate.check(&doc);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, QualityViolation::LowLexicalDiversity { .. })));
    }

    #[test]
    fn test_uniform_sentences_blocked() {
        let gate = QualityGate::new(QualityPolicy {
            min_sentence_length_stddev: 3.0,
            ..QualityPolicy::lenient()
        })
        .unwrap();
        let doc = with_body("Redfish feed on shallow grass flats. ".repeat(10));
        let report = gate.check(&doc);
        assert_eq!(report.metrics.sentence_count, 10);
        assert!(report.metrics.sentence_length_stddev < 1e-9);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, QualityViolation::UniformSentenceLength { .. })));
    }

    // ───────────────────────────────────────────────────────────────
    // Metrics and warnings
    // ───────────────────────────────────────────────────────────────

    #[test]
    fn test_actionable_paragraph_detection() {
        let gate = gate();
        let body = "Cast toward the grass.\n\n- Tie a loop knot.\n\nStep 2 is patience.\n\nRedfish are copper colored.\n\nPro tip: stay quiet.";
        let metrics = gate.measure(body);
        assert_eq!(metrics.paragraph_count, 5);
        assert_eq!(metrics.actionable_paragraphs, 4);
    }

    #[test]
    fn test_warnings_are_advisory() {
        let gate = QualityGate::new(QualityPolicy::lenient()).unwrap();
        let mut doc = sample_document(PageType::Blog, "redfish-101", 0);
        doc.sources.clear();
        doc.faqs.truncate(1);
        doc.description.clear();
        doc.title = "T".repeat(80);

        let report = gate.check(&doc);
        assert!(!report.blocked);
        assert_eq!(report.warnings.len(), 4);
        assert!(report.warnings.contains(&QualityWarning::NoSources));
        assert!(report
            .warnings
            .contains(&QualityWarning::TitleTooLong { max: 70, actual: 80 }));
    }

    #[test]
    fn test_strict_policy_is_stricter() {
        let strict = QualityPolicy::strict();
        let default = QualityPolicy::default();
        for page_type in PageType::all() {
            assert!(strict.min_words(page_type) > default.min_words(page_type));
        }
    }
}
