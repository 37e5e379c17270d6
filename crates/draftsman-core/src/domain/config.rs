//! Run input and configuration.
//!
//! A run is created from a [`RunRequest`] (topic, ordered section template and
//! a [`RunConfig`]). The configuration is frozen once the research questions
//! are approved. Optional layers (`style`, `citation_style`, `custom`) are
//! no-ops when absent.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Minimum topic length in characters.
pub const MIN_TOPIC_CHARS: usize = 10;
/// Maximum number of sections in a template.
pub const MAX_SECTIONS: usize = 40;
/// Upper bound accepted for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Raw input for a new run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub topic: String,
    /// Ordered section names.
    pub template: Vec<String>,
    pub config: RunConfig,
}

impl RunRequest {
    /// Parse a request from TOML text.
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Parse a request from JSON text.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Check topic, template and configuration.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let topic_chars = self.topic.trim().chars().count();
        if topic_chars < MIN_TOPIC_CHARS {
            return Err(ConfigError::TopicTooShort {
                min: MIN_TOPIC_CHARS,
                actual: topic_chars,
            });
        }
        if self.template.is_empty() || self.template.len() > MAX_SECTIONS {
            return Err(ConfigError::TemplateSize {
                max: MAX_SECTIONS,
                actual: self.template.len(),
            });
        }
        if let Some(index) = self.template.iter().position(|n| n.trim().is_empty()) {
            return Err(ConfigError::EmptySectionName { index });
        }
        for name in self.config.section_word_ranges.keys() {
            if !self.template.iter().any(|t| t.trim() == name.trim()) {
                return Err(ConfigError::UnknownSectionOverride { name: name.clone() });
            }
        }
        self.config.validate()
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Immutable per-run configuration.
///
/// `max_retries` has no default and must be given explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Retries allowed after the first attempt of a section.
    pub max_retries: u32,

    /// Default target word range for every section.
    #[serde(default)]
    pub word_range: WordRange,

    /// Per-section overrides keyed by section name.
    #[serde(default)]
    pub section_word_ranges: BTreeMap<String, WordRange>,

    /// Minimum fuzzy similarity between a quoted span and the stored span.
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    /// Fraction of a question's content terms a draft must contain.
    #[serde(default = "default_question_coverage")]
    pub question_coverage_threshold: f64,

    #[serde(default)]
    pub questions: QuestionCount,

    #[serde(default)]
    pub context: ContextLimits,

    #[serde(default)]
    pub upstream: UpstreamRetryPolicy,

    #[serde(default)]
    pub on_exhausted: ExhaustionPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StyleGuidelines>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_style: Option<CitationStyle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<CustomCriteria>,
}

fn default_fuzzy_threshold() -> f64 {
    0.85
}

fn default_question_coverage() -> f64 {
    0.5
}

impl RunConfig {
    /// Configuration with the given retry cap and defaults everywhere else.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            word_range: WordRange::default(),
            section_word_ranges: BTreeMap::new(),
            fuzzy_threshold: default_fuzzy_threshold(),
            question_coverage_threshold: default_question_coverage(),
            questions: QuestionCount::default(),
            context: ContextLimits::default(),
            upstream: UpstreamRetryPolicy::default(),
            on_exhausted: ExhaustionPolicy::default(),
            style: None,
            citation_style: None,
            custom: None,
        }
    }

    /// Word range for the named section (override or default).
    pub fn word_range_for(&self, section_name: &str) -> WordRange {
        self.section_word_ranges
            .get(section_name.trim())
            .copied()
            .unwrap_or(self.word_range)
    }

    /// Citation style used for export (APA when none is declared).
    pub fn export_style(&self) -> CitationStyle {
        self.citation_style.unwrap_or_default()
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::MaxRetriesTooLarge {
                max: MAX_RETRIES_LIMIT,
                actual: self.max_retries,
            });
        }
        unit_interval("fuzzy_threshold", self.fuzzy_threshold)?;
        unit_interval(
            "question_coverage_threshold",
            self.question_coverage_threshold,
        )?;
        unit_interval("context.min_similarity", self.context.min_similarity)?;

        self.word_range.check("word_range")?;
        for (name, range) in &self.section_word_ranges {
            range.check(&format!("section_word_ranges.{name}"))?;
        }
        if self.questions.min == 0 {
            return Err(ConfigError::Zero {
                field: "questions.min",
            });
        }
        if self.questions.min > self.questions.max {
            return Err(ConfigError::InvertedRange {
                field: "questions".to_string(),
                min: self.questions.min,
                max: self.questions.max,
            });
        }
        if self.context.budget == 0 {
            return Err(ConfigError::Zero {
                field: "context.budget",
            });
        }
        if self.upstream.max_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "upstream.max_attempts",
            });
        }
        if let Some(custom) = &self.custom {
            if let (Some(min), Some(max)) = (custom.min_words, custom.max_words) {
                if min > max {
                    return Err(ConfigError::InvertedRange {
                        field: "custom.words".to_string(),
                        min,
                        max,
                    });
                }
            }
        }
        Ok(())
    }
}

fn unit_interval(field: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange { field, value })
    }
}

/// Inclusive target word-count range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordRange {
    pub min: usize,
    pub max: usize,
}

impl Default for WordRange {
    fn default() -> Self {
        Self {
            min: 1000,
            max: 1500,
        }
    }
}

impl WordRange {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, words: usize) -> bool {
        (self.min..=self.max).contains(&words)
    }

    fn check(&self, field: &str) -> std::result::Result<(), ConfigError> {
        if self.min > self.max {
            return Err(ConfigError::InvertedRange {
                field: field.to_string(),
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

impl fmt::Display for WordRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} words", self.min, self.max)
    }
}

/// Accepted number of research questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionCount {
    pub min: usize,
    pub max: usize,
}

impl Default for QuestionCount {
    fn default() -> Self {
        Self { min: 3, max: 12 }
    }
}

/// Unit used to measure the context budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetUnit {
    #[default]
    Words,
    /// Estimated tokens (~4 characters per token).
    Tokens,
}

impl fmt::Display for BudgetUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Words => write!(f, "words"),
            Self::Tokens => write!(f, "tokens"),
        }
    }
}

/// Limits applied by the context assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextLimits {
    pub budget: usize,
    pub unit: BudgetUnit,
    /// Maximum number of older sections included.
    pub older_sections_top_k: usize,
    /// Minimum relevance for an older section to be included.
    pub min_similarity: f64,
    /// Maximum number of retrieved sources included.
    pub max_sources: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            budget: 6000,
            unit: BudgetUnit::Words,
            older_sections_top_k: 3,
            min_similarity: 0.1,
            max_sources: 12,
        }
    }
}

/// Backoff policy for calls to external capabilities.
///
/// These retries never consume the drafting retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamRetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for UpstreamRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl UpstreamRetryPolicy {
    /// Delay before the given retry (1-based), doubling each time and capped.
    pub fn delay_for(&self, retry: u32) -> std::time::Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(20);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        std::time::Duration::from_millis(ms)
    }
}

/// What happens when a section runs out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Move the run to `FAILED`.
    #[default]
    Halt,
    /// Flag the section and continue with partial delivery.
    FlagAndContinue,
}

// ---------------------------------------------------------------------------
// Optional evaluation layers
// ---------------------------------------------------------------------------

/// Declared style targets. Only the targets that are set are checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleGuidelines {
    pub tone: Option<Tone>,
    pub clarity: Option<Clarity>,
    pub voice: Option<Voice>,
    pub sentence_complexity: Option<SentenceComplexity>,
    pub technical_depth: Option<TechnicalDepth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Formal,
    Professional,
    Conversational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clarity {
    Plain,
    Standard,
    Technical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Voice {
    Active,
    Balanced,
    Passive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentenceComplexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechnicalDepth {
    Introductory,
    Intermediate,
    Expert,
}

/// Citation style for in-text citations and bibliography entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStyle {
    #[default]
    Apa,
    Harvard,
    Mla,
    Chicago,
    Ieee,
}

impl fmt::Display for CitationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Apa => "APA",
            Self::Harvard => "Harvard",
            Self::Mla => "MLA",
            Self::Chicago => "Chicago",
            Self::Ieee => "IEEE",
        };
        f.write_str(name)
    }
}

/// A structural element a section must contain, detected by cue phrases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredElement {
    pub name: String,
    pub cues: Vec<String>,
}

/// User-defined acceptance criteria.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomCriteria {
    pub min_words: Option<usize>,
    pub max_words: Option<usize>,
    pub min_citations: Option<usize>,
    pub required_elements: Vec<RequiredElement>,
    pub forbidden_terms: Vec<String>,
    /// Discouraged variant -> preferred term.
    pub preferred_terms: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RunRequest {
        RunRequest {
            topic: "Soil carbon sequestration in temperate farms".to_string(),
            template: vec!["Introduction".to_string(), "Conclusion".to_string()],
            config: RunConfig::with_max_retries(2),
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_short_topic_rejected() {
        let mut req = request();
        req.topic = "soil".to_string();
        assert_eq!(
            req.validate(),
            Err(ConfigError::TopicTooShort { min: 10, actual: 4 })
        );
    }

    #[test]
    fn test_template_bounds() {
        let mut req = request();
        req.template.clear();
        assert!(matches!(
            req.validate(),
            Err(ConfigError::TemplateSize { actual: 0, .. })
        ));

        req.template = (0..41).map(|i| format!("Section {i}")).collect();
        assert!(matches!(
            req.validate(),
            Err(ConfigError::TemplateSize { actual: 41, .. })
        ));

        req.template = vec!["Intro".to_string(), "  ".to_string()];
        assert_eq!(
            req.validate(),
            Err(ConfigError::EmptySectionName { index: 1 })
        );
    }

    #[test]
    fn test_max_retries_required_in_input() {
        let text = r#"
            topic = "Soil carbon sequestration in temperate farms"
            template = ["Introduction"]
            [config]
            fuzzy_threshold = 0.9
        "#;
        assert!(RunRequest::from_toml(text).is_err());

        let text = r#"
            topic = "Soil carbon sequestration in temperate farms"
            template = ["Introduction"]
            [config]
            max_retries = 3
            citation_style = "harvard"
            [config.context]
            budget = 800
            unit = "tokens"
        "#;
        let req = RunRequest::from_toml(text).unwrap();
        assert_eq!(req.config.max_retries, 3);
        assert_eq!(req.config.citation_style, Some(CitationStyle::Harvard));
        assert_eq!(req.config.context.unit, BudgetUnit::Tokens);
        assert_eq!(req.config.context.max_sources, 12);
        assert_eq!(req.config.word_range, WordRange::new(1000, 1500));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_max_retries_upper_bound() {
        let mut req = request();
        req.config.max_retries = 11;
        assert!(matches!(
            req.validate(),
            Err(ConfigError::MaxRetriesTooLarge { actual: 11, .. })
        ));
    }

    #[test]
    fn test_thresholds_and_ranges() {
        let mut req = request();
        req.config.fuzzy_threshold = 1.2;
        assert!(matches!(
            req.validate(),
            Err(ConfigError::ThresholdOutOfRange {
                field: "fuzzy_threshold",
                ..
            })
        ));

        let mut req = request();
        req.config.word_range = WordRange::new(900, 100);
        assert!(matches!(
            req.validate(),
            Err(ConfigError::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_section_override() {
        let mut req = request();
        req.config
            .section_word_ranges
            .insert("Conclusion".to_string(), WordRange::new(200, 400));
        assert!(req.validate().is_ok());
        assert_eq!(
            req.config.word_range_for("Conclusion"),
            WordRange::new(200, 400)
        );
        assert_eq!(
            req.config.word_range_for("Introduction"),
            WordRange::default()
        );

        req.config
            .section_word_ranges
            .insert("Appendix".to_string(), WordRange::new(1, 2));
        assert!(matches!(
            req.validate(),
            Err(ConfigError::UnknownSectionOverride { .. })
        ));
    }

    #[test]
    fn test_backoff_delays() {
        let policy = UpstreamRetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(policy.delay_for(1).as_millis(), 100);
        assert_eq!(policy.delay_for(2).as_millis(), 200);
        assert_eq!(policy.delay_for(3).as_millis(), 350);
    }

    #[test]
    fn test_export_style_defaults_to_apa() {
        let config = RunConfig::with_max_retries(1);
        assert_eq!(config.export_style(), CitationStyle::Apa);
    }
}
