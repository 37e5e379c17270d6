//! Style layer: measurable proxies for the declared style targets.

use std::fmt;

use crate::domain::{
    Clarity, Criterion, EvaluationResult, SentenceComplexity, StyleGuidelines, TechnicalDepth,
    Tone, Voice,
};
use crate::text::{
    average_sentence_length, informality_rate, long_word_ratio, passive_ratio, technical_density,
};

/// Letters a word needs to count as long for clarity.
pub const LONG_WORD_LETTERS: usize = 12;

/// Inclusive acceptance band for a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Band {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Band {
    const fn at_most(max: f64) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    const fn at_least(min: f64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    const fn between(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |m| value >= m) && self.max.map_or(true, |m| value <= m)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(lo), Some(hi)) => write!(f, "between {lo} and {hi}"),
            (Some(lo), None) => write!(f, "at least {lo}"),
            (None, Some(hi)) => write!(f, "at most {hi}"),
            (None, None) => f.write_str("any value"),
        }
    }
}

/// Informal markers per 100 words.
pub(crate) fn tone_band(tone: Tone) -> Band {
    match tone {
        Tone::Formal => Band::at_most(0.5),
        Tone::Professional => Band::at_most(1.5),
        Tone::Conversational => Band::at_least(0.5),
    }
}

/// Share of long words.
pub(crate) fn clarity_band(clarity: Clarity) -> Band {
    match clarity {
        Clarity::Plain => Band::at_most(0.05),
        Clarity::Standard => Band::at_most(0.10),
        Clarity::Technical => Band::at_most(0.20),
    }
}

/// Share of sentences in the passive voice.
pub(crate) fn voice_band(voice: Voice) -> Band {
    match voice {
        Voice::Active => Band::at_most(0.2),
        Voice::Balanced => Band::at_most(0.4),
        Voice::Passive => Band::at_least(0.2),
    }
}

/// Mean words per sentence.
pub(crate) fn complexity_band(complexity: SentenceComplexity) -> Band {
    match complexity {
        SentenceComplexity::Simple => Band::at_most(16.0),
        SentenceComplexity::Moderate => Band::between(12.0, 24.0),
        SentenceComplexity::Complex => Band::at_least(18.0),
    }
}

/// Share of technical vocabulary.
pub(crate) fn depth_band(depth: TechnicalDepth) -> Band {
    match depth {
        TechnicalDepth::Introductory => Band::at_most(0.08),
        TechnicalDepth::Intermediate => Band::between(0.04, 0.18),
        TechnicalDepth::Expert => Band::at_least(0.10),
    }
}

pub(crate) fn evaluate(guidelines: &StyleGuidelines, draft: &str, result: &mut EvaluationResult) {
    if let Some(tone) = guidelines.tone {
        check(
            result,
            Criterion::Tone,
            &format!("{tone:?}").to_lowercase(),
            "informal markers per 100 words",
            tone_band(tone),
            informality_rate(draft),
        );
    }
    if let Some(clarity) = guidelines.clarity {
        check(
            result,
            Criterion::Clarity,
            &format!("{clarity:?}").to_lowercase(),
            "share of words with 12+ letters",
            clarity_band(clarity),
            long_word_ratio(draft, LONG_WORD_LETTERS),
        );
    }
    if let Some(voice) = guidelines.voice {
        check(
            result,
            Criterion::Voice,
            &format!("{voice:?}").to_lowercase(),
            "share of passive sentences",
            voice_band(voice),
            passive_ratio(draft),
        );
    }
    if let Some(complexity) = guidelines.sentence_complexity {
        check(
            result,
            Criterion::SentenceComplexity,
            &format!("{complexity:?}").to_lowercase(),
            "words per sentence",
            complexity_band(complexity),
            average_sentence_length(draft),
        );
    }
    if let Some(depth) = guidelines.technical_depth {
        check(
            result,
            Criterion::TechnicalDepth,
            &format!("{depth:?}").to_lowercase(),
            "share of technical terms",
            depth_band(depth),
            technical_density(draft),
        );
    }
}

fn check(
    result: &mut EvaluationResult,
    criterion: Criterion,
    target: &str,
    metric: &str,
    band: Band,
    observed: f64,
) {
    if band.contains(observed) {
        result.satisfied(criterion, format!("{target}: {metric} {observed:.2}"));
    } else {
        result.violated(
            criterion,
            format!("{target}: {metric} {band}"),
            format!("{metric} {observed:.2}"),
        );
    }
}
