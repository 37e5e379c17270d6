//! Evaluation results, criteria and failure classes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Recoverable failure classes driving the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    CitationInvalid,
    QuestionUncovered,
    LengthViolation,
    StyleMismatch,
    StructuralViolation,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CitationInvalid => "citation_invalid",
            Self::QuestionUncovered => "question_uncovered",
            Self::LengthViolation => "length_violation",
            Self::StyleMismatch => "style_mismatch",
            Self::StructuralViolation => "structural_violation",
        };
        f.write_str(name)
    }
}

/// Evaluation layer a criterion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Base,
    Style,
    CitationStyle,
    Custom,
}

/// Individual acceptance criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    QuestionCoverage,
    CitationValidity,
    WordCount,
    Consistency,
    Tone,
    Clarity,
    Voice,
    SentenceComplexity,
    TechnicalDepth,
    InTextFormat,
    BibliographyFormat,
    MarkerSyntax,
    LengthBounds,
    MinCitations,
    RequiredElements,
    ForbiddenTerms,
    PreferredTerms,
}

impl Criterion {
    pub fn layer(self) -> Layer {
        match self {
            Self::QuestionCoverage | Self::CitationValidity | Self::WordCount | Self::Consistency => {
                Layer::Base
            }
            Self::Tone
            | Self::Clarity
            | Self::Voice
            | Self::SentenceComplexity
            | Self::TechnicalDepth => Layer::Style,
            Self::InTextFormat | Self::BibliographyFormat | Self::MarkerSyntax => {
                Layer::CitationStyle
            }
            Self::LengthBounds
            | Self::MinCitations
            | Self::RequiredElements
            | Self::ForbiddenTerms
            | Self::PreferredTerms => Layer::Custom,
        }
    }

    /// Failure class reported when this criterion is violated.
    pub fn category(self) -> FailureCategory {
        match self {
            Self::CitationValidity => FailureCategory::CitationInvalid,
            Self::QuestionCoverage => FailureCategory::QuestionUncovered,
            Self::WordCount | Self::LengthBounds => FailureCategory::LengthViolation,
            Self::MinCitations | Self::RequiredElements | Self::ForbiddenTerms => {
                FailureCategory::StructuralViolation
            }
            Self::Consistency
            | Self::Tone
            | Self::Clarity
            | Self::Voice
            | Self::SentenceComplexity
            | Self::TechnicalDepth
            | Self::InTextFormat
            | Self::BibliographyFormat
            | Self::MarkerSyntax
            | Self::PreferredTerms => FailureCategory::StyleMismatch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionStatus {
    Satisfied,
    Violated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionOutcome {
    pub status: CriterionStatus,
    pub details: String,
}

/// One failing check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub criterion: Criterion,
    pub category: FailureCategory,
    pub expected: String,
    pub observed: String,
}

/// Pass/fail verdict for one draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub passed: bool,
    pub criteria: BTreeMap<Criterion, CriterionOutcome>,
    pub feedback: Vec<FeedbackEntry>,
}

impl EvaluationResult {
    /// Record a satisfied criterion.
    pub fn satisfied(&mut self, criterion: Criterion, details: impl Into<String>) {
        self.criteria.insert(
            criterion,
            CriterionOutcome {
                status: CriterionStatus::Satisfied,
                details: details.into(),
            },
        );
    }

    /// Record a violated criterion together with its feedback entry.
    pub fn violated(
        &mut self,
        criterion: Criterion,
        expected: impl Into<String>,
        observed: impl Into<String>,
    ) {
        let expected = expected.into();
        let observed = observed.into();
        self.criteria.insert(
            criterion,
            CriterionOutcome {
                status: CriterionStatus::Violated,
                details: format!("expected {expected}; observed {observed}"),
            },
        );
        self.feedback.push(FeedbackEntry {
            criterion,
            category: criterion.category(),
            expected,
            observed,
        });
    }

    /// Set `passed` from the recorded criteria.
    pub fn finish(mut self) -> Self {
        self.passed = self
            .criteria
            .values()
            .all(|o| o.status == CriterionStatus::Satisfied);
        self
    }

    /// Distinct failure classes, in stable order.
    pub fn failure_categories(&self) -> Vec<FailureCategory> {
        let mut categories: Vec<FailureCategory> =
            self.feedback.iter().map(|f| f.category).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    /// Status per failure class (violated if any criterion of the class is).
    pub fn by_category(&self) -> BTreeMap<FailureCategory, CriterionStatus> {
        let mut out = BTreeMap::new();
        for (criterion, outcome) in &self.criteria {
            let entry = out
                .entry(criterion.category())
                .or_insert(CriterionStatus::Satisfied);
            if outcome.status == CriterionStatus::Violated {
                *entry = CriterionStatus::Violated;
            }
        }
        out
    }

    pub fn status_of(&self, criterion: Criterion) -> Option<CriterionStatus> {
        self.criteria.get(&criterion).map(|o| o.status)
    }
}
