//! Sections and their retry attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::citation::CitationReport;
use super::config::WordRange;
use super::error::{DraftError, Result};
use super::evaluation::{EvaluationResult, FailureCategory};
use super::source::ScoredSource;

/// Section sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionState {
    Pending,
    Drafting,
    Evaluating,
    Passed,
    FailedExhausted,
}

impl SectionState {
    pub fn can_transition_to(self, next: SectionState) -> bool {
        use SectionState::*;
        matches!(
            (self, next),
            (Pending, Drafting)
                | (Drafting, Evaluating)
                | (Evaluating, Passed)
                | (Evaluating, Drafting)
                | (Evaluating, FailedExhausted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::FailedExhausted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Drafting => "DRAFTING",
            Self::Evaluating => "EVALUATING",
            Self::Passed => "PASSED",
            Self::FailedExhausted => "FAILED_EXHAUSTED",
        }
    }
}

/// One evaluated draft of a section. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 0-based attempt number.
    pub seq: u32,
    pub draft: String,
    /// Validator verdicts for `draft`.
    pub citations: CitationReport,
    pub evaluation: EvaluationResult,
    pub failure_categories: Vec<FailureCategory>,
    /// Must-fix instructions this draft was generated under.
    pub instructions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Condensed view of one attempt for failure reports and status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub seq: u32,
    pub passed: bool,
    pub failure_categories: Vec<FailureCategory>,
    /// `expected` / `observed` pairs of the failing checks.
    pub feedback: Vec<String>,
}

impl From<&RetryAttempt> for AttemptSummary {
    fn from(attempt: &RetryAttempt) -> Self {
        Self {
            seq: attempt.seq,
            passed: attempt.evaluation.passed,
            failure_categories: attempt.failure_categories.clone(),
            feedback: attempt
                .evaluation
                .feedback
                .iter()
                .map(|f| format!("{}: expected {}; observed {}", f.category, f.expected, f.observed))
                .collect(),
        }
    }
}

/// A position in the section template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub index: usize,
    pub name: String,
    pub goal: String,
    pub word_range: WordRange,
    pub state: SectionState,
    pub final_text: Option<String>,
    pub attempts: Vec<RetryAttempt>,
    /// Sources retrieved for this section during research.
    #[serde(default)]
    pub sources: Vec<ScoredSource>,
    /// Must-fix instructions for the next draft.
    #[serde(default)]
    pub must_fix: Vec<String>,
    /// Draft awaiting evaluation.
    #[serde(default)]
    pub pending_draft: Option<String>,
}

impl Section {
    pub fn new(index: usize, name: impl Into<String>, goal: impl Into<String>, word_range: WordRange) -> Self {
        Self {
            index,
            name: name.into(),
            goal: goal.into(),
            word_range,
            state: SectionState::Pending,
            final_text: None,
            attempts: Vec::new(),
            sources: Vec::new(),
            must_fix: Vec::new(),
            pending_draft: None,
        }
    }

    pub fn transition(&mut self, next: SectionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DraftError::transition(
                format!("section {}", self.index),
                self.state,
                next,
            ));
        }
        self.state = next;
        Ok(())
    }

    /// Drop the in-flight attempt: any unevaluated draft is discarded and the
    /// section returns to `DRAFTING` so the attempt is regenerated on resume.
    pub fn discard_in_flight(&mut self) {
        self.pending_draft = None;
        if self.state == SectionState::Evaluating {
            self.state = SectionState::Drafting;
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn latest_attempt(&self) -> Option<&RetryAttempt> {
        self.attempts.last()
    }

    pub fn retry_history(&self) -> Vec<AttemptSummary> {
        self.attempts.iter().map(AttemptSummary::from).collect()
    }
}
