//! Bounded retry decisions for section drafts.
//!
//! After each evaluated attempt the controller either accepts the draft,
//! asks for another attempt with must-fix instructions covering only the
//! failing categories, or reports the section exhausted. A section never
//! gets more than `max_retries + 1` attempts.

use serde::{Deserialize, Serialize};

use crate::domain::{
    AttemptSummary, EvaluationResult, FailureCategory, FeedbackEntry, RetryAttempt, Section,
};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// What happens after an evaluated attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryDecision {
    /// The draft passed; it becomes the section's final text.
    Accept,

    /// Draft again under the given instructions.
    Retry {
        /// 0-based sequence number of the next attempt.
        next_attempt: u32,
        categories: Vec<FailureCategory>,
        must_fix: Vec<String>,
    },

    /// The budget is spent.
    Exhausted {
        attempts: u32,
        history: Vec<AttemptSummary>,
    },
}

/// Decide the next step for `section`, whose latest attempt is `latest`.
///
/// `latest` must already be appended to `section.attempts`.
pub fn decide(section: &Section, latest: &RetryAttempt, max_retries: u32) -> RetryDecision {
    if latest.evaluation.passed {
        return RetryDecision::Accept;
    }

    let attempts = section.attempt_count();
    if attempts > max_retries {
        return RetryDecision::Exhausted {
            attempts,
            history: section.retry_history(),
        };
    }

    RetryDecision::Retry {
        next_attempt: attempts,
        categories: latest.failure_categories.clone(),
        must_fix: must_fix_instructions(&latest.evaluation),
    }
}

// ---------------------------------------------------------------------------
// Must-fix instructions
// ---------------------------------------------------------------------------

/// One directive per failing check, grouped by category in stable order.
/// Satisfied criteria produce nothing.
pub fn must_fix_instructions(evaluation: &EvaluationResult) -> Vec<String> {
    let mut feedback: Vec<&FeedbackEntry> = evaluation.feedback.iter().collect();
    feedback.sort_by_key(|f| (f.category, f.criterion));
    feedback.into_iter().map(directive).collect()
}

fn directive(entry: &FeedbackEntry) -> String {
    let action = match entry.category {
        FailureCategory::CitationInvalid => {
            "Fix these citations: cite only the listed source ids, only as [source_id: \"verbatim quote\"] markers, with no other citation forms or reference lists"
        }
        FailureCategory::QuestionUncovered => "Explicitly address these research questions",
        FailureCategory::LengthViolation => "Adjust the length",
        FailureCategory::StyleMismatch => "Revise the style",
        FailureCategory::StructuralViolation => "Fix the structure",
    };
    format!(
        "[{}] {}. Expected {}; observed {}.",
        entry.category,
        action,
        entry.expected,
        entry.observed.trim_end_matches('.')
    )
}
