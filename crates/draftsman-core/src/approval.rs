//! Human approval of research questions.
//!
//! Drafting never starts before a reviewer has approved (or edited and then
//! approved) the questions. The approval record pins the exact question set
//! by digest; questions and configuration are frozen from then on.

use chrono::{DateTime, Utc};
use draftsman_state::ContentDigest;
use serde::{Deserialize, Serialize};

use crate::domain::{DraftError, ResearchQuestion, Result, Run, RunPhase};

/// Reviewer decision on the proposed questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalAction {
    /// Accept the questions as proposed.
    Approve { reviewer: String },
    /// Replace the questions, then accept the replacement.
    Edit {
        reviewer: String,
        questions: Vec<ResearchQuestion>,
    },
}

impl ApprovalAction {
    pub fn reviewer(&self) -> &str {
        match self {
            Self::Approve { reviewer } | Self::Edit { reviewer, .. } => reviewer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Approved,
    EditedAndApproved,
}

/// Audit record of the approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub reviewer: String,
    pub kind: ApprovalKind,
    /// Digest of the approved question list.
    pub questions_digest: String,
    pub question_count: usize,
    pub approved_at: DateTime<Utc>,
}

/// Questions awaiting review, or `None` when the run is not waiting.
pub fn pending_questions(run: &Run) -> Option<&[ResearchQuestion]> {
    (run.phase == RunPhase::AwaitingApproval).then_some(run.questions.as_slice())
}

/// Apply a reviewer decision and move the run to `RESEARCHING`.
pub fn apply_approval(run: &mut Run, action: ApprovalAction) -> Result<ApprovalRecord> {
    if run.phase != RunPhase::AwaitingApproval {
        return Err(DraftError::Approval(format!(
            "run is {}, not AWAITING_APPROVAL",
            run.phase.as_str()
        )));
    }
    if action.reviewer().trim().is_empty() {
        return Err(DraftError::Approval("reviewer must be named".to_string()));
    }

    let kind = match &action {
        ApprovalAction::Approve { .. } => ApprovalKind::Approved,
        ApprovalAction::Edit { questions, .. } => {
            validate_questions(questions, run.sections.len())?;
            run.questions = renumber(questions);
            ApprovalKind::EditedAndApproved
        }
    };
    if run.questions.is_empty() {
        return Err(DraftError::Approval("no questions to approve".to_string()));
    }

    let digest = ContentDigest::of_json(&serde_json::to_value(&run.questions)?)?;
    let record = ApprovalRecord {
        reviewer: action.reviewer().trim().to_string(),
        kind,
        questions_digest: digest.as_str().to_string(),
        question_count: run.questions.len(),
        approved_at: Utc::now(),
    };

    run.approval = Some(record.clone());
    run.transition(RunPhase::Researching)?;
    Ok(record)
}

/// Whether the run's questions still match what was approved.
pub fn verify_approved_questions(run: &Run) -> Result<()> {
    let Some(record) = &run.approval else {
        return Err(DraftError::Approval("questions have not been approved".to_string()));
    };
    let actual = ContentDigest::of_json(&serde_json::to_value(&run.questions)?)?;
    if actual.as_str() != record.questions_digest {
        return Err(DraftError::DigestMismatch {
            expected: record.questions_digest.clone(),
            actual: actual.as_str().to_string(),
        });
    }
    Ok(())
}

fn validate_questions(questions: &[ResearchQuestion], sections: usize) -> Result<()> {
    if questions.is_empty() {
        return Err(DraftError::Approval("edited question list is empty".to_string()));
    }
    for (i, q) in questions.iter().enumerate() {
        if q.text.trim().is_empty() {
            return Err(DraftError::Approval(format!("question {} is empty", i + 1)));
        }
        if let Some(bad) = q.target_sections.iter().find(|t| **t >= sections) {
            return Err(DraftError::Approval(format!(
                "question {} targets section {bad}, but the template has {sections}",
                i + 1
            )));
        }
    }
    Ok(())
}

fn renumber(questions: &[ResearchQuestion]) -> Vec<ResearchQuestion> {
    questions
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let mut targets = q.target_sections.clone();
            targets.sort_unstable();
            targets.dedup();
            ResearchQuestion {
                id: i as u32 + 1,
                text: q.text.trim().to_string(),
                target_sections: targets,
            }
        })
        .collect()
}
