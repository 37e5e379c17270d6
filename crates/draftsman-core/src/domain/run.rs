//! Runs, phases and research questions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::{RunConfig, RunRequest};
use super::error::{DraftError, Result};
use super::section::{AttemptSummary, Section, SectionState};
use crate::approval::ApprovalRecord;
use crate::export::ExportBundle;
use crate::planning::section_goal;

/// Top-level phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Planning,
    AwaitingApproval,
    Researching,
    Drafting,
    Exporting,
    Done,
    Failed,
}

impl RunPhase {
    /// Forward edges plus `FAILED` from any non-terminal phase.
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Planning, AwaitingApproval)
            | (AwaitingApproval, Researching)
            | (Researching, Drafting)
            | (Drafting, Exporting)
            | (Exporting, Done) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "PLANNING",
            Self::AwaitingApproval => "AWAITING_APPROVAL",
            Self::Researching => "RESEARCHING",
            Self::Drafting => "DRAFTING",
            Self::Exporting => "EXPORTING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

/// A research question. Immutable once approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchQuestion {
    pub id: u32,
    pub text: String,
    /// Template indices this question is assigned to; empty means all.
    #[serde(default)]
    pub target_sections: Vec<usize>,
}

impl ResearchQuestion {
    pub fn applies_to(&self, section_index: usize) -> bool {
        self.target_sections.is_empty() || self.target_sections.contains(&section_index)
    }
}

/// Why a run ended in `FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub phase: RunPhase,
    pub reason: String,
    pub section: Option<usize>,
    #[serde(default)]
    pub retry_history: Vec<AttemptSummary>,
    pub failed_at: DateTime<Utc>,
}

/// One document job. The single source of truth threaded through every
/// component and persisted at every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: Uuid,
    pub topic: String,
    pub config: RunConfig,
    pub phase: RunPhase,
    pub questions: Vec<ResearchQuestion>,
    pub approval: Option<ApprovalRecord>,
    pub sections: Vec<Section>,
    /// Acronym -> long form, accumulated from accepted sections.
    #[serde(default)]
    pub terminology: BTreeMap<String, String>,
    pub failure: Option<RunFailure>,
    pub export: Option<ExportBundle>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Validate the request and build a run in `PLANNING`.
    pub fn new(request: RunRequest) -> Result<Self> {
        request.validate()?;
        let RunRequest {
            topic,
            template,
            config,
        } = request;

        let sections = template
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let name = name.trim();
                Section::new(index, name, section_goal(name), config.word_range_for(name))
            })
            .collect();

        let now = Utc::now();
        Ok(Self {
            run_id: Uuid::new_v4(),
            topic: topic.trim().to_string(),
            config,
            phase: RunPhase::Planning,
            questions: Vec::new(),
            approval: None,
            sections,
            terminology: BTreeMap::new(),
            failure: None,
            export: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn transition(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(DraftError::transition("run", self.phase, next));
        }
        self.phase = next;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn questions_approved(&self) -> bool {
        self.approval.is_some()
    }

    /// Replace the configuration. Rejected once questions are approved.
    pub fn update_config(&mut self, config: RunConfig) -> Result<()> {
        if self.questions_approved() {
            return Err(DraftError::Approval(
                "configuration is frozen after question approval".to_string(),
            ));
        }
        config.validate()?;
        for section in &mut self.sections {
            section.word_range = config.word_range_for(&section.name);
        }
        self.config = config;
        self.touch();
        Ok(())
    }

    pub fn template(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Questions assigned to the section at `index`.
    pub fn questions_for(&self, index: usize) -> Vec<&ResearchQuestion> {
        self.questions
            .iter()
            .filter(|q| q.applies_to(index))
            .collect()
    }

    /// Accepted text of the nearest earlier section that has one.
    pub fn previous_accepted(&self, index: usize) -> Option<&Section> {
        self.sections[..index.min(self.sections.len())]
            .iter()
            .rev()
            .find(|s| s.final_text.is_some())
    }

    /// Sections flagged under partial delivery.
    pub fn flagged_sections(&self) -> Vec<&Section> {
        self.sections
            .iter()
            .filter(|s| s.state == SectionState::FailedExhausted)
            .collect()
    }

    /// Every section is `PASSED`.
    pub fn all_passed(&self) -> bool {
        self.sections.iter().all(|s| s.state == SectionState::Passed)
    }

    /// Every section reached a terminal state.
    pub fn all_settled(&self) -> bool {
        self.sections.iter().all(|s| s.state.is_terminal())
    }

    /// Record a failure and move to `FAILED`.
    pub fn fail(&mut self, reason: impl Into<String>, section: Option<usize>) {
        let retry_history = section
            .and_then(|i| self.sections.get(i))
            .map(Section::retry_history)
            .unwrap_or_default();
        self.failure = Some(RunFailure {
            phase: self.phase,
            reason: reason.into(),
            section,
            retry_history,
            failed_at: Utc::now(),
        });
        self.phase = RunPhase::Failed;
        self.touch();
    }
}
