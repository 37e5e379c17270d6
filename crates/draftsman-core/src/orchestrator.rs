//! Pipeline orchestrator.
//!
//! Drives a [`Run`] through
//! `PLANNING → AWAITING_APPROVAL → RESEARCHING → DRAFTING → EXPORTING → DONE`
//! with `FAILED` reachable from any non-terminal phase. Sections are drafted
//! strictly in template order. A checkpoint is saved after every phase change
//! and every section transition; [`Orchestrator::load`] followed by
//! [`Orchestrator::drive`] resumes from the last one.
//!
//! Failure handling:
//! - fatal errors (`context_overflow`, exhausted upstream retries, a section
//!   exhausted under the halt policy) record the reason and move the run to
//!   `FAILED`
//! - cancellation discards the in-flight attempt and leaves the run resumable
//! - storage errors propagate and leave the run at its last checkpoint

use std::sync::Arc;
use std::time::Instant;

use draftsman_state::{CheckpointStore, RunId, RunIndexEntry, StorageError};
use uuid::Uuid;

use crate::approval::{apply_approval, verify_approved_questions, ApprovalAction, ApprovalRecord};
use crate::capability::{
    with_backoff, CancelSignal, GenerationCapability, KeywordRelevance, RelevanceIndex,
    SourceRepository,
};
use crate::citation::CitationValidator;
use crate::context::ContextAssembler;
use crate::domain::{
    DraftError, ExhaustionPolicy, Result, RetryAttempt, Run, RunPhase, RunRequest, SectionState,
};
use crate::evaluator::{EvaluationInput, SectionEvaluator};
use crate::export::{build_bundle, cited_source_ids, index_sources};
use crate::metrics::METRICS;
use crate::obs::{self, RunSpan};
use crate::planning::{draft_request, parse_questions, question_request};
use crate::retry::{decide, RetryDecision};
use crate::text::acronym_definitions;

/// Where [`Orchestrator::drive`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Waiting for a reviewer to approve the research questions.
    AwaitingApproval { questions: usize },
    /// Exported. `flagged` lists sections delivered without passing.
    Completed { flagged: Vec<usize> },
    /// The run had already failed.
    Failed { reason: String },
}

/// Terminal result of one section's drafting loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionOutcome {
    Passed,
    Exhausted { attempts: u32 },
}

pub struct Orchestrator {
    sources: Arc<dyn SourceRepository>,
    generator: Arc<dyn GenerationCapability>,
    store: Arc<dyn CheckpointStore>,
    relevance: Arc<dyn RelevanceIndex>,
    cancel: CancelSignal,
}

impl Orchestrator {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        generator: Arc<dyn GenerationCapability>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            sources,
            generator,
            store,
            relevance: Arc::new(KeywordRelevance),
            cancel: CancelSignal::never(),
        }
    }

    /// Replace the index used to rank older sections for context.
    pub fn with_relevance(mut self, relevance: Arc<dyn RelevanceIndex>) -> Self {
        self.relevance = relevance;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    // -----------------------------------------------------------------------
    // Run lifecycle
    // -----------------------------------------------------------------------

    /// Validate the request and persist a new run in `PLANNING`.
    pub async fn create_run(&self, request: RunRequest) -> Result<Run> {
        let mut run = Run::new(request)?;
        obs::emit_run_created(&run.run_id.to_string(), &run.topic, run.sections.len());
        self.checkpoint(&mut run, "created").await?;
        Ok(run)
    }

    /// Latest checkpointed state of a run.
    pub async fn load(&self, run_id: Uuid) -> Result<Run> {
        let record = self
            .store
            .latest(&RunId::from(run_id))
            .await
            .map_err(|e| match e {
                StorageError::RunNotFound { .. } => DraftError::RunNotFound(run_id),
                other => DraftError::Storage(other),
            })?;
        Ok(serde_json::from_value(record.state)?)
    }

    pub async fn list(&self) -> Result<Vec<RunIndexEntry>> {
        Ok(self.store.list_runs().await?)
    }

    /// Remove every checkpoint of a run.
    pub async fn delete(&self, run_id: Uuid) -> Result<u64> {
        self.store
            .delete_run(&RunId::from(run_id))
            .await
            .map_err(|e| match e {
                StorageError::RunNotFound { .. } => DraftError::RunNotFound(run_id),
                other => DraftError::Storage(other),
            })
    }

    /// Persist the full run state under `label`.
    pub async fn checkpoint(&self, run: &mut Run, label: &str) -> Result<()> {
        run.touch();
        let state = serde_json::to_value(&*run)?;
        let run_id = run.run_id.to_string();
        let record = self.store.save(&RunId(run_id.clone()), label, &state).await?;
        METRICS.inc_checkpoints();
        obs::emit_checkpoint_saved(&run_id, record.seq, label);
        Ok(())
    }

    /// Apply a reviewer decision to a run in `AWAITING_APPROVAL`.
    pub async fn approve(&self, run: &mut Run, action: ApprovalAction) -> Result<ApprovalRecord> {
        let from = run.phase;
        let record = apply_approval(run, action)?;
        obs::emit_phase_changed(&run.run_id.to_string(), from, run.phase);
        self.checkpoint(run, "approval").await?;
        Ok(record)
    }

    /// Advance the run as far as it can go without a human.
    ///
    /// Stops at `AWAITING_APPROVAL`, `DONE` or `FAILED`.
    pub async fn drive(&self, run: &mut Run) -> Result<RunOutcome> {
        let run_id = run.run_id.to_string();
        let _span = RunSpan::enter(&run_id);
        let started = Instant::now();

        loop {
            let step = match run.phase {
                RunPhase::Planning => self.plan(run).await,
                RunPhase::AwaitingApproval => {
                    return Ok(RunOutcome::AwaitingApproval {
                        questions: run.questions.len(),
                    })
                }
                RunPhase::Researching => self.research(run).await,
                RunPhase::Drafting => self.draft_sections(run).await,
                RunPhase::Exporting => self.export(run).await,
                RunPhase::Done => {
                    let flagged: Vec<usize> =
                        run.flagged_sections().iter().map(|s| s.index).collect();
                    METRICS.flush();
                    obs::emit_run_finished(
                        &run_id,
                        run.phase,
                        started.elapsed().as_millis() as u64,
                        flagged.len(),
                    );
                    return Ok(RunOutcome::Completed { flagged });
                }
                RunPhase::Failed => {
                    let reason = run
                        .failure
                        .as_ref()
                        .map(|f| f.reason.clone())
                        .unwrap_or_default();
                    return Ok(RunOutcome::Failed { reason });
                }
            };

            if let Err(err) = step {
                return Err(self.settle_error(run, err, started).await);
            }
        }
    }

    async fn settle_error(&self, run: &mut Run, err: DraftError, started: Instant) -> DraftError {
        let run_id = run.run_id.to_string();
        if matches!(err, DraftError::Cancelled) {
            for section in &mut run.sections {
                section.discard_in_flight();
            }
            if let Err(save_err) = self.checkpoint(run, "cancelled").await {
                obs::emit_run_interrupted(&run_id, &save_err);
            }
            obs::emit_run_interrupted(&run_id, &err);
            return err;
        }

        if err.is_fatal() {
            let section = match &err {
                DraftError::SectionExhausted { index, .. } => Some(*index),
                DraftError::ContextOverflow { section, .. } => Some(*section),
                _ => None,
            };
            run.fail(err.to_string(), section);
            if let Err(save_err) = self.checkpoint(run, "phase:failed").await {
                obs::emit_run_interrupted(&run_id, &save_err);
            }
            METRICS.flush();
            obs::emit_run_finished(
                &run_id,
                run.phase,
                started.elapsed().as_millis() as u64,
                run.flagged_sections().len(),
            );
            return err;
        }

        obs::emit_run_interrupted(&run_id, &err);
        err
    }

    async fn advance(&self, run: &mut Run, next: RunPhase) -> Result<()> {
        let from = run.phase;
        run.transition(next)?;
        obs::emit_phase_changed(&run.run_id.to_string(), from, next);
        self.checkpoint(run, &format!("phase:{}", next.as_str().to_lowercase()))
            .await
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    /// Generate research questions and wait for approval.
    pub async fn plan(&self, run: &mut Run) -> Result<()> {
        if run.phase != RunPhase::Planning {
            return Err(DraftError::transition("run", run.phase, RunPhase::AwaitingApproval));
        }
        let request = question_request(run);
        let template = run.template();
        let count = run.config.questions;
        let generator = Arc::clone(&self.generator);

        let questions = with_backoff("generation", &run.config.upstream, &self.cancel, || {
            let generator = Arc::clone(&generator);
            let request = &request;
            let template = &template;
            async move {
                let raw = generator.generate(request).await?;
                parse_questions(&raw, template, count)
            }
        })
        .await?;

        run.questions = questions;
        self.advance(run, RunPhase::AwaitingApproval).await
    }

    /// Retrieve sources for every section.
    pub async fn research(&self, run: &mut Run) -> Result<()> {
        verify_approved_questions(run)?;
        let run_id = run.run_id.to_string();
        let top_k = run.config.context.max_sources;

        for index in 0..run.sections.len() {
            let query = {
                let section = &run.sections[index];
                let questions: Vec<&str> = run
                    .questions_for(index)
                    .iter()
                    .map(|q| q.text.as_str())
                    .collect();
                format!("{} {} {}", section.name, section.goal, questions.join(" "))
            };
            let sources = Arc::clone(&self.sources);
            let found = with_backoff("source_repository", &run.config.upstream, &self.cancel, || {
                let sources = Arc::clone(&sources);
                let query = &query;
                async move { sources.query(query, top_k).await }
            })
            .await?;

            if found.is_empty() {
                obs::emit_no_sources(&run_id, index, &run.sections[index].name);
            }
            run.sections[index].sources = found;
        }

        self.advance(run, RunPhase::Drafting).await
    }

    /// Draft every unsettled section in template order.
    pub async fn draft_sections(&self, run: &mut Run) -> Result<()> {
        for index in 0..run.sections.len() {
            if run.sections[index].state.is_terminal() {
                continue;
            }
            if let SectionOutcome::Exhausted { attempts } = self.draft_section(run, index).await? {
                if run.config.on_exhausted == ExhaustionPolicy::Halt {
                    return Err(DraftError::SectionExhausted {
                        index,
                        name: run.sections[index].name.clone(),
                        attempts,
                    });
                }
            }
        }
        if !run.all_settled() {
            return Err(DraftError::transition("run", run.phase, RunPhase::Exporting));
        }
        self.advance(run, RunPhase::Exporting).await
    }

    async fn set_section_state(
        &self,
        run: &mut Run,
        index: usize,
        next: SectionState,
    ) -> Result<()> {
        let section = &mut run.sections[index];
        let from = section.state;
        section.transition(next)?;
        obs::emit_section_state_changed(
            &run.run_id.to_string(),
            index,
            &section.name,
            from,
            next,
        );
        self.checkpoint(run, &format!("section:{index}:{}", next.as_str().to_lowercase()))
            .await
    }

    async fn draft_section(&self, run: &mut Run, index: usize) -> Result<SectionOutcome> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(DraftError::Cancelled);
            }
            match run.sections[index].state {
                SectionState::Pending => {
                    self.set_section_state(run, index, SectionState::Drafting).await?;
                }
                SectionState::Drafting => {
                    let draft = self.generate_draft(run, index).await?;
                    run.sections[index].pending_draft = Some(draft);
                    self.set_section_state(run, index, SectionState::Evaluating).await?;
                }
                SectionState::Evaluating => {
                    if run.sections[index].pending_draft.is_none() {
                        run.sections[index].discard_in_flight();
                        continue;
                    }
                    self.evaluate_pending(run, index).await?;
                }
                SectionState::Passed => return Ok(SectionOutcome::Passed),
                SectionState::FailedExhausted => {
                    return Ok(SectionOutcome::Exhausted {
                        attempts: run.sections[index].attempt_count(),
                    })
                }
            }
        }
    }

    async fn generate_draft(&self, run: &Run, index: usize) -> Result<String> {
        let payload =
            ContextAssembler::new(&run.config.context, self.relevance.as_ref()).assemble(run, index)?;
        let request = draft_request(run, &run.sections[index], &payload);
        let generator = Arc::clone(&self.generator);
        with_backoff("generation", &run.config.upstream, &self.cancel, || {
            let generator = Arc::clone(&generator);
            let request = &request;
            async move { generator.generate(request).await }
        })
        .await
    }

    async fn evaluate_pending(&self, run: &mut Run, index: usize) -> Result<()> {
        let run_id = run.run_id.to_string();
        let draft = run.sections[index].pending_draft.clone().unwrap_or_default();

        let report = CitationValidator::new(
            self.sources.as_ref(),
            run.config.fuzzy_threshold,
            &run.config.upstream,
            &self.cancel,
        )
        .validate(&draft)
        .await?;

        let evaluation = {
            let questions = run.questions_for(index);
            let input = EvaluationInput {
                draft: &draft,
                section: &run.sections[index],
                questions: &questions,
                citations: &report,
                previous_text: run
                    .previous_accepted(index)
                    .and_then(|s| s.final_text.as_deref()),
                terminology: &run.terminology,
            };
            SectionEvaluator::new(&run.config).evaluate(&input)
        };

        let section = &mut run.sections[index];
        let attempt = RetryAttempt {
            seq: section.attempt_count(),
            citations: report,
            failure_categories: evaluation.failure_categories(),
            instructions: section.must_fix.clone(),
            draft: draft.clone(),
            evaluation,
            created_at: chrono::Utc::now(),
        };
        METRICS.inc_attempts();
        obs::emit_attempt_evaluated(
            &run_id,
            index,
            attempt.seq,
            attempt.evaluation.passed,
            &attempt.failure_categories,
        );
        section.attempts.push(attempt.clone());
        section.pending_draft = None;

        match decide(section, &attempt, run.config.max_retries) {
            RetryDecision::Accept => {
                section.final_text = Some(draft.clone());
                section.must_fix.clear();
                for (acronym, long_form) in acronym_definitions(&draft) {
                    run.terminology.entry(acronym).or_insert(long_form);
                }
                METRICS.inc_passes();
                self.set_section_state(run, index, SectionState::Passed).await
            }
            RetryDecision::Retry { must_fix, .. } => {
                section.must_fix = must_fix;
                self.set_section_state(run, index, SectionState::Drafting).await
            }
            RetryDecision::Exhausted { attempts, .. } => {
                METRICS.inc_exhaustions();
                obs::emit_section_exhausted(&run_id, index, attempts);
                self.set_section_state(run, index, SectionState::FailedExhausted)
                    .await
            }
        }
    }

    /// Resolve every cited source and build the export bundle.
    pub async fn export(&self, run: &mut Run) -> Result<()> {
        let mut records = Vec::new();
        for id in cited_source_ids(run) {
            let sources = Arc::clone(&self.sources);
            let record = with_backoff("source_repository", &run.config.upstream, &self.cancel, || {
                let sources = Arc::clone(&sources);
                let id = &id;
                async move { sources.get(id).await }
            })
            .await?;
            records.extend(record);
        }
        run.export = Some(build_bundle(run, &index_sources(records))?);
        self.advance(run, RunPhase::Done).await
    }
}
