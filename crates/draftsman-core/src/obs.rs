//! Structured observability hooks for the drafting pipeline.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for lifecycle events: phase changes, section
//!   transitions, evaluated attempts, citation verdicts, upstream retries and
//!   checkpoints
//!
//! Events are emitted at `info!` level (warnings for degraded paths).
//! Filtering follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{info, warn};

use crate::domain::{CitationStatus, FailureCategory, MalformedKind, RunPhase, SectionState};

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// ```ignore
/// let _span = RunSpan::enter("6f1c...");
/// // every event below carries run_id = "6f1c..."
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("draftsman.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_run_created(run_id: &str, topic: &str, sections: usize) {
    info!(event = "run.created", run_id = %run_id, topic = %topic, sections = sections);
}

pub fn emit_phase_changed(run_id: &str, from: RunPhase, to: RunPhase) {
    info!(
        event = "run.phase_changed",
        run_id = %run_id,
        from = from.as_str(),
        to = to.as_str(),
    );
}

pub fn emit_section_state_changed(
    run_id: &str,
    index: usize,
    name: &str,
    from: SectionState,
    to: SectionState,
) {
    info!(
        event = "section.state_changed",
        run_id = %run_id,
        section = index,
        name = %name,
        from = from.as_str(),
        to = to.as_str(),
    );
}

/// Emit event: a draft was evaluated. `categories` is empty on a pass.
pub fn emit_attempt_evaluated(
    run_id: &str,
    index: usize,
    seq: u32,
    passed: bool,
    categories: &[FailureCategory],
) {
    let categories: Vec<String> = categories.iter().map(ToString::to_string).collect();
    info!(
        event = "section.attempt_evaluated",
        run_id = %run_id,
        section = index,
        attempt = seq,
        passed = passed,
        failure_categories = %categories.join(","),
    );
}

pub fn emit_section_exhausted(run_id: &str, index: usize, attempts: u32) {
    warn!(
        event = "section.exhausted",
        run_id = %run_id,
        section = index,
        attempts = attempts,
    );
}

pub fn emit_citation_validated(source_id: &str, status: CitationStatus, similarity: Option<f64>) {
    info!(
        event = "citation.validated",
        source_id = %source_id,
        status = ?status,
        similarity = similarity.unwrap_or(0.0),
    );
}

/// Emit event: citation-like text that cannot be checked (warning level).
pub fn emit_citation_malformed(kind: MalformedKind, raw: &str) {
    warn!(event = "citation.malformed", kind = kind.as_str(), raw = %raw);
}

/// Emit event: an upstream call failed and will be retried after `delay_ms`.
pub fn emit_capability_retry(
    capability: &str,
    attempt: u32,
    delay_ms: u64,
    error: &dyn std::fmt::Display,
) {
    warn!(
        event = "capability.retry",
        capability = %capability,
        attempt = attempt,
        delay_ms = delay_ms,
        error = %error,
    );
}

pub fn emit_checkpoint_saved(run_id: &str, seq: u64, label: &str) {
    info!(event = "run.checkpoint_saved", run_id = %run_id, seq = seq, label = %label);
}

/// Emit event: research found nothing for a section (warning level).
pub fn emit_no_sources(run_id: &str, index: usize, name: &str) {
    warn!(event = "research.no_sources", run_id = %run_id, section = index, name = %name);
}

pub fn emit_run_finished(run_id: &str, phase: RunPhase, duration_ms: u64, flagged: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        phase = phase.as_str(),
        duration_ms = duration_ms,
        flagged_sections = flagged,
    );
}

/// Emit event: the run stopped without reaching a terminal phase.
pub fn emit_run_interrupted(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.interrupted", run_id = %run_id, error = %error);
}
