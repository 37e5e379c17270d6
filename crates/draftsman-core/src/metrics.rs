//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::CitationStatus;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters with no allocation or locking.
pub struct Metrics {
    attempts: AtomicU64,
    passes: AtomicU64,
    exhaustions: AtomicU64,
    citations_valid: AtomicU64,
    citations_unresolved: AtomicU64,
    citations_mismatched: AtomicU64,
    upstream_retries: AtomicU64,
    checkpoints: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            passes: AtomicU64::new(0),
            exhaustions: AtomicU64::new(0),
            citations_valid: AtomicU64::new(0),
            citations_unresolved: AtomicU64::new(0),
            citations_mismatched: AtomicU64::new(0),
            upstream_retries: AtomicU64::new(0),
            checkpoints: AtomicU64::new(0),
        }
    }

    /// One evaluated draft.
    pub fn inc_attempts(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "attempts", "counter incremented");
    }

    /// One section accepted.
    pub fn inc_passes(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "passes", "counter incremented");
    }

    /// One section out of retries.
    pub fn inc_exhaustions(&self) {
        self.exhaustions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "exhaustions", "counter incremented");
    }

    pub fn inc_citation(&self, status: CitationStatus) {
        let counter = match status {
            CitationStatus::Valid => &self.citations_valid,
            CitationStatus::UnresolvedId => &self.citations_unresolved,
            CitationStatus::QuoteMismatch => &self.citations_mismatched,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "citations", status = ?status, "counter incremented");
    }

    pub fn inc_upstream_retries(&self) {
        self.upstream_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "upstream_retries", "counter incremented");
    }

    pub fn inc_checkpoints(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "checkpoints", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a run) rather than on every
    /// increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            attempts = self.attempts(),
            passes = self.passes(),
            exhaustions = self.exhaustions(),
            citations_valid = self.citations_valid.load(Ordering::Relaxed),
            citations_unresolved = self.citations_unresolved.load(Ordering::Relaxed),
            citations_mismatched = self.citations_mismatched.load(Ordering::Relaxed),
            upstream_retries = self.upstream_retries(),
            checkpoints = self.checkpoints(),
        );
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn exhaustions(&self) -> u64 {
        self.exhaustions.load(Ordering::Relaxed)
    }

    /// Verdict count for one citation status.
    pub fn citations(&self, status: CitationStatus) -> u64 {
        match status {
            CitationStatus::Valid => self.citations_valid.load(Ordering::Relaxed),
            CitationStatus::UnresolvedId => self.citations_unresolved.load(Ordering::Relaxed),
            CitationStatus::QuoteMismatch => self.citations_mismatched.load(Ordering::Relaxed),
        }
    }

    pub fn upstream_retries(&self) -> u64 {
        self.upstream_retries.load(Ordering::Relaxed)
    }

    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.attempts,
            &self.passes,
            &self.exhaustions,
            &self.citations_valid,
            &self.citations_unresolved,
            &self.citations_mismatched,
            &self.upstream_retries,
            &self.checkpoints,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_attempts();
        m.inc_attempts();
        m.inc_passes();
        assert_eq!(m.attempts(), 2);
        assert_eq!(m.passes(), 1);

        m.inc_citation(CitationStatus::Valid);
        m.inc_citation(CitationStatus::QuoteMismatch);
        m.inc_citation(CitationStatus::QuoteMismatch);
        assert_eq!(m.citations(CitationStatus::Valid), 1);
        assert_eq!(m.citations(CitationStatus::QuoteMismatch), 2);
        assert_eq!(m.citations(CitationStatus::UnresolvedId), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_exhaustions();
        m.inc_upstream_retries();
        m.inc_checkpoints();
        m.reset();
        assert_eq!(m.exhaustions(), 0);
        assert_eq!(m.upstream_retries(), 0);
        assert_eq!(m.checkpoints(), 0);
    }
}
