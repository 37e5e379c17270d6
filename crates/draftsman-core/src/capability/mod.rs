//! External capabilities consumed by the pipeline.
//!
//! The core never implements retrieval or text generation itself; it talks to
//! them through the [`SourceRepository`] and [`GenerationCapability`] traits.
//! Every call is wrapped by [`with_backoff`], which retries transient failures
//! without touching the drafting retry budget.

pub mod http;
pub mod memory;
pub mod relevance;

use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::domain::{DraftError, Result, ScoredSource, SourceRecord, UpstreamRetryPolicy};
use crate::metrics::METRICS;
use crate::obs;

pub use http::{HttpGenerationClient, HttpGenerationConfig};
pub use memory::InMemorySourceRepository;
pub use relevance::{KeywordRelevance, RankedId, RelevanceDocument, RelevanceIndex};

/// Failure reported by an external capability.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Retrieval over reference records.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Records most similar to `query`, highest score first.
    async fn query(
        &self,
        query: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<ScoredSource>, CapabilityError>;

    /// Record by id; `Ok(None)` when the id does not exist.
    async fn get(&self, source_id: &str)
        -> std::result::Result<Option<SourceRecord>, CapabilityError>;
}

/// What a generation call is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPurpose {
    ResearchQuestions,
    SectionDraft,
}

/// Input to the generation capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub purpose: GenerationPurpose,
    /// Rendered context payload.
    pub context: String,
    pub instructions: Vec<String>,
    /// Set for section drafts.
    pub section_index: Option<usize>,
}

/// Opaque text generation.
#[async_trait]
pub trait GenerationCapability: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> std::result::Result<String, CapabilityError>;
}

/// Cancellation signal shared with a running orchestrator.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal paired with the sender that triggers it.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested. Pending forever if the sender
    /// is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Run `op` under the upstream retry policy.
///
/// Waits `policy.delay_for(n)` between attempts. After `max_attempts`
/// failures the error becomes [`DraftError::UpstreamCapabilityFailure`].
/// Cancellation is honoured both during the call and during the delay.
pub async fn with_backoff<T, F, Fut>(
    capability: &str,
    policy: &UpstreamRetryPolicy,
    cancel: &CancelSignal,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, CapabilityError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DraftError::Cancelled),
            out = op() => out,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= max_attempts {
            return Err(DraftError::UpstreamCapabilityFailure {
                capability: capability.to_string(),
                attempts: attempt,
                message: err.to_string(),
            });
        }

        let delay = policy.delay_for(attempt);
        METRICS.inc_upstream_retries();
        obs::emit_capability_retry(capability, attempt, delay.as_millis() as u64, &err);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DraftError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
