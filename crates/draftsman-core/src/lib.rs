//! Draftsman Core Library
//!
//! Grounded long-form drafting: a run plans research questions, waits for a
//! reviewer to approve them, retrieves sources, then drafts each section in
//! template order under a bounded retry loop in which every citation is
//! checked against the source repository before a draft is accepted.

pub mod approval;
pub mod capability;
pub mod citation;
pub mod context;
pub mod domain;
pub mod evaluator;
pub mod export;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod planning;
pub mod retry;
pub mod telemetry;
pub mod text;

pub use domain::{
    CitationStatus, CitationStyle, ConfigError, DraftError, EvaluationResult, ExhaustionPolicy,
    FailureCategory, ResearchQuestion, Result, Run, RunConfig, RunPhase, RunRequest, Section,
    SectionState, SourceMetadata, SourceRecord,
};

pub use approval::{apply_approval, pending_questions, ApprovalAction, ApprovalKind, ApprovalRecord};
pub use capability::{
    with_backoff, CancelSignal, CapabilityError, GenerationCapability, GenerationPurpose,
    GenerationRequest, HttpGenerationClient, HttpGenerationConfig, InMemorySourceRepository,
    KeywordRelevance, RelevanceIndex, SourceRepository,
};
pub use citation::{parse_markers, CitationValidator};
pub use context::{ContextAssembler, ContextPayload, ContextTier};
pub use evaluator::{EvaluationInput, SectionEvaluator};
pub use export::{
    build_bundle, read_export_artifact, render_markdown, write_export_artifact, ExportBundle,
    ExportPaths,
};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use retry::{decide, must_fix_instructions, RetryDecision};

pub use metrics::METRICS;
pub use obs::RunSpan;
pub use telemetry::init_tracing;

/// Draftsman version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
