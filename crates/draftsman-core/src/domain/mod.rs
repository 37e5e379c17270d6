//! Domain models for Draftsman.
//!
//! Canonical definitions for the core entities:
//! - `Run`: one document job and its phase
//! - `Section`: a template position with its retry attempts
//! - `RunConfig`: immutable per-run configuration
//! - `SourceRecord`: reference material served by the source repository
//! - `EvaluationResult`: layered acceptance verdict for a draft

pub mod citation;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod run;
pub mod section;
pub mod source;

pub use citation::{
    CitationMarker, CitationReport, CitationStatus, CitationVerdict, MalformedCitation,
    MalformedKind, QuoteStyle,
};
pub use config::{
    BudgetUnit, CitationStyle, Clarity, ContextLimits, CustomCriteria, ExhaustionPolicy,
    QuestionCount, RequiredElement, RunConfig, RunRequest, SentenceComplexity, StyleGuidelines,
    TechnicalDepth, Tone, UpstreamRetryPolicy, Voice, WordRange,
};
pub use error::{ConfigError, DraftError, Result};
pub use evaluation::{
    Criterion, CriterionOutcome, CriterionStatus, EvaluationResult, FailureCategory,
    FeedbackEntry, Layer,
};
pub use run::{ResearchQuestion, Run, RunFailure, RunPhase};
pub use section::{AttemptSummary, RetryAttempt, Section, SectionState};
pub use source::{split_name, ScoredSource, SourceMetadata, SourceRecord};
