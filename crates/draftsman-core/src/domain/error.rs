//! Domain-level error taxonomy for Draftsman.

use draftsman_state::StorageError;

use super::config::BudgetUnit;

/// Errors produced while validating run input and configuration.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("topic must be at least {min} characters (got {actual})")]
    TopicTooShort { min: usize, actual: usize },

    #[error("template must contain between 1 and {max} sections (got {actual})")]
    TemplateSize { max: usize, actual: usize },

    #[error("template entry {index} is empty")]
    EmptySectionName { index: usize },

    #[error("max_retries must be at most {max} (got {actual})")]
    MaxRetriesTooLarge { max: u32, actual: u32 },

    #[error("{field} must be within [0, 1] (got {value})")]
    ThresholdOutOfRange { field: &'static str, value: f64 },

    #[error("{field}: min ({min}) must not exceed max ({max})")]
    InvertedRange {
        field: String,
        min: usize,
        max: usize,
    },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("word range override for unknown section '{name}'")]
    UnknownSectionOverride { name: String },
}

/// Draftsman domain errors.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error(
        "context_overflow: section {section} needs {required} {unit} of mandatory context, budget is {budget}"
    )]
    ContextOverflow {
        section: usize,
        required: usize,
        budget: usize,
        unit: BudgetUnit,
    },

    #[error("upstream_capability_failure: {capability} failed after {attempts} attempts: {message}")]
    UpstreamCapabilityFailure {
        capability: String,
        attempts: u32,
        message: String,
    },

    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("section {index} ({name}) failed after {attempts} attempts")]
    SectionExhausted {
        index: usize,
        name: String,
        attempts: u32,
    },

    #[error("section {0} does not exist")]
    SectionNotFound(usize),

    #[error("approval rejected: {0}")]
    Approval(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("run not found: {0}")]
    RunNotFound(uuid::Uuid),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DraftError {
    /// Whether this error moves the run to `FAILED` instead of leaving it resumable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::ContextOverflow { .. }
                | Self::UpstreamCapabilityFailure { .. }
                | Self::SectionExhausted { .. }
        )
    }

    pub(crate) fn transition(
        entity: impl Into<String>,
        from: impl std::fmt::Debug,
        to: impl std::fmt::Debug,
    ) -> Self {
        Self::InvalidTransition {
            entity: entity.into(),
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }
}

/// Result type for Draftsman domain operations.
pub type Result<T> = std::result::Result<T, DraftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_overflow_display() {
        let err = DraftError::ContextOverflow {
            section: 2,
            required: 900,
            budget: 500,
            unit: BudgetUnit::Words,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("context_overflow"));
        assert!(msg.contains("900 words"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_upstream_failure_is_fatal() {
        let err = DraftError::UpstreamCapabilityFailure {
            capability: "generation".to_string(),
            attempts: 3,
            message: "timeout".to_string(),
        };
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_cancel_is_not_fatal() {
        assert!(!DraftError::Cancelled.is_fatal());
        let err = DraftError::transition("run", "Planning", "Done");
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("Planning -> Done"));
    }

    #[test]
    fn test_config_error_wraps() {
        let err: DraftError = ConfigError::TopicTooShort { min: 10, actual: 3 }.into();
        assert!(err.to_string().contains("invalid configuration"));
    }
}
