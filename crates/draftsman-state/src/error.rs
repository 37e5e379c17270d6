//! Error types for draftsman-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the database.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by [`crate::CheckpointStore`] implementations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No checkpoint exists for the run.
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// The stored payload no longer hashes to its recorded digest.
    #[error("checkpoint digest mismatch for run {run_id} seq {seq}: expected {expected}, got {actual}")]
    DigestMismatch {
        run_id: String,
        seq: u64,
        expected: String,
        actual: String,
    },

    /// A digest string was not 64 hex characters.
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend-specific failure (connection, query, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
