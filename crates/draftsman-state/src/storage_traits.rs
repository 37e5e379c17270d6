//! Storage trait definitions for Draftsman
//!
//! A run is persisted as an append-only sequence of checkpoints. Each
//! checkpoint carries the full serialized run state, so resuming a run only
//! needs the latest one. History is kept for audit and is removed only by an
//! explicit [`CheckpointStore::delete_run`].
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of the canonical JSON encoding of `value`.
    pub fn of_json(value: &serde_json::Value) -> StorageResult<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Identifier of a persisted run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<uuid::Uuid> for RunId {
    fn from(id: uuid::Uuid) -> Self {
        RunId(id.to_string())
    }
}

/// One persisted snapshot of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub run_id: RunId,
    /// 1-based, strictly increasing within a run.
    pub seq: u64,
    /// What transition produced this checkpoint (e.g. "phase:drafting").
    pub label: String,
    /// SHA-256 of the JSON-encoded `state`.
    pub digest: ContentDigest,
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Listing entry: the newest checkpoint of one run, without its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIndexEntry {
    pub run_id: RunId,
    pub latest_seq: u64,
    pub latest_label: String,
    pub updated_at: DateTime<Utc>,
}

/// Append-only checkpoint persistence for runs.
///
/// Guarantees:
/// - `save` assigns `seq = previous + 1` (first checkpoint is 1).
/// - `latest` returns the checkpoint with the highest `seq` and verifies its
///   digest; a mismatch is reported as `StorageError::DigestMismatch`.
/// - Checkpoints are never removed except by `delete_run`.
/// - Runs are independent: operations on one run never touch another.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a new checkpoint and return the stored record.
    async fn save(
        &self,
        run_id: &RunId,
        label: &str,
        state: &serde_json::Value,
    ) -> StorageResult<CheckpointRecord>;

    /// Newest checkpoint for a run. `StorageError::RunNotFound` if none.
    async fn latest(&self, run_id: &RunId) -> StorageResult<CheckpointRecord>;

    /// All checkpoints for a run ordered by `seq` ascending.
    async fn history(&self, run_id: &RunId) -> StorageResult<Vec<CheckpointRecord>>;

    /// One entry per known run, most recently updated first.
    async fn list_runs(&self) -> StorageResult<Vec<RunIndexEntry>>;

    /// Remove every checkpoint of a run, returning how many were removed.
    /// `StorageError::RunNotFound` if the run has no checkpoints.
    async fn delete_run(&self, run_id: &RunId) -> StorageResult<u64>;
}

/// Verify that a record's payload still hashes to its stored digest.
pub fn verify_checkpoint(record: &CheckpointRecord) -> StorageResult<()> {
    let actual = ContentDigest::of_json(&record.state)?;
    if actual != record.digest {
        return Err(StorageError::DigestMismatch {
            run_id: record.run_id.0.clone(),
            seq: record.seq,
            expected: record.digest.as_str().to_string(),
            actual: actual.as_str().to_string(),
        });
    }
    Ok(())
}
