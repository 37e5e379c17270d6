//! Database row types for the SurrealDB backend.
//!
//! Timestamps are stored as RFC 3339 strings and the run state as a JSON
//! string so rows round-trip through SurrealDB without type coercion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{CheckpointRecord, ContentDigest, RunId, StorageResult};

/// A row in the `checkpoints` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub run_id: String,
    pub seq: u64,
    pub label: String,
    pub digest: String,
    pub state_json: String,
    pub created_at: String,
}

impl CheckpointRow {
    /// Build a row from a record about to be stored.
    pub fn from_record(record: &CheckpointRecord) -> StorageResult<Self> {
        Ok(Self {
            id: None,
            run_id: record.run_id.0.clone(),
            seq: record.seq,
            label: record.label.clone(),
            digest: record.digest.as_str().to_string(),
            state_json: serde_json::to_string(&record.state)?,
            created_at: record.created_at.to_rfc3339(),
        })
    }

    /// Convert a stored row back into a record.
    pub fn into_record(self) -> StorageResult<CheckpointRecord> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| StorageError::Serialization(format!("bad created_at: {e}")))?
            .with_timezone(&Utc);
        Ok(CheckpointRecord {
            run_id: RunId(self.run_id),
            seq: self.seq,
            label: self.label,
            digest: ContentDigest::try_from(self.digest)?,
            state: serde_json::from_str(&self.state_json)?,
            created_at,
        })
    }
}
