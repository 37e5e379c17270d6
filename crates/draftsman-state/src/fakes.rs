//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryCheckpointStore`, which satisfies the [`CheckpointStore`]
//! contract without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory checkpoint store backed by a `HashMap<run_id, Vec<record>>`.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<HashMap<String, Vec<CheckpointRecord>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the payload of the newest checkpoint without updating its
    /// digest. Lets tests exercise corruption detection.
    pub fn corrupt_latest(&self, run_id: &RunId, state: serde_json::Value) -> bool {
        let mut runs = self.runs.lock().unwrap();
        match runs.get_mut(&run_id.0).and_then(|h| h.last_mut()) {
            Some(record) => {
                record.state = state;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        run_id: &RunId,
        label: &str,
        state: &serde_json::Value,
    ) -> StorageResult<CheckpointRecord> {
        let digest = ContentDigest::of_json(state)?;
        let mut runs = self.runs.lock().unwrap();
        let history = runs.entry(run_id.0.clone()).or_default();
        let record = CheckpointRecord {
            run_id: run_id.clone(),
            seq: history.last().map(|r| r.seq + 1).unwrap_or(1),
            label: label.to_string(),
            digest,
            state: state.clone(),
            created_at: Utc::now(),
        };
        history.push(record.clone());
        Ok(record)
    }

    async fn latest(&self, run_id: &RunId) -> StorageResult<CheckpointRecord> {
        let runs = self.runs.lock().unwrap();
        let record = runs
            .get(&run_id.0)
            .and_then(|h| h.last())
            .cloned()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        verify_checkpoint(&record)?;
        Ok(record)
    }

    async fn history(&self, run_id: &RunId) -> StorageResult<Vec<CheckpointRecord>> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id.0)
            .cloned()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn list_runs(&self) -> StorageResult<Vec<RunIndexEntry>> {
        let runs = self.runs.lock().unwrap();
        let mut entries: Vec<RunIndexEntry> = runs
            .values()
            .filter_map(|h| h.last())
            .map(|r| RunIndexEntry {
                run_id: r.run_id.clone(),
                latest_seq: r.seq,
                latest_label: r.label.clone(),
                updated_at: r.created_at,
            })
            .collect();
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(entries)
    }

    async fn delete_run(&self, run_id: &RunId) -> StorageResult<u64> {
        let mut runs = self.runs.lock().unwrap();
        runs.remove(&run_id.0)
            .map(|h| h.len() as u64)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }
}
