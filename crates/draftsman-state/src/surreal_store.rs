//! SurrealDB-backed CheckpointStore implementation
//!
//! Uses `schema::CheckpointRow` for persistence, converting to/from
//! `storage_traits` types at the boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::handle;
use crate::schema::CheckpointRow;
use crate::storage_traits::{
    verify_checkpoint, CheckpointRecord, CheckpointStore, ContentDigest, RunId, RunIndexEntry,
    StorageResult,
};

/// SurrealDB-backed implementation of [`CheckpointStore`].
pub struct SurrealCheckpointStore {
    db: Surreal<Any>,
}

impl SurrealCheckpointStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = handle::connect_url("mem://").await?;
        info!("SurrealCheckpointStore connected (in-memory)");
        Ok(Self { db })
    }

    /// Create from environment variables, or from an explicit url.
    pub async fn from_env(url: Option<&str>) -> crate::Result<Self> {
        let db = handle::connect_from_env(url).await?;
        Ok(Self { db })
    }

    /// Wrap an already-connected database handle.
    pub fn from_db(db: Surreal<Any>) -> Self {
        Self { db }
    }

    async fn fetch_rows(&self, run_id: &RunId) -> StorageResult<Vec<CheckpointRow>> {
        let rid_owned = run_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM checkpoints WHERE run_id = $rid ORDER BY seq ASC")
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        res.take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn fetch_latest_row(&self, run_id: &RunId) -> StorageResult<Option<CheckpointRow>> {
        let rid_owned = run_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM checkpoints WHERE run_id = $rid ORDER BY seq DESC LIMIT 1")
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<CheckpointRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl CheckpointStore for SurrealCheckpointStore {
    async fn save(
        &self,
        run_id: &RunId,
        label: &str,
        state: &serde_json::Value,
    ) -> StorageResult<CheckpointRecord> {
        let seq = self
            .fetch_latest_row(run_id)
            .await?
            .map(|r| r.seq + 1)
            .unwrap_or(1);

        let record = CheckpointRecord {
            run_id: run_id.clone(),
            seq,
            label: label.to_string(),
            digest: ContentDigest::of_json(state)?,
            state: state.clone(),
            created_at: Utc::now(),
        };
        let row = CheckpointRow::from_record(&record)?;

        debug!(run_id = %run_id, seq = seq, label = %label, "saving checkpoint");

        let _created: Option<CheckpointRow> = self
            .db
            .create("checkpoints")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(record)
    }

    async fn latest(&self, run_id: &RunId) -> StorageResult<CheckpointRecord> {
        let row = self
            .fetch_latest_row(run_id)
            .await?
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        let record = row.into_record()?;
        verify_checkpoint(&record)?;
        Ok(record)
    }

    async fn history(&self, run_id: &RunId) -> StorageResult<Vec<CheckpointRecord>> {
        let rows = self.fetch_rows(run_id).await?;
        if rows.is_empty() {
            return Err(StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            });
        }
        rows.into_iter().map(CheckpointRow::into_record).collect()
    }

    async fn list_runs(&self) -> StorageResult<Vec<RunIndexEntry>> {
        let mut res = self
            .db
            .query("SELECT run_id, seq, label, created_at FROM checkpoints ORDER BY seq ASC")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        #[derive(serde::Deserialize)]
        struct IndexRow {
            run_id: String,
            seq: u64,
            label: String,
            created_at: String,
        }

        let rows: Vec<IndexRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut newest: BTreeMap<String, IndexRow> = BTreeMap::new();
        for row in rows {
            match newest.get(&row.run_id) {
                Some(existing) if existing.seq >= row.seq => {}
                _ => {
                    newest.insert(row.run_id.clone(), row);
                }
            }
        }

        let mut entries = newest
            .into_values()
            .map(|row| {
                let updated_at = chrono::DateTime::parse_from_rfc3339(&row.created_at)
                    .map_err(|e| StorageError::Serialization(format!("bad created_at: {e}")))?
                    .with_timezone(&Utc);
                Ok(RunIndexEntry {
                    run_id: RunId(row.run_id),
                    latest_seq: row.seq,
                    latest_label: row.label,
                    updated_at,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(entries)
    }

    async fn delete_run(&self, run_id: &RunId) -> StorageResult<u64> {
        let count = self.fetch_rows(run_id).await?.len() as u64;
        if count == 0 {
            return Err(StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            });
        }

        let rid_owned = run_id.0.clone();
        self.db
            .query("DELETE checkpoints WHERE run_id = $rid")
            .bind(("rid", rid_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        info!(run_id = %run_id, removed = count, "run checkpoints deleted");
        Ok(count)
    }
}
