//! In-memory source repository, optionally loaded from a JSON file.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::relevance::KeywordRelevance;
use super::{CapabilityError, SourceRepository};
use crate::domain::{Result, ScoredSource, SourceRecord};

/// Source records held in memory and ranked with [`KeywordRelevance`].
#[derive(Debug, Clone, Default)]
pub struct InMemorySourceRepository {
    records: Vec<SourceRecord>,
}

impl InMemorySourceRepository {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self { records }
    }

    /// Load records from a JSON array (or `{"sources": [...]}`).
    pub fn from_json_str(text: &str) -> Result<Self> {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum SourceFile {
            List(Vec<SourceRecord>),
            Wrapped { sources: Vec<SourceRecord> },
        }

        let records = match serde_json::from_str::<SourceFile>(text)? {
            SourceFile::List(records) | SourceFile::Wrapped { sources: records } => records,
        };
        Ok(Self::new(records))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let repo = Self::from_json_str(&text)?;
        debug!(path = %path.display(), records = repo.len(), "source records loaded");
        Ok(repo)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SourceRecord] {
        &self.records
    }

    fn searchable_text(record: &SourceRecord) -> String {
        format!("{} {}", record.metadata.title, record.spans.join(" "))
    }
}

#[async_trait]
impl SourceRepository for InMemorySourceRepository {
    async fn query(
        &self,
        query: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<ScoredSource>, CapabilityError> {
        let relevance = KeywordRelevance;
        let mut scored: Vec<ScoredSource> = self
            .records
            .iter()
            .map(|record| ScoredSource {
                score: relevance.similarity(query, &Self::searchable_text(record)),
                record: record.clone(),
            })
            .filter(|s| s.score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn get(
        &self,
        source_id: &str,
    ) -> std::result::Result<Option<SourceRecord>, CapabilityError> {
        Ok(self
            .records
            .iter()
            .find(|r| r.source_id == source_id)
            .cloned())
    }
}
