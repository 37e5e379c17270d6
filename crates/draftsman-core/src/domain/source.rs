//! Reference records served by the source repository.

use serde::{Deserialize, Serialize};

/// Bibliographic metadata of a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceMetadata {
    /// Author names in "Given Family" order.
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub title: String,
    pub venue: Option<String>,
    pub url: Option<String>,
    pub doi: Option<String>,
}

impl SourceMetadata {
    /// Family names of all authors.
    pub fn family_names(&self) -> Vec<&str> {
        self.authors.iter().map(|a| split_name(a).0).collect()
    }
}

/// Split "Given Middle Family" into (family, given names).
pub fn split_name(full: &str) -> (&str, Vec<&str>) {
    let parts: Vec<&str> = full.split_whitespace().collect();
    match parts.split_last() {
        Some((family, given)) => (family, given.to_vec()),
        None => ("", Vec::new()),
    }
}

/// A reference record with verbatim quotable spans. Never mutated by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: String,
    pub spans: Vec<String>,
    #[serde(default)]
    pub metadata: SourceMetadata,
}

/// A source returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSource {
    pub record: SourceRecord,
    pub score: f64,
}
