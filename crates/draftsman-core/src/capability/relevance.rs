//! Relevance ranking used to pick older sections (and by the in-memory
//! source repository).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::text::content_terms;

/// A document offered for ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelevanceDocument<'a> {
    pub id: &'a str,
    pub text: &'a str,
}

/// A ranked document id with its similarity in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedId {
    pub id: String,
    pub score: f64,
}

/// Ranks documents against a query.
pub trait RelevanceIndex: Send + Sync {
    /// At most `k` documents, best first. Equal scores keep input order.
    fn rank(&self, query: &str, documents: &[RelevanceDocument<'_>], k: usize) -> Vec<RankedId>;
}

/// Cosine similarity over term-frequency vectors of content words.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordRelevance;

impl KeywordRelevance {
    fn vector(text: &str) -> BTreeMap<String, f64> {
        let mut tf = BTreeMap::new();
        for term in content_terms(text) {
            *tf.entry(term).or_insert(0.0) += 1.0;
        }
        tf
    }

    /// Similarity of two texts in `[0, 1]`.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        cosine(&Self::vector(a), &Self::vector(b))
    }
}

fn cosine(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(term, x)| b.get(term).map(|y| x * y))
        .sum();
    let norm = |v: &BTreeMap<String, f64>| v.values().map(|x| x * x).sum::<f64>().sqrt();
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

impl RelevanceIndex for KeywordRelevance {
    fn rank(&self, query: &str, documents: &[RelevanceDocument<'_>], k: usize) -> Vec<RankedId> {
        let q = Self::vector(query);
        let mut scored: Vec<RankedId> = documents
            .iter()
            .map(|doc| RankedId {
                id: doc.id.to_string(),
                score: cosine(&q, &Self::vector(doc.text)),
            })
            .collect();
        // Stable sort keeps the caller's order for ties.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_orders_by_overlap() {
        let docs = [
            RelevanceDocument {
                id: "a",
                text: "Methods for measuring canopy cover with satellite imagery",
            },
            RelevanceDocument {
                id: "b",
                text: "Street trees lower surface temperature in dense cities",
            },
            RelevanceDocument {
                id: "c",
                text: "Unrelated discussion of railway timetables",
            },
        ];
        let ranked = KeywordRelevance.rank("How do street trees lower city temperature?", &docs, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, "b");
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let docs = [
            RelevanceDocument { id: "x", text: "canopy" },
            RelevanceDocument { id: "y", text: "canopy" },
        ];
        let ranked = KeywordRelevance.rank("canopy", &docs, 5);
        assert_eq!(ranked[0].id, "x");
        assert_eq!(ranked[1].id, "y");
        assert!((ranked[0].score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_query_scores_zero() {
        assert_eq!(KeywordRelevance.similarity("", "anything at all"), 0.0);
    }
}
