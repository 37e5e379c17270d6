//! Citation marker extraction and validation.
//!
//! Every marker `[source_id: "quoted span"]` is checked against the source
//! repository: an absent id is `unresolved_id`, a quote shorter than
//! [`MIN_QUOTE_TERMS`] content words or whose fuzzy similarity to every
//! stored span falls below the threshold is `quote_mismatch`, anything else
//! is `valid`. Citation-like text the validator cannot check (unparsed
//! bracket ids, author-year citations, reference lists) is reported as
//! malformed. There is no bypass.

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::capability::{with_backoff, CancelSignal, SourceRepository};
use crate::domain::{
    CitationMarker, CitationReport, CitationStatus, CitationVerdict, MalformedCitation,
    MalformedKind, QuoteStyle, Result, SourceRecord, UpstreamRetryPolicy,
};
use crate::evaluator::citation_style::{find_conventional_citations, reference_list_span};
use crate::metrics::METRICS;
use crate::obs;
use crate::text::{citation_marker_regex, content_terms, dice_coefficient, normalize};

/// Fewest content words (four letters or more, stopwords excluded) a quoted
/// span needs before it can support a claim.
pub const MIN_QUOTE_TERMS: usize = 3;

/// Extract markers in document order.
pub fn parse_markers(draft: &str) -> Vec<CitationMarker> {
    citation_marker_regex()
        .captures_iter(draft)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let source_id = caps.get(1)?.as_str().to_string();
            let (quoted, quote_style) = match (caps.get(2), caps.get(3)) {
                (Some(q), _) => (q.as_str(), QuoteStyle::Straight),
                (None, Some(q)) => (q.as_str(), QuoteStyle::Curly),
                (None, None) => return None,
            };
            Some(CitationMarker {
                source_id,
                quoted_span: quoted.trim().to_string(),
                offset: whole.start(),
                raw: whole.as_str().to_string(),
                quote_style,
            })
        })
        .collect()
}

/// Similarity of a quoted span to a stored span in `[0, 1]`.
///
/// Both sides are normalized (lowercase, alphanumerics only, collapsed
/// whitespace). Containment as a run of whole words scores 1.0; otherwise
/// the best bigram Dice score over windows of the stored span with the
/// quote's word count (±1).
pub fn quote_similarity(quoted: &str, stored: &str) -> f64 {
    let quote = normalize(quoted);
    let span = normalize(stored);
    if quote.is_empty() || span.is_empty() {
        return 0.0;
    }
    if format!(" {span} ").contains(&format!(" {quote} ")) {
        return 1.0;
    }

    let span_words: Vec<&str> = span.split(' ').collect();
    let quote_len = quote.split(' ').count();
    let mut best = 0.0f64;
    for len in [quote_len.saturating_sub(1), quote_len, quote_len + 1] {
        if len == 0 {
            continue;
        }
        if len >= span_words.len() {
            best = best.max(dice_coefficient(&quote, &span));
            continue;
        }
        for window in span_words.windows(len) {
            best = best.max(dice_coefficient(&quote, &window.join(" ")));
        }
    }
    best
}

/// Whether a quoted span is long enough to be checked at all.
pub fn quote_is_substantive(quoted: &str) -> bool {
    content_terms(quoted).len() >= MIN_QUOTE_TERMS
}

/// Best similarity of `quoted` across all spans of `record`.
pub fn best_span_similarity(quoted: &str, record: &SourceRecord) -> f64 {
    record
        .spans
        .iter()
        .map(|span| quote_similarity(quoted, span))
        .fold(0.0, f64::max)
}

/// Bracketed text that is not an inline note: anything with a colon, or a
/// single id-like token such as `[s9]`.
fn looks_like_marker(inner: &str) -> bool {
    let inner = inner.trim();
    if inner.is_empty() || inner.chars().all(|c| c.is_ascii_digit() || ",–- ".contains(c)) {
        return false;
    }
    if inner.contains(':') {
        return true;
    }
    !inner.contains(char::is_whitespace)
        && inner.chars().any(char::is_alphanumeric)
        && !matches!(inner.to_lowercase().as_str(), "sic" | "citation needed")
}

/// Citation-like text in `draft` that no marker covers, in document order.
pub fn find_malformed(draft: &str) -> Vec<MalformedCitation> {
    static BRACKET: OnceLock<Regex> = OnceLock::new();
    let bracket = BRACKET.get_or_init(|| {
        Regex::new(r"\[([^\[\]\n]{1,200})\]").expect("bracket regex is valid")
    });

    let markers: BTreeSet<usize> = citation_marker_regex()
        .find_iter(draft)
        .map(|m| m.start())
        .collect();
    let references = reference_list_span(draft);
    let in_references =
        |offset: usize| references.as_ref().is_some_and(|r| r.contains(&offset));

    let mut found = Vec::new();
    for caps in bracket.captures_iter(draft) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let is_link = draft[whole.end()..].starts_with('(');
        if markers.contains(&whole.start())
            || is_link
            || in_references(whole.start())
            || !looks_like_marker(inner.as_str())
        {
            continue;
        }
        found.push(MalformedCitation {
            kind: MalformedKind::UnparsedMarker,
            raw: whole.as_str().to_string(),
            offset: whole.start(),
        });
    }

    for (offset, raw) in find_conventional_citations(draft) {
        found.push(MalformedCitation {
            kind: MalformedKind::ConventionalCitation,
            raw,
            offset,
        });
    }

    if let Some(span) = references {
        let heading = draft[span.clone()].lines().next().unwrap_or_default();
        found.push(MalformedCitation {
            kind: MalformedKind::ReferenceList,
            raw: heading.trim().to_string(),
            offset: span.start,
        });
    }

    found.sort_by_key(|m| m.offset);
    found
}

/// Validates drafts against a source repository.
pub struct CitationValidator<'a> {
    repository: &'a dyn SourceRepository,
    threshold: f64,
    upstream: &'a UpstreamRetryPolicy,
    cancel: &'a CancelSignal,
}

impl<'a> CitationValidator<'a> {
    pub fn new(
        repository: &'a dyn SourceRepository,
        threshold: f64,
        upstream: &'a UpstreamRetryPolicy,
        cancel: &'a CancelSignal,
    ) -> Self {
        Self {
            repository,
            threshold,
            upstream,
            cancel,
        }
    }

    /// Verdict for every marker, in marker order, plus malformed citations.
    ///
    /// Repository failures are retried under the upstream policy and then
    /// surface as an error; they are never reported as `unresolved_id`.
    pub async fn validate(&self, draft: &str) -> Result<CitationReport> {
        let markers = parse_markers(draft);
        let mut lookups: HashMap<String, Option<SourceRecord>> = HashMap::new();
        let mut verdicts = Vec::with_capacity(markers.len());

        for marker in markers {
            if !lookups.contains_key(&marker.source_id) {
                let id = marker.source_id.clone();
                let record = with_backoff("source_repository", self.upstream, self.cancel, || {
                    self.repository.get(&id)
                })
                .await?;
                lookups.insert(marker.source_id.clone(), record);
            }

            let record = lookups.get(&marker.source_id).and_then(Option::as_ref);
            let (status, similarity) = match record {
                None => (CitationStatus::UnresolvedId, None),
                Some(record) => {
                    let score = best_span_similarity(&marker.quoted_span, record);
                    if score >= self.threshold && quote_is_substantive(&marker.quoted_span) {
                        (CitationStatus::Valid, Some(score))
                    } else {
                        (CitationStatus::QuoteMismatch, Some(score))
                    }
                }
            };

            METRICS.inc_citation(status);
            obs::emit_citation_validated(&marker.source_id, status, similarity);
            verdicts.push(CitationVerdict {
                metadata: record.map(|r| r.metadata.clone()),
                marker,
                status,
                similarity,
            });
        }

        let malformed = find_malformed(draft);
        for m in &malformed {
            obs::emit_citation_malformed(m.kind, &m.raw);
        }

        Ok(CitationReport {
            verdicts,
            malformed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::InMemorySourceRepository;
    use crate::domain::SourceMetadata;

    fn repo() -> InMemorySourceRepository {
        InMemorySourceRepository::new(vec![SourceRecord {
            source_id: "oke2019".to_string(),
            spans: vec![
                "Street trees reduced peak surface temperatures by up to 12 degrees in dense neighbourhoods."
                    .to_string(),
            ],
            metadata: SourceMetadata::default(),
        }])
    }

    #[test]
    fn test_parse_markers_in_order() {
        let draft = r#"First [a1: "alpha beta"] then [b-2: “gamma”] and [not a marker]."#;
        let markers = parse_markers(draft);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].source_id, "a1");
        assert_eq!(markers[0].quoted_span, "alpha beta");
        assert_eq!(markers[0].quote_style, QuoteStyle::Straight);
        assert_eq!(markers[1].source_id, "b-2");
        assert_eq!(markers[1].quote_style, QuoteStyle::Curly);
        assert!(markers[0].offset < markers[1].offset);
    }

    #[test]
    fn test_similarity_containment_and_fuzz() {
        let stored = "Street trees reduced peak surface temperatures by up to 12 degrees.";
        assert_eq!(quote_similarity("PEAK surface temperatures", stored), 1.0);
        let near = quote_similarity("reduced peak surface temperature by up to 12", stored);
        assert!(near > 0.9 && near < 1.0, "near = {near}");
        let far = quote_similarity("railway timetables were rewritten", stored);
        assert!(far < 0.5, "far = {far}");
        assert_eq!(quote_similarity("", stored), 0.0);
    }

    #[test]
    fn test_similarity_requires_whole_words() {
        let stored = "Battery storage lowered peak demand charges by twenty percent.";
        assert!(quote_similarity("e", stored) < 0.85);
        assert!(quote_similarity("t demand ch", stored) < 1.0);
        assert_eq!(quote_similarity("peak demand charges", stored), 1.0);
        assert!(!quote_is_substantive("e"));
        assert!(!quote_is_substantive("t demand ch"));
        assert!(quote_is_substantive("lowered peak demand charges"));
    }

    #[test]
    fn test_find_malformed_shapes() {
        let draft = concat!(
            r#"Valid [oke2019: "reduced peak surface temperatures"]. "#,
            r#"Single [s7: 'invented quote']. Bare [s9]. Numbered [3]. "#,
            r#"Prose (Ghost, 2021). A [link](https://example.org) and (NASA) [sic]."#,
            "\n\n## References\n- Ghost, G. (2021). Fabricated paper."
        );
        let found = find_malformed(draft);
        let kinds: Vec<(MalformedKind, &str)> =
            found.iter().map(|m| (m.kind, m.raw.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (MalformedKind::UnparsedMarker, "[s7: 'invented quote']"),
                (MalformedKind::UnparsedMarker, "[s9]"),
                (MalformedKind::ConventionalCitation, "[3]"),
                (MalformedKind::ConventionalCitation, "(Ghost, 2021)"),
                (MalformedKind::ReferenceList, "## References"),
            ]
        );
        assert!(find_malformed(r#"Only [a1: "alpha beta gamma"] here."#).is_empty());
    }

    #[tokio::test]
    async fn test_short_and_mid_word_quotes_are_mismatches() {
        let repo = repo();
        let policy = UpstreamRetryPolicy::default();
        let cancel = CancelSignal::never();
        let validator = CitationValidator::new(&repo, 0.85, &policy, &cancel);

        let draft = r#"One [oke2019: "e"] two [oke2019: "ak surface temperatu"] three [oke2019: "peak surface temperatures"]."#;
        let report = validator.validate(draft).await.unwrap();
        let statuses: Vec<CitationStatus> = report.verdicts.iter().map(|v| v.status).collect();
        assert_eq!(
            statuses,
            vec![
                CitationStatus::QuoteMismatch,
                CitationStatus::QuoteMismatch,
                CitationStatus::Valid
            ]
        );
    }

    #[tokio::test]
    async fn test_unchecked_citations_fail_report() {
        let repo = repo();
        let policy = UpstreamRetryPolicy::default();
        let cancel = CancelSignal::never();
        let validator = CitationValidator::new(&repo, 0.85, &policy, &cancel);

        let draft = r#"Cooler [oke2019: "reduced peak surface temperatures"] streets [doi:10.1000/xyz: "reduced peak surface temperatures"] and [s9]."#;
        let report = validator.validate(draft).await.unwrap();
        assert_eq!(report.verdicts.len(), 2);
        assert_eq!(report.verdicts[1].marker.source_id, "doi:10.1000/xyz");
        assert_eq!(report.verdicts[1].status, CitationStatus::UnresolvedId);
        assert!(report.verdicts[0].metadata.is_some());
        assert_eq!(report.malformed.len(), 1);
        assert_eq!(report.malformed[0].raw, "[s9]");
        assert!(!report.all_valid());
    }

    #[tokio::test]
    async fn test_validate_statuses() {
        let repo = repo();
        let policy = UpstreamRetryPolicy::default();
        let cancel = CancelSignal::never();
        let validator = CitationValidator::new(&repo, 0.85, &policy, &cancel);

        let draft = concat!(
            r#"Trees cool streets [oke2019: "reduced peak surface temperatures by up to 12 degrees"]. "#,
            r#"Ghost [nobody2020: "anything"]. "#,
            r#"Wrong [oke2019: "parks increase rainfall dramatically"]."#
        );
        let report = validator.validate(draft).await.unwrap();
        let statuses: Vec<CitationStatus> = report.verdicts.iter().map(|v| v.status).collect();
        assert_eq!(
            statuses,
            vec![
                CitationStatus::Valid,
                CitationStatus::UnresolvedId,
                CitationStatus::QuoteMismatch
            ]
        );
        assert!(!report.all_valid());
        assert_eq!(report.invalid().count(), 2);
    }

    #[tokio::test]
    async fn test_validation_is_idempotent() {
        let repo = repo();
        let policy = UpstreamRetryPolicy::default();
        let cancel = CancelSignal::never();
        let validator = CitationValidator::new(&repo, 0.85, &policy, &cancel);
        let draft = r#"A [oke2019: "Street trees reduced peak"] B [x: "y"]"#;
        let first = validator.validate(draft).await.unwrap();
        let second = validator.validate(draft).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_draft_without_markers_is_trivially_valid() {
        let repo = repo();
        let policy = UpstreamRetryPolicy::default();
        let cancel = CancelSignal::never();
        let validator = CitationValidator::new(&repo, 0.85, &policy, &cancel);
        let report = validator.validate("No citations here.").await.unwrap();
        assert!(report.verdicts.is_empty());
        assert!(report.all_valid());
    }
}
