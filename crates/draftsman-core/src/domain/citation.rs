//! Citation markers and their validation verdicts.

use serde::{Deserialize, Serialize};

use super::source::SourceMetadata;

/// Quote characters used around the quoted span of a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStyle {
    Straight,
    Curly,
}

/// `[source_id: "quoted span"]` inside a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationMarker {
    pub source_id: String,
    pub quoted_span: String,
    /// Byte offset of the opening bracket in the draft.
    pub offset: usize,
    /// Full marker text as written.
    pub raw: String,
    pub quote_style: QuoteStyle,
}

/// Outcome of checking one marker against the source repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationStatus {
    Valid,
    UnresolvedId,
    QuoteMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationVerdict {
    pub marker: CitationMarker,
    pub status: CitationStatus,
    /// Best similarity against the stored spans; absent for unresolved ids.
    pub similarity: Option<f64>,
    /// Bibliographic metadata of the cited record, when it resolved.
    #[serde(default)]
    pub metadata: Option<SourceMetadata>,
}

/// Citation-like text that no marker verdict covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedKind {
    /// Bracketed id that is not `[source_id: "quoted span"]`, e.g. `[s9]`
    /// or a single-quoted span.
    UnparsedMarker,
    /// Author-year or numeric citation written in the prose.
    ConventionalCitation,
    /// A references or bibliography list written into the draft.
    ReferenceList,
}

impl MalformedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnparsedMarker => "unparsed_marker",
            Self::ConventionalCitation => "conventional_citation",
            Self::ReferenceList => "reference_list",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedCitation {
    pub kind: MalformedKind,
    /// Text as written (the heading line for reference lists).
    pub raw: String,
    /// Byte offset in the draft.
    pub offset: usize,
}

/// Verdicts for every marker of a draft, in marker order, plus any
/// citation-like text that could not be checked against the repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationReport {
    pub verdicts: Vec<CitationVerdict>,
    #[serde(default)]
    pub malformed: Vec<MalformedCitation>,
}

impl CitationReport {
    pub fn all_valid(&self) -> bool {
        self.malformed.is_empty()
            && self
                .verdicts
                .iter()
                .all(|v| v.status == CitationStatus::Valid)
    }

    /// Whether the marker at `offset` was checked and found valid.
    pub fn is_verified_at(&self, offset: usize) -> bool {
        self.verdicts
            .iter()
            .any(|v| v.marker.offset == offset && v.status == CitationStatus::Valid)
    }

    pub fn invalid(&self) -> impl Iterator<Item = &CitationVerdict> {
        self.verdicts
            .iter()
            .filter(|v| v.status != CitationStatus::Valid)
    }

    pub fn count(&self, status: CitationStatus) -> usize {
        self.verdicts.iter().filter(|v| v.status == status).count()
    }

    pub fn markers(&self) -> Vec<CitationMarker> {
        self.verdicts.iter().map(|v| v.marker.clone()).collect()
    }
}
