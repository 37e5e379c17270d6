//! Citation style layer.
//!
//! Drafts cite only through markers; conventional citations are rendered
//! from the cited records on export. This layer checks that every verified
//! source renders to an in-text citation and a reference entry of the
//! declared style, and that markers all use one syntax.
//!
//! The pattern tables here also recognise conventional citations and
//! reference lists written into a draft, which the validator rejects.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use super::EvaluationInput;
use crate::domain::{
    CitationStatus, CitationStyle, Criterion, EvaluationResult, QuoteStyle, SourceMetadata,
};
use crate::export::{format_entry, format_in_text};
use crate::text::citation_marker_regex;

const STYLES: [CitationStyle; 5] = [
    CitationStyle::Apa,
    CitationStyle::Harvard,
    CitationStyle::Mla,
    CitationStyle::Chicago,
    CitationStyle::Ieee,
];

const AUTHOR: &str = r"[A-Z][a-z][A-Za-z'\-]*";
const YEAR: &str = r"(?:\d{4}[a-z]?|n\.d\.)";

struct StylePatterns {
    in_text: Regex,
    entry: Regex,
}

fn patterns(style: CitationStyle) -> &'static StylePatterns {
    static ALL: OnceLock<Vec<StylePatterns>> = OnceLock::new();
    let all = ALL.get_or_init(|| {
        STYLES
            .iter()
            .map(|style| {
                let (in_text, entry) = sources(*style);
                StylePatterns {
                    in_text: Regex::new(&in_text).expect("in-text citation regex is valid"),
                    entry: Regex::new(&entry).expect("bibliography entry regex is valid"),
                }
            })
            .collect()
    });
    &all[STYLES.iter().position(|s| *s == style).unwrap_or(0)]
}

fn sources(style: CitationStyle) -> (String, String) {
    let pages = r"(?:, pp?\. ?\d+(?:[-–]\d+)?)?";
    match style {
        CitationStyle::Apa => (
            format!(r"^\({AUTHOR}(?: et al\.| & {AUTHOR})?, {YEAR}{pages}\)$"),
            format!(r"^{AUTHOR}, (?:[A-Z]\.\s?)+.*\({YEAR}\)\.\s+\S.*$"),
        ),
        CitationStyle::Harvard => (
            format!(r"^\({AUTHOR}(?: et al\.| and {AUTHOR})? {YEAR}{pages}\)$"),
            format!(r"^{AUTHOR}, (?:[A-Z]\.\s?)+.*\({YEAR}\)\s+[^.\s].*$"),
        ),
        CitationStyle::Mla => (
            format!(r"^\({AUTHOR}(?: et al\.| and {AUTHOR})?(?: \d{{1,3}}(?:[-–]\d{{1,3}})?)?\)$"),
            format!(r#"^{AUTHOR}(?:, [A-Z][^"]*?)?\.\s+"[^"]+""#),
        ),
        CitationStyle::Chicago => (
            format!(r"^\({AUTHOR}(?: et al\.| and {AUTHOR})? {YEAR}(?:, \d+(?:[-–]\d+)?)?\)$"),
            format!(r#"^{AUTHOR}(?:, [A-Z][^"]*?)?\.\s+(?:\d{{4}}[a-z]?\.|n\.d\.)\s+\S.*$"#),
        ),
        CitationStyle::Ieee => (
            r"^\[\d+(?:\s*[,–-]\s*\d+)*\]$".to_string(),
            r#"^\[\d+\]\s+[^"]+, "[^"]+""#.to_string(),
        ),
    }
}

/// Styles an in-text citation such as `(Smith, 2020)` is compatible with.
/// Empty when the text is not a recognizable citation.
pub fn in_text_styles(citation: &str) -> BTreeSet<CitationStyle> {
    STYLES
        .iter()
        .copied()
        .filter(|style| patterns(*style).in_text.is_match(citation))
        .collect()
}

/// Whether a reference-list entry has the shape `style` prescribes.
pub fn entry_matches(style: CitationStyle, entry: &str) -> bool {
    patterns(style).entry.is_match(entry.trim())
}

/// Conventional in-text citations written in a draft, as `(offset, text)`
/// in document order. Markers and any reference list are skipped.
/// Parenthesized groups like `(Smith, 2020; Doe, 2021)` yield one entry per
/// recognisable part, all at the group's offset.
pub fn find_conventional_citations(draft: &str) -> Vec<(usize, String)> {
    static PAREN: OnceLock<Regex> = OnceLock::new();
    static BRACKET: OnceLock<Regex> = OnceLock::new();
    let paren = PAREN.get_or_init(|| {
        Regex::new(r"\(([A-Z][^()]{1,120})\)").expect("parenthetical regex is valid")
    });
    let bracket = BRACKET.get_or_init(|| {
        Regex::new(r"\[\d+(?:\s*[,–-]\s*\d+)*\]").expect("numeric citation regex is valid")
    });

    let mut skipped: Vec<Range<usize>> = citation_marker_regex()
        .find_iter(draft)
        .map(|m| m.range())
        .collect();
    skipped.extend(reference_list_span(draft));
    let outside = |range: &Range<usize>| {
        !skipped
            .iter()
            .any(|s| range.start < s.end && s.start < range.end)
    };

    let mut found: Vec<(usize, String)> = Vec::new();
    for caps in paren.captures_iter(draft) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if !outside(&whole.range()) {
            continue;
        }
        for part in inner.as_str().split("; ") {
            let candidate = format!("({})", part.trim());
            if !in_text_styles(&candidate).is_empty() {
                found.push((whole.start(), candidate));
            }
        }
    }
    for m in bracket.find_iter(draft) {
        if outside(&m.range()) {
            found.push((m.start(), m.as_str().to_string()));
        }
    }

    found.sort_by_key(|(offset, _)| *offset);
    found
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*(?:#+[ \t]*)?(?:references|bibliography|works cited|sources)[ \t]*:?[ \t]*$")
            .expect("reference heading regex is valid")
    })
}

/// Byte range of a reference list written into a draft: from its heading to
/// the next markdown heading or the end of the text.
pub fn reference_list_span(draft: &str) -> Option<Range<usize>> {
    let heading = heading_regex().find(draft)?;
    let mut end = draft.len();
    let mut offset = heading.end();
    for line in draft[heading.end()..].split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            end = offset;
            break;
        }
        offset += line.len();
    }
    Some(heading.start()..end)
}

/// Verified sources in order of first citation, with their metadata.
fn cited_records<'a>(input: &'a EvaluationInput<'_>) -> Vec<(&'a str, &'a SourceMetadata)> {
    let mut cited: Vec<(&str, &SourceMetadata)> = Vec::new();
    for verdict in &input.citations.verdicts {
        if verdict.status != CitationStatus::Valid {
            continue;
        }
        let Some(meta) = verdict.metadata.as_ref() else {
            continue;
        };
        let id = verdict.marker.source_id.as_str();
        if !cited.iter().any(|(seen, _)| *seen == id) {
            cited.push((id, meta));
        }
    }
    cited
}

pub(crate) fn evaluate(
    style: CitationStyle,
    input: &EvaluationInput<'_>,
    result: &mut EvaluationResult,
) {
    let cited = cited_records(input);

    let bad_in_text: Vec<String> = cited
        .iter()
        .enumerate()
        .filter_map(|(i, (id, meta))| {
            let rendered = format_in_text(style, meta, i + 1);
            (!in_text_styles(&rendered).contains(&style)).then(|| format!("[{id}] {rendered}"))
        })
        .collect();
    if bad_in_text.is_empty() {
        result.satisfied(
            Criterion::InTextFormat,
            format!("{} cited sources render as {style} in-text citations", cited.len()),
        );
    } else {
        result.violated(
            Criterion::InTextFormat,
            format!("every cited source renders as a {style} in-text citation"),
            format!(
                "sources without usable author metadata: {}",
                bad_in_text.join(", ")
            ),
        );
    }

    let bad_entries: Vec<String> = cited
        .iter()
        .enumerate()
        .filter_map(|(i, (id, meta))| {
            let entry = format_entry(style, meta, i + 1);
            (!entry_matches(style, &entry)).then(|| format!("[{id}] \"{entry}\""))
        })
        .collect();
    if bad_entries.is_empty() {
        result.satisfied(
            Criterion::BibliographyFormat,
            format!("{} reference entries follow {style}", cited.len()),
        );
    } else {
        result.violated(
            Criterion::BibliographyFormat,
            format!("every cited source renders as a {style} reference entry"),
            format!("malformed entries: {}", bad_entries.join("; ")),
        );
    }

    let markers = input.citations.markers();
    // (curly quotes, space after the colon)
    let shapes: BTreeSet<(bool, bool)> = markers
        .iter()
        .map(|m| {
            let spaced = m
                .raw
                .split_once(':')
                .is_some_and(|(_, rest)| rest.starts_with(char::is_whitespace));
            (m.quote_style == QuoteStyle::Curly, spaced)
        })
        .collect();
    if shapes.len() <= 1 {
        result.satisfied(Criterion::MarkerSyntax, format!("{} markers", markers.len()));
    } else {
        let curly = markers
            .iter()
            .filter(|m| m.quote_style == QuoteStyle::Curly)
            .count();
        result.violated(
            Criterion::MarkerSyntax,
            r#"every marker written the same way, as [source_id: "quote"]"#,
            format!(
                "{} markers in {} different forms ({curly} curly-quoted)",
                markers.len(),
                shapes.len()
            ),
        );
    }
}
