//! Document export.
//!
//! Markers in accepted section text are replaced by in-text citations in the
//! configured style and every cited source gets one bibliography entry.
//! Sections flagged under partial delivery carry their last draft and retry
//! history, clearly marked: only markers with a valid verdict are rendered
//! as citations, everything citation-like that was not verified becomes
//! `[unverified citation: ...]`, and a reference list written into the
//! draft is dropped. The bibliography lists verified sources only.
//!
//! Artifacts are written to `<dir>/<run_id>/export.json` with a companion
//! `export.digest` (SHA-256 of the JSON bytes) and the rendered
//! `<dir>/<run_id>/document.md`.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use draftsman_state::ContentDigest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::citation::{find_malformed, parse_markers};
use crate::domain::{
    split_name, AttemptSummary, CitationMarker, CitationStatus, CitationStyle, DraftError,
    MalformedKind, Result, Run, Section, SectionState, SourceMetadata, SourceRecord,
};
use crate::evaluator::citation_style::reference_list_span;
use crate::text::citation_marker_regex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedSection {
    pub index: usize,
    pub name: String,
    pub text: String,
    /// Did not pass evaluation; exported under partial delivery.
    pub flagged: bool,
    #[serde(default)]
    pub retry_history: Vec<AttemptSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibliographyEntry {
    pub source_id: String,
    /// Order of first citation, 1-based.
    pub number: usize,
    pub formatted: String,
}

/// The finished document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub run_id: Uuid,
    pub topic: String,
    pub style: CitationStyle,
    pub sections: Vec<ExportedSection>,
    pub bibliography: Vec<BibliographyEntry>,
    pub generated_at: DateTime<Utc>,
}

impl ExportBundle {
    pub fn is_partial(&self) -> bool {
        self.sections.iter().any(|s| s.flagged)
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Verified source ids cited by the exportable sections, in order of first
/// appearance.
pub fn cited_source_ids(run: &Run) -> Vec<String> {
    let mut seen = Vec::new();
    for section in &run.sections {
        for marker in verified_markers(section) {
            if !seen.contains(&marker.source_id) {
                seen.push(marker.source_id);
            }
        }
    }
    seen
}

fn exportable_text(section: &Section) -> Option<&str> {
    match section.state {
        SectionState::Passed => section.final_text.as_deref(),
        SectionState::FailedExhausted => section.latest_attempt().map(|a| a.draft.as_str()),
        _ => None,
    }
}

/// Markers whose citation was checked and found valid. Accepted text only
/// holds valid markers; a flagged section keeps those its last verdict
/// passed.
fn verified_markers(section: &Section) -> Vec<CitationMarker> {
    match section.state {
        SectionState::Passed => section
            .final_text
            .as_deref()
            .map(parse_markers)
            .unwrap_or_default(),
        SectionState::FailedExhausted => section
            .latest_attempt()
            .map(|a| {
                a.citations
                    .verdicts
                    .iter()
                    .filter(|v| v.status == CitationStatus::Valid)
                    .map(|v| v.marker.clone())
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Wrap unparsed markers and conventional citations of a flagged draft as
/// unverified, and drop any reference list it carries.
fn annotate_unchecked(draft: &str) -> String {
    let mut text = match reference_list_span(draft) {
        Some(span) => format!("{}{}", &draft[..span.start], &draft[span.end..]),
        None => draft.to_string(),
    };

    let mut edits: Vec<(usize, usize, String)> = Vec::new();
    for m in find_malformed(&text) {
        let (end, label) = match m.kind {
            MalformedKind::UnparsedMarker => (
                m.offset + m.raw.len(),
                m.raw.trim_matches(['[', ']']).trim().to_string(),
            ),
            MalformedKind::ConventionalCitation => {
                let Some(close) = text[m.offset..].find([')', ']']) else {
                    continue;
                };
                let end = m.offset + close + 1;
                (end, text[m.offset..end].to_string())
            }
            MalformedKind::ReferenceList => continue,
        };
        edits.push((m.offset, end, format!("[unverified citation: {label}]")));
    }

    edits.sort_by_key(|(start, _, _)| *start);
    let mut kept: Vec<(usize, usize, String)> = Vec::new();
    for edit in edits {
        if kept.last().map_or(true, |(_, end, _)| edit.0 >= *end) {
            kept.push(edit);
        }
    }
    for (start, end, replacement) in kept.into_iter().rev() {
        text.replace_range(start..end, &replacement);
    }
    text
}

/// Assemble the export from a settled run and the records of its cited sources.
///
/// Markers without a valid verdict or whose source is absent from `sources`
/// (possible only in flagged sections) are rendered as
/// `[unverified citation: id]`.
pub fn build_bundle(run: &Run, sources: &HashMap<String, SourceRecord>) -> Result<ExportBundle> {
    if !run.all_settled() {
        let open: Vec<String> = run
            .sections
            .iter()
            .filter(|s| !s.state.is_terminal())
            .map(|s| s.name.clone())
            .collect();
        return Err(DraftError::transition(
            "export",
            format!("unsettled sections {open:?}"),
            "EXPORTING",
        ));
    }

    let style = run.config.export_style();
    let order = cited_source_ids(run);
    let numbers: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i + 1))
        .collect();

    let sections = run
        .sections
        .iter()
        .map(|section| {
            let flagged = section.state == SectionState::FailedExhausted;
            let verified: BTreeSet<String> = verified_markers(section)
                .into_iter()
                .map(|m| m.raw)
                .collect();
            let raw = exportable_text(section).unwrap_or_default();
            let raw = if flagged {
                annotate_unchecked(raw)
            } else {
                raw.to_string()
            };
            let text = citation_marker_regex()
                .replace_all(&raw, |caps: &regex::Captures<'_>| {
                    let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                    let id = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                    match (verified.contains(whole), sources.get(id), numbers.get(id)) {
                        (true, Some(record), Some(n)) => format_in_text(style, &record.metadata, *n),
                        _ => format!("[unverified citation: {id}]"),
                    }
                })
                .into_owned();
            ExportedSection {
                index: section.index,
                name: section.name.clone(),
                text,
                flagged,
                retry_history: if flagged {
                    section.retry_history()
                } else {
                    Vec::new()
                },
            }
        })
        .collect();

    let mut bibliography: Vec<BibliographyEntry> = order
        .iter()
        .filter_map(|id| {
            let record = sources.get(id)?;
            let number = numbers.get(id.as_str()).copied()?;
            Some(BibliographyEntry {
                source_id: id.clone(),
                number,
                formatted: format_entry(style, &record.metadata, number),
            })
        })
        .collect();
    if style != CitationStyle::Ieee {
        bibliography.sort_by(|a, b| a.formatted.to_lowercase().cmp(&b.formatted.to_lowercase()));
    }

    Ok(ExportBundle {
        run_id: run.run_id,
        topic: run.topic.clone(),
        style,
        sections,
        bibliography,
        generated_at: Utc::now(),
    })
}

// ---------------------------------------------------------------------------
// Citation formatting
// ---------------------------------------------------------------------------

fn year(meta: &SourceMetadata) -> String {
    meta.year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "n.d.".to_string())
}

fn title(meta: &SourceMetadata) -> &str {
    let t = meta.title.trim();
    if t.is_empty() {
        "Untitled"
    } else {
        t
    }
}

/// Append a period unless the text already ends a sentence.
fn sentence(text: &str) -> String {
    if text.ends_with(['.', '?', '!']) {
        text.to_string()
    } else {
        format!("{text}.")
    }
}

fn initials(given: &[&str], spaced: bool) -> String {
    let parts: Vec<String> = given
        .iter()
        .filter_map(|g| g.chars().next())
        .map(|c| format!("{}.", c.to_uppercase()))
        .collect();
    parts.join(if spaced { " " } else { "" })
}

/// "Family, G. M." (or the family name alone when no given names are known).
fn inverted(author: &str, initials_only: bool, spaced: bool) -> String {
    let (family, given) = split_name(author);
    if given.is_empty() {
        return family.to_string();
    }
    let given = if initials_only {
        initials(&given, spaced)
    } else {
        given.join(" ")
    };
    format!("{family}, {given}")
}

fn families_in_text(meta: &SourceMetadata, conjunction: &str) -> String {
    let families = meta.family_names();
    match families.as_slice() {
        [] => "Anonymous".to_string(),
        [one] => (*one).to_string(),
        [a, b] => format!("{a} {conjunction} {b}"),
        [first, ..] => format!("{first} et al."),
    }
}

/// In-text citation of the source numbered `number` (used only by IEEE).
pub fn format_in_text(style: CitationStyle, meta: &SourceMetadata, number: usize) -> String {
    match style {
        CitationStyle::Apa => format!("({}, {})", families_in_text(meta, "&"), year(meta)),
        CitationStyle::Harvard | CitationStyle::Chicago => {
            format!("({} {})", families_in_text(meta, "and"), year(meta))
        }
        CitationStyle::Mla => format!("({})", families_in_text(meta, "and")),
        CitationStyle::Ieee => format!("[{number}]"),
    }
}

/// Reference-list entry for one source.
pub fn format_entry(style: CitationStyle, meta: &SourceMetadata, number: usize) -> String {
    let venue = meta
        .venue
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let locator = meta
        .doi
        .as_deref()
        .map(|doi| format!("https://doi.org/{doi}"))
        .or_else(|| meta.url.clone());
    let authors = &meta.authors;
    let title = title(meta);
    let year = year(meta);

    let mut entry = match style {
        CitationStyle::Apa => {
            let names: Vec<String> = authors.iter().map(|a| inverted(a, true, true)).collect();
            let names = match names.as_slice() {
                [] => "Anonymous.".to_string(),
                [one] => sentence(one),
                [init @ .., last] => sentence(&format!("{}, & {last}", init.join(", "))),
            };
            let mut e = format!("{names} ({year}). {}", sentence(title));
            if let Some(v) = venue {
                e.push_str(&format!(" {}", sentence(v)));
            }
            e
        }
        CitationStyle::Harvard => {
            let names: Vec<String> = authors.iter().map(|a| inverted(a, true, false)).collect();
            let names = match names.as_slice() {
                [] => "Anonymous".to_string(),
                [one] => one.clone(),
                [init @ .., last] => format!("{} and {last}", init.join(", ")),
            };
            let mut e = format!("{names} ({year}) {}", sentence(title));
            if let Some(v) = venue {
                e.push_str(&format!(" {}", sentence(v)));
            }
            e
        }
        CitationStyle::Mla | CitationStyle::Chicago => {
            let names = match authors.as_slice() {
                [] => "Anonymous".to_string(),
                [one] => inverted(one, false, true),
                [first, second] => format!("{}, and {second}", inverted(first, false, true)),
                [first, ..] if style == CitationStyle::Mla => {
                    format!("{}, et al", inverted(first, false, true))
                }
                [first, middle @ .., last] => {
                    let mut names = vec![inverted(first, false, true)];
                    names.extend(middle.iter().cloned());
                    format!("{}, and {last}", names.join(", "))
                }
            };
            if style == CitationStyle::Mla {
                let mut e = format!("{} \"{}\"", sentence(&names), sentence(title));
                match venue {
                    Some(v) => e.push_str(&format!(" {v}, {}", sentence(&year))),
                    None => e.push_str(&format!(" {}", sentence(&year))),
                }
                e
            } else {
                let mut e = format!("{} {} {}", sentence(&names), sentence(&year), sentence(title));
                if let Some(v) = venue {
                    e.push_str(&format!(" {}", sentence(v)));
                }
                e
            }
        }
        CitationStyle::Ieee => {
            let names: Vec<String> = authors
                .iter()
                .map(|a| {
                    let (family, given) = split_name(a);
                    if given.is_empty() {
                        family.to_string()
                    } else {
                        format!("{} {family}", initials(&given, true))
                    }
                })
                .collect();
            let names = match names.as_slice() {
                [] => "Anonymous".to_string(),
                [one] => one.clone(),
                [a, b] => format!("{a} and {b}"),
                [init @ .., last] => format!("{}, and {last}", init.join(", ")),
            };
            let mut e = format!("[{number}] {names}, \"{title},\"");
            if let Some(v) = venue {
                e.push_str(&format!(" {v},"));
            }
            e.push_str(&format!(" {}", sentence(&year)));
            e
        }
    };
    if let Some(locator) = locator {
        entry.push(' ');
        entry.push_str(&locator);
    }
    entry
}

fn reference_heading(style: CitationStyle) -> &'static str {
    match style {
        CitationStyle::Mla => "Works Cited",
        CitationStyle::Chicago => "Bibliography",
        _ => "References",
    }
}

// ---------------------------------------------------------------------------
// Rendering and artifacts
// ---------------------------------------------------------------------------

/// Markdown rendering of the document.
pub fn render_markdown(bundle: &ExportBundle) -> String {
    let mut out = format!("# {}\n\n", bundle.topic);
    if bundle.is_partial() {
        out.push_str("> Partial delivery: flagged sections did not pass evaluation and need review.\n\n");
    }
    for section in &bundle.sections {
        out.push_str(&format!("## {}\n\n", section.name));
        if section.flagged {
            out.push_str(&format!(
                "> **FLAGGED**: failed evaluation after {} attempts.\n",
                section.retry_history.len()
            ));
            for attempt in &section.retry_history {
                let categories: Vec<String> =
                    attempt.failure_categories.iter().map(|c| c.to_string()).collect();
                out.push_str(&format!(
                    "> - attempt {}: {}\n",
                    attempt.seq + 1,
                    categories.join(", ")
                ));
            }
            out.push('\n');
        }
        out.push_str(section.text.trim());
        out.push_str("\n\n");
    }
    if !bundle.bibliography.is_empty() {
        out.push_str(&format!("## {}\n\n", reference_heading(bundle.style)));
        for entry in &bundle.bibliography {
            if bundle.style == CitationStyle::Ieee {
                out.push_str(&format!("{}\n\n", entry.formatted));
            } else {
                out.push_str(&format!("- {}\n", entry.formatted));
            }
        }
    }
    out.trim_end().to_string() + "\n"
}

/// Paths written by [`write_export_artifact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub json: PathBuf,
    pub digest: PathBuf,
    pub markdown: PathBuf,
}

pub fn write_export_artifact(bundle: &ExportBundle, dir: &Path) -> Result<ExportPaths> {
    let run_dir = dir.join(bundle.run_id.to_string());
    std::fs::create_dir_all(&run_dir)?;

    let paths = ExportPaths {
        json: run_dir.join("export.json"),
        digest: run_dir.join("export.digest"),
        markdown: run_dir.join("document.md"),
    };

    let json = serde_json::to_vec_pretty(bundle)?;
    std::fs::write(&paths.json, &json)?;
    std::fs::write(&paths.digest, ContentDigest::from_bytes(&json).as_str())?;
    std::fs::write(&paths.markdown, render_markdown(bundle))?;
    Ok(paths)
}

/// Read `<dir>/<run_id>/export.json`, verifying it against `export.digest`.
pub fn read_export_artifact(run_id: Uuid, dir: &Path) -> Result<ExportBundle> {
    let run_dir = dir.join(run_id.to_string());
    let json = std::fs::read(run_dir.join("export.json"))?;
    let expected = std::fs::read_to_string(run_dir.join("export.digest"))?;
    let actual = ContentDigest::from_bytes(&json);

    if expected.trim() != actual.as_str() {
        return Err(DraftError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual: actual.as_str().to_string(),
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

/// Cited records keyed by id, for [`build_bundle`].
pub fn index_sources(records: Vec<SourceRecord>) -> HashMap<String, SourceRecord> {
    records
        .into_iter()
        .map(|r| (r.source_id.clone(), r))
        .collect()
}
