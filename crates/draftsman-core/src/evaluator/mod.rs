//! Layered acceptance check for section drafts.
//!
//! Layers, all of which must pass:
//! - base: assigned research questions addressed, citations valid, word
//!   count in range, terminology and tone consistent with earlier sections
//! - style (when configured): tone, clarity, voice, sentence complexity,
//!   technical depth
//! - citation style (when configured): in-text and bibliography formats,
//!   marker syntax
//! - custom (when configured): length bounds, minimum citations, required
//!   elements, forbidden and preferred terms
//!
//! Every failing check produces exactly one feedback entry.

pub mod citation_style;
mod custom;
mod style;

use std::collections::BTreeMap;

use crate::domain::{
    CitationReport, CitationStatus, Criterion, EvaluationResult, ResearchQuestion, RunConfig,
    Section,
};
use crate::citation::{quote_is_substantive, MIN_QUOTE_TERMS};
use crate::text::{acronym_definitions, informality_rate, normalize, term_set, word_count};

/// Largest accepted difference in informal markers per 100 words between a
/// section and the one before it.
pub const TONE_DRIFT_LIMIT: f64 = 3.0;

/// Minimum words in both texts before tone drift is measured.
const TONE_DRIFT_MIN_WORDS: usize = 50;

/// Everything the evaluator looks at for one draft.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub draft: &'a str,
    pub section: &'a Section,
    /// Questions assigned to this section.
    pub questions: &'a [&'a ResearchQuestion],
    pub citations: &'a CitationReport,
    /// Accepted text of the nearest earlier section.
    pub previous_text: Option<&'a str>,
    /// Acronym -> long form established by earlier sections.
    pub terminology: &'a BTreeMap<String, String>,
}

/// Applies the configured layers to a draft.
pub struct SectionEvaluator<'a> {
    config: &'a RunConfig,
}

impl<'a> SectionEvaluator<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, input: &EvaluationInput<'_>) -> EvaluationResult {
        let mut result = EvaluationResult::default();

        self.check_questions(input, &mut result);
        self.check_citations(input, &mut result);
        self.check_word_count(input, &mut result);
        self.check_consistency(input, &mut result);

        if let Some(guidelines) = &self.config.style {
            style::evaluate(guidelines, input.draft, &mut result);
        }
        if let Some(citation_style) = self.config.citation_style {
            citation_style::evaluate(citation_style, input, &mut result);
        }
        if let Some(criteria) = &self.config.custom {
            custom::evaluate(criteria, input, &mut result);
        }

        result.finish()
    }

    fn check_questions(&self, input: &EvaluationInput<'_>, result: &mut EvaluationResult) {
        if input.questions.is_empty() {
            result.satisfied(Criterion::QuestionCoverage, "no questions assigned");
            return;
        }
        let draft_terms = term_set(input.draft);
        let threshold = self.config.question_coverage_threshold;

        let uncovered: Vec<String> = input
            .questions
            .iter()
            .filter_map(|q| {
                let coverage = question_coverage(&q.text, &draft_terms);
                (coverage < threshold).then(|| {
                    format!("Q{} \"{}\" (coverage {:.2})", q.id, q.text, coverage)
                })
            })
            .collect();

        if uncovered.is_empty() {
            result.satisfied(
                Criterion::QuestionCoverage,
                format!("{} questions addressed", input.questions.len()),
            );
        } else {
            result.violated(
                Criterion::QuestionCoverage,
                format!(
                    "every assigned research question addressed (key-term coverage >= {threshold:.2})"
                ),
                format!("not addressed: {}", uncovered.join("; ")),
            );
        }
    }

    fn check_citations(&self, input: &EvaluationInput<'_>, result: &mut EvaluationResult) {
        if input.citations.all_valid() {
            result.satisfied(
                Criterion::CitationValidity,
                format!("{} markers valid", input.citations.verdicts.len()),
            );
            return;
        }
        let mut problems: Vec<String> = input
            .citations
            .invalid()
            .map(|v| match (v.status, v.similarity) {
                (CitationStatus::UnresolvedId, _) => {
                    format!("[{}] unresolved_id (no such source)", v.marker.source_id)
                }
                _ if !quote_is_substantive(&v.marker.quoted_span) => format!(
                    "[{}] quote_mismatch (quote has fewer than {MIN_QUOTE_TERMS} content words): \"{}\"",
                    v.marker.source_id, v.marker.quoted_span
                ),
                (_, Some(score)) => format!(
                    "[{}] quote_mismatch (similarity {:.2}): \"{}\"",
                    v.marker.source_id, score, v.marker.quoted_span
                ),
                (_, None) => format!("[{}] quote_mismatch", v.marker.source_id),
            })
            .collect();
        problems.extend(
            input
                .citations
                .malformed
                .iter()
                .map(|m| format!("{} {}", m.kind.as_str(), m.raw)),
        );
        result.violated(
            Criterion::CitationValidity,
            format!(
                "every citation is a [source_id: \"quote\"] marker citing a retrieved source verbatim (similarity >= {:.2}), with no other citation forms or reference lists",
                self.config.fuzzy_threshold
            ),
            problems.join("; "),
        );
    }

    fn check_word_count(&self, input: &EvaluationInput<'_>, result: &mut EvaluationResult) {
        let words = word_count(input.draft);
        let range = input.section.word_range;
        if range.contains(words) {
            result.satisfied(Criterion::WordCount, format!("{words} words"));
        } else {
            result.violated(Criterion::WordCount, range.to_string(), format!("{words} words"));
        }
    }

    fn check_consistency(&self, input: &EvaluationInput<'_>, result: &mut EvaluationResult) {
        let mut problems = terminology_conflicts(input.draft, input.terminology);

        if let Some(previous) = input.previous_text {
            if word_count(previous) >= TONE_DRIFT_MIN_WORDS
                && word_count(input.draft) >= TONE_DRIFT_MIN_WORDS
            {
                let before = informality_rate(previous);
                let now = informality_rate(input.draft);
                if (now - before).abs() > TONE_DRIFT_LIMIT {
                    problems.push(format!(
                        "tone drift: {now:.1} informal markers per 100 words vs {before:.1} in the previous section"
                    ));
                }
            }
        }

        if problems.is_empty() {
            result.satisfied(Criterion::Consistency, "terminology and tone consistent");
        } else {
            result.violated(
                Criterion::Consistency,
                "terminology and tone consistent with earlier sections",
                problems.join("; "),
            );
        }
    }
}

/// Fraction of a question's key terms present in the draft.
pub fn question_coverage(question: &str, draft_terms: &std::collections::BTreeSet<String>) -> f64 {
    let terms = term_set(question);
    if terms.is_empty() {
        return 1.0;
    }
    let hits = terms.iter().filter(|t| draft_terms.contains(*t)).count();
    hits as f64 / terms.len() as f64
}

/// Acronyms redefined with a different long form, or long forms given a
/// different acronym, relative to the ledger and within the draft itself.
pub fn terminology_conflicts(draft: &str, ledger: &BTreeMap<String, String>) -> Vec<String> {
    let mut seen: BTreeMap<String, String> = ledger.clone();
    let mut problems = Vec::new();

    for (acronym, long_form) in acronym_definitions(draft) {
        let normalized = normalize(&long_form);
        if let Some(existing) = seen.get(&acronym) {
            if normalize(existing) != normalized {
                problems.push(format!(
                    "{acronym} defined as \"{long_form}\" but established as \"{existing}\""
                ));
            }
            continue;
        }
        if let Some((other, _)) = seen.iter().find(|(_, lf)| normalize(lf) == normalized) {
            problems.push(format!(
                "\"{long_form}\" abbreviated as {acronym} but established as {other}"
            ));
            continue;
        }
        seen.insert(acronym, long_form);
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CitationMarker, CitationStyle, CitationVerdict, CriterionStatus, FailureCategory,
        MalformedCitation, MalformedKind, QuoteStyle, SourceMetadata, StyleGuidelines, Tone,
        WordRange,
    };

    fn section(min: usize, max: usize) -> Section {
        Section::new(0, "Introduction", "goal", WordRange::new(min, max))
    }

    fn marker(id: &str) -> CitationMarker {
        CitationMarker {
            source_id: id.to_string(),
            quoted_span: "quote".to_string(),
            offset: 0,
            raw: format!("[{id}: \"quote\"]"),
            quote_style: QuoteStyle::Straight,
        }
    }

    fn report(statuses: &[(&str, CitationStatus)]) -> CitationReport {
        CitationReport {
            verdicts: statuses
                .iter()
                .map(|(id, status)| CitationVerdict {
                    marker: marker(id),
                    status: *status,
                    similarity: None,
                    metadata: None,
                })
                .collect(),
            malformed: vec![],
        }
    }

    fn question(id: u32, text: &str) -> ResearchQuestion {
        ResearchQuestion {
            id,
            text: text.to_string(),
            target_sections: vec![],
        }
    }

    fn prose(words: usize) -> String {
        "Street trees cool dense urban neighbourhoods measurably. "
            .repeat(words / 7 + 1)
            .split_whitespace()
            .take(words)
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_short_draft_is_length_violation_regardless_of_citations() {
        let config = RunConfig::with_max_retries(2);
        let section = section(1000, 1500);
        let draft = prose(400);
        let citations = report(&[("s1", CitationStatus::Valid)]);
        let ledger = BTreeMap::new();
        let result = SectionEvaluator::new(&config).evaluate(&EvaluationInput {
            draft: &draft,
            section: &section,
            questions: &[],
            citations: &citations,
            previous_text: None,
            terminology: &ledger,
        });
        assert!(!result.passed);
        assert_eq!(result.failure_categories(), vec![FailureCategory::LengthViolation]);
        assert_eq!(result.feedback[0].observed, "400 words");
    }

    #[test]
    fn test_unresolved_citation_blocks_acceptance() {
        let config = RunConfig::with_max_retries(2);
        let section = section(1, 2000);
        let draft = prose(300);
        let citations = report(&[
            ("s1", CitationStatus::Valid),
            ("ghost", CitationStatus::UnresolvedId),
        ]);
        let ledger = BTreeMap::new();
        let result = SectionEvaluator::new(&config).evaluate(&EvaluationInput {
            draft: &draft,
            section: &section,
            questions: &[],
            citations: &citations,
            previous_text: None,
            terminology: &ledger,
        });
        assert!(!result.passed);
        assert_eq!(result.failure_categories(), vec![FailureCategory::CitationInvalid]);
        assert!(result.feedback[0].observed.contains("[ghost] unresolved_id"));
    }

    #[test]
    fn test_question_coverage() {
        let config = RunConfig::with_max_retries(2);
        let section = section(1, 2000);
        let draft = prose(120);
        let covered = question(1, "How do street trees cool urban neighbourhoods?");
        let missed = question(2, "What financing mechanisms support municipal forestry programmes?");
        let questions = [&covered, &missed];
        let citations = CitationReport::default();
        let ledger = BTreeMap::new();
        let result = SectionEvaluator::new(&config).evaluate(&EvaluationInput {
            draft: &draft,
            section: &section,
            questions: &questions,
            citations: &citations,
            previous_text: None,
            terminology: &ledger,
        });
        assert_eq!(
            result.failure_categories(),
            vec![FailureCategory::QuestionUncovered]
        );
        assert!(result.feedback[0].observed.contains("Q2"));
        assert!(!result.feedback[0].observed.contains("Q1 "));
    }

    #[test]
    fn test_passing_draft() {
        let config = RunConfig::with_max_retries(2);
        let section = section(100, 200);
        let draft = prose(150);
        let q = question(1, "How do street trees cool neighbourhoods?");
        let questions = [&q];
        let citations = report(&[("s1", CitationStatus::Valid)]);
        let ledger = BTreeMap::new();
        let result = SectionEvaluator::new(&config).evaluate(&EvaluationInput {
            draft: &draft,
            section: &section,
            questions: &questions,
            citations: &citations,
            previous_text: None,
            terminology: &ledger,
        });
        assert!(result.passed, "{:?}", result.feedback);
        assert!(result.feedback.is_empty());
    }

    #[test]
    fn test_terminology_conflicts() {
        let mut ledger = BTreeMap::new();
        ledger.insert("UHI".to_string(), "urban heat island".to_string());

        assert!(terminology_conflicts("The Urban Heat Island (UHI) grows.", &ledger).is_empty());
        let problems =
            terminology_conflicts("The urban humidity index (UHI) rises.", &ledger);
        assert_eq!(problems.len(), 1);
        let problems = terminology_conflicts("An urban heat island (UH) forms.", &ledger);
        assert!(problems.is_empty(), "preceding words do not spell UH");
        let problems = terminology_conflicts(
            "Leaf area index (LAI) and later leaf area index (LI) again",
            &BTreeMap::new(),
        );
        assert!(problems.is_empty(), "preceding words do not spell LI");
    }

    #[test]
    fn test_tone_drift_against_previous_section() {
        let mut config = RunConfig::with_max_retries(2);
        config.style = Some(StyleGuidelines {
            tone: Some(Tone::Conversational),
            ..Default::default()
        });
        let section = section(1, 2000);
        let previous = prose(200);
        let draft = "You won't believe it! I can't stress this enough, you'll love trees! ".repeat(10);
        let citations = CitationReport::default();
        let ledger = BTreeMap::new();
        let result = SectionEvaluator::new(&config).evaluate(&EvaluationInput {
            draft: &draft,
            section: &section,
            questions: &[],
            citations: &citations,
            previous_text: Some(&previous),
            terminology: &ledger,
        });
        assert_eq!(
            result.status_of(Criterion::Consistency),
            Some(CriterionStatus::Violated)
        );
        assert_eq!(
            result.status_of(Criterion::Tone),
            Some(CriterionStatus::Satisfied)
        );
    }

    #[test]
    fn test_malformed_citations_block_acceptance() {
        let config = RunConfig::with_max_retries(2);
        let section = section(1, 2000);
        let draft = prose(120);
        let mut citations = report(&[("s1", CitationStatus::Valid)]);
        citations.malformed = vec![
            MalformedCitation {
                kind: MalformedKind::ConventionalCitation,
                raw: "(Ghost, 2021)".to_string(),
                offset: 10,
            },
            MalformedCitation {
                kind: MalformedKind::UnparsedMarker,
                raw: "[s9]".to_string(),
                offset: 40,
            },
        ];
        let ledger = BTreeMap::new();
        let result = SectionEvaluator::new(&config).evaluate(&EvaluationInput {
            draft: &draft,
            section: &section,
            questions: &[],
            citations: &citations,
            previous_text: None,
            terminology: &ledger,
        });
        assert!(!result.passed);
        assert_eq!(result.failure_categories(), vec![FailureCategory::CitationInvalid]);
        let observed = &result.feedback[0].observed;
        assert!(observed.contains("conventional_citation (Ghost, 2021)"), "{observed}");
        assert!(observed.contains("unparsed_marker [s9]"), "{observed}");
    }

    #[test]
    fn test_citation_style_checks_rendered_sources() {
        let mut config = RunConfig::with_max_retries(2);
        config.citation_style = Some(CitationStyle::Apa);
        let section = section(1, 2000);
        let draft = prose(120);
        let ledger = BTreeMap::new();
        let with_authors = |authors: &[&str]| {
            let mut citations = report(&[("s1", CitationStatus::Valid)]);
            citations.verdicts[0].metadata = Some(SourceMetadata {
                authors: authors.iter().map(|a| a.to_string()).collect(),
                year: Some(2019),
                title: "Urban climates".to_string(),
                ..Default::default()
            });
            citations
        };

        let good = with_authors(&["Timothy R. Oke"]);
        let result = SectionEvaluator::new(&config).evaluate(&EvaluationInput {
            draft: &draft,
            section: &section,
            questions: &[],
            citations: &good,
            previous_text: None,
            terminology: &ledger,
        });
        assert!(result.passed, "{:?}", result.feedback);

        let unrenderable = with_authors(&["bell hooks"]);
        let result = SectionEvaluator::new(&config).evaluate(&EvaluationInput {
            draft: &draft,
            section: &section,
            questions: &[],
            citations: &unrenderable,
            previous_text: None,
            terminology: &ledger,
        });
        assert_eq!(
            result.status_of(Criterion::InTextFormat),
            Some(CriterionStatus::Violated)
        );
        assert_eq!(result.failure_categories(), vec![FailureCategory::StyleMismatch]);
    }
}
