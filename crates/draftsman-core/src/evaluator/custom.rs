//! User-defined criteria. Only configured checks are recorded.

use super::EvaluationInput;
use crate::domain::{CitationStatus, Criterion, CustomCriteria, EvaluationResult};
use crate::text::{count_term, word_count};

pub(crate) fn evaluate(
    criteria: &CustomCriteria,
    input: &EvaluationInput<'_>,
    result: &mut EvaluationResult,
) {
    let draft = input.draft;

    if criteria.min_words.is_some() || criteria.max_words.is_some() {
        let words = word_count(draft);
        let too_short = criteria.min_words.is_some_and(|min| words < min);
        let too_long = criteria.max_words.is_some_and(|max| words > max);
        if too_short || too_long {
            let expected = match (criteria.min_words, criteria.max_words) {
                (Some(min), Some(max)) => format!("between {min} and {max} words"),
                (Some(min), None) => format!("at least {min} words"),
                (None, max) => format!("at most {} words", max.unwrap_or_default()),
            };
            result.violated(Criterion::LengthBounds, expected, format!("{words} words"));
        } else {
            result.satisfied(Criterion::LengthBounds, format!("{words} words"));
        }
    }

    if let Some(min) = criteria.min_citations {
        let valid = input.citations.count(CitationStatus::Valid);
        if valid >= min {
            result.satisfied(Criterion::MinCitations, format!("{valid} valid citations"));
        } else {
            result.violated(
                Criterion::MinCitations,
                format!("at least {min} valid citations"),
                format!("{valid} valid citations"),
            );
        }
    }

    if !criteria.required_elements.is_empty() {
        let missing: Vec<&str> = criteria
            .required_elements
            .iter()
            .filter(|element| {
                let present = if element.cues.is_empty() {
                    count_term(draft, &element.name) > 0
                } else {
                    element.cues.iter().any(|cue| count_term(draft, cue) > 0)
                };
                !present
            })
            .map(|element| element.name.as_str())
            .collect();
        if missing.is_empty() {
            result.satisfied(Criterion::RequiredElements, "all required elements present");
        } else {
            result.violated(
                Criterion::RequiredElements,
                "every required element present",
                format!("missing: {}", missing.join(", ")),
            );
        }
    }

    if !criteria.forbidden_terms.is_empty() {
        let used: Vec<String> = criteria
            .forbidden_terms
            .iter()
            .filter_map(|term| {
                let n = count_term(draft, term);
                (n > 0).then(|| format!("\"{term}\" x{n}"))
            })
            .collect();
        if used.is_empty() {
            result.satisfied(Criterion::ForbiddenTerms, "no forbidden terms");
        } else {
            result.violated(
                Criterion::ForbiddenTerms,
                "no forbidden terms",
                format!("used {}", used.join(", ")),
            );
        }
    }

    if !criteria.preferred_terms.is_empty() {
        let replace: Vec<String> = criteria
            .preferred_terms
            .iter()
            .filter(|(variant, _)| count_term(draft, variant) > 0)
            .map(|(variant, preferred)| format!("\"{variant}\" -> \"{preferred}\""))
            .collect();
        if replace.is_empty() {
            result.satisfied(Criterion::PreferredTerms, "preferred terminology used");
        } else {
            result.violated(
                Criterion::PreferredTerms,
                "preferred terminology",
                format!("replace {}", replace.join(", ")),
            );
        }
    }
}
