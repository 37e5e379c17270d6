//! Planning helpers: section goals, question generation requests and their
//! parsing, and the standing instructions given with every section draft.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::capability::{CapabilityError, GenerationPurpose, GenerationRequest};
use crate::context::ContextPayload;
use crate::domain::{QuestionCount, ResearchQuestion, Run, Section};

/// Goal for a section, derived from keywords in its name.
pub fn section_goal(name: &str) -> String {
    let lower = name.to_lowercase();
    let has = |keys: &[&str]| keys.iter().any(|k| lower.contains(k));

    if has(&["introduction", "overview", "background"]) {
        "Establish the problem, its context and significance, and state the scope and aims of the document.".to_string()
    } else if has(&["literature", "related work", "review", "state of the art"]) {
        "Synthesize prior work, compare perspectives, and identify the gaps this document addresses.".to_string()
    } else if has(&["method", "approach", "design", "materials"]) {
        "Describe how the investigation is carried out and justify the choices made.".to_string()
    } else if has(&["result", "finding", "analysis", "evaluation"]) {
        "Present the evidence and analyse what it shows, grounded in the cited sources.".to_string()
    } else if has(&["discussion", "implication", "limitation"]) {
        "Interpret the findings, weigh alternative explanations, and discuss limitations and implications.".to_string()
    } else if has(&["conclusion", "summary", "future", "recommendation"]) {
        "Draw the argument together, state the conclusions, and outline future directions.".to_string()
    } else {
        format!("Develop '{}' with evidence-backed analysis that advances the document's argument.", name.trim())
    }
}

// ---------------------------------------------------------------------------
// Research questions
// ---------------------------------------------------------------------------

/// Request asking the generation capability for research questions.
pub fn question_request(run: &Run) -> GenerationRequest {
    let count = run.config.questions;
    let mut context = format!("Topic: {}\n\nDocument structure:\n", run.topic);
    for section in &run.sections {
        context.push_str(&format!("ID {}: {}\n", section.index, section.name));
    }
    GenerationRequest {
        purpose: GenerationPurpose::ResearchQuestions,
        context,
        instructions: vec![
            format!(
                "Write between {} and {} specific, analytical research questions covering the whole document.",
                count.min, count.max
            ),
            "Assign each question to the section IDs it informs.".to_string(),
            r#"Return only JSON: {"questions": [{"text": "...?", "target_sections": [0]}]}"#.to_string(),
        ],
        section_index: None,
    }
}

/// Parse generated questions.
///
/// Accepts the JSON object (optionally wrapped in prose or a code fence) or,
/// failing that, one question per numbered/bulleted line. Targets may be
/// section ids or section names; unknown targets are dropped. More than
/// `count.max` questions are truncated; fewer than `count.min` is an error.
pub fn parse_questions(
    raw: &str,
    template: &[&str],
    count: QuestionCount,
) -> Result<Vec<ResearchQuestion>, CapabilityError> {
    let parsed = parse_json_questions(raw, template).unwrap_or_else(|| parse_line_questions(raw));

    let questions: Vec<ResearchQuestion> = parsed
        .into_iter()
        .filter(|(text, _)| !text.trim().is_empty())
        .take(count.max)
        .enumerate()
        .map(|(i, (text, target_sections))| ResearchQuestion {
            id: i as u32 + 1,
            text: text.trim().to_string(),
            target_sections,
        })
        .collect();

    if questions.len() < count.min {
        return Err(CapabilityError::InvalidResponse(format!(
            "expected at least {} research questions, got {}",
            count.min,
            questions.len()
        )));
    }
    Ok(questions)
}

fn parse_json_questions(raw: &str, template: &[&str]) -> Option<Vec<(String, Vec<usize>)>> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&raw[start..=end]).ok()?;
    let items = value.get("questions")?.as_array()?;

    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some((text.clone(), Vec::new())),
                Value::Object(obj) => {
                    let text = obj.get("text")?.as_str()?.to_string();
                    let targets = obj
                        .get("target_sections")
                        .and_then(Value::as_array)
                        .map(|t| normalize_targets(t, template))
                        .unwrap_or_default();
                    Some((text, targets))
                }
                _ => None,
            })
            .collect(),
    )
}

fn normalize_targets(raw: &[Value], template: &[&str]) -> Vec<usize> {
    let mut out = BTreeSet::new();
    for target in raw {
        let index = match target {
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            Value::String(s) => template
                .iter()
                .position(|t| t.eq_ignore_ascii_case(s.trim()))
                .or_else(|| s.trim().parse().ok()),
            _ => None,
        };
        if let Some(index) = index.filter(|i| *i < template.len()) {
            out.insert(index);
        }
    }
    out.into_iter().collect()
}

fn parse_line_questions(raw: &str) -> Vec<(String, Vec<usize>)> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*' | ' '))
                .trim()
        })
        .filter(|line| line.ends_with('?'))
        .map(|line| (line.to_string(), Vec::new()))
        .collect()
}

// ---------------------------------------------------------------------------
// Section drafts
// ---------------------------------------------------------------------------

/// Request for one section draft.
pub fn draft_request(run: &Run, section: &Section, payload: &ContextPayload) -> GenerationRequest {
    let mut instructions = vec![
        format!(
            "Write the body of the section '{}' ({} of {}). Begin directly with the prose.",
            section.name,
            section.index + 1,
            run.sections.len()
        ),
        format!("Length: {}.", section.word_range),
        "Address every research question listed in the context.".to_string(),
        r#"Support every factual claim with a citation marker in the exact form [source_id: "verbatim quote"], using only the sources listed in the context and quoting their text exactly."#.to_string(),
        "Do not write author-year or numbered citations and do not add a reference list; both are generated from the markers.".to_string(),
        "Keep terminology and tone consistent with the previous section.".to_string(),
    ];
    if let Some(style) = &run.config.style {
        let mut targets = Vec::new();
        if let Some(tone) = style.tone {
            targets.push(format!("tone {tone:?}"));
        }
        if let Some(voice) = style.voice {
            targets.push(format!("voice {voice:?}"));
        }
        if let Some(clarity) = style.clarity {
            targets.push(format!("clarity {clarity:?}"));
        }
        if let Some(complexity) = style.sentence_complexity {
            targets.push(format!("sentence complexity {complexity:?}"));
        }
        if let Some(depth) = style.technical_depth {
            targets.push(format!("technical depth {depth:?}"));
        }
        if !targets.is_empty() {
            instructions.push(format!("Style targets: {}.", targets.join(", ").to_lowercase()));
        }
    }
    if let Some(custom) = &run.config.custom {
        for element in &custom.required_elements {
            instructions.push(format!("Include {}.", element.name));
        }
        if !custom.forbidden_terms.is_empty() {
            instructions.push(format!(
                "Never use these terms: {}.",
                custom.forbidden_terms.join(", ")
            ));
        }
        for (variant, preferred) in &custom.preferred_terms {
            instructions.push(format!("Write '{preferred}' instead of '{variant}'."));
        }
    }
    instructions.extend(section.must_fix.iter().map(|m| format!("MUST FIX: {m}")));

    GenerationRequest {
        purpose: GenerationPurpose::SectionDraft,
        context: payload.render(),
        instructions,
        section_index: Some(section.index),
    }
}
