//! Budgeted context assembly for section generation.
//!
//! Items are packed by tier, highest priority first:
//!
//! 1. research questions assigned to the section (with the topic)
//! 2. the section brief: name, goal, target length, must-fix instructions
//! 3. the previous accepted section in full, with the terminology ledger
//! 4. older accepted sections ranked by relevance to the section goal
//! 5. sources retrieved for the section, ranked by score
//!
//! Tiers 1-3 are mandatory: if they do not fit, assembly fails with
//! `context_overflow`. Optional items are dropped lowest priority first until
//! the payload fits the budget.

use serde::{Deserialize, Serialize};

use crate::capability::{RelevanceDocument, RelevanceIndex};
use crate::domain::{BudgetUnit, ContextLimits, DraftError, Result, Run, ScoredSource, Section};
use crate::text::{estimate_tokens, words};

/// Priority tier of a context item (lower value = higher priority).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextTier {
    ResearchQuestions = 1,
    SectionBrief = 2,
    PreviousSection = 3,
    RelatedSection = 4,
    Source = 5,
}

impl ContextTier {
    pub fn is_mandatory(self) -> bool {
        self <= ContextTier::PreviousSection
    }
}

/// One labelled block of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    pub tier: ContextTier,
    pub label: String,
    pub content: String,
    /// Size of the rendered block in the budget unit.
    pub size: usize,
}

impl ContextItem {
    fn new(
        tier: ContextTier,
        label: impl Into<String>,
        content: impl Into<String>,
        unit: BudgetUnit,
    ) -> Self {
        let label = label.into();
        let content = content.into();
        let size = measure(&render_block(&label, &content), unit);
        Self {
            tier,
            label,
            content,
            size,
        }
    }
}

/// An item left out because the budget was exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedItem {
    pub tier: ContextTier,
    pub label: String,
    pub size: usize,
}

/// Size-bounded context handed to the generation capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPayload {
    pub items: Vec<ContextItem>,
    pub total_size: usize,
    pub budget: usize,
    pub unit: BudgetUnit,
    pub dropped: Vec<DroppedItem>,
}

impl ContextPayload {
    pub fn render(&self) -> String {
        self.items
            .iter()
            .map(|item| render_block(&item.label, &item.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn count_tier(&self, tier: ContextTier) -> usize {
        self.items.iter().filter(|i| i.tier == tier).count()
    }
}

fn render_block(label: &str, content: &str) -> String {
    format!("## {label}\n{content}")
}

/// Size of `text` in `unit`. Token sizes include the separator that joins
/// blocks so the rendered payload never exceeds the summed sizes.
pub fn measure(text: &str, unit: BudgetUnit) -> usize {
    match unit {
        BudgetUnit::Words => words(text).len(),
        BudgetUnit::Tokens => estimate_tokens(text) + 1,
    }
}

/// Builds context payloads within the configured limits.
pub struct ContextAssembler<'a> {
    limits: &'a ContextLimits,
    relevance: &'a dyn RelevanceIndex,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(limits: &'a ContextLimits, relevance: &'a dyn RelevanceIndex) -> Self {
        Self { limits, relevance }
    }

    /// Assemble the payload for the section at `section_index`.
    ///
    /// Reads the section's retrieved sources and must-fix instructions from
    /// the run.
    pub fn assemble(&self, run: &Run, section_index: usize) -> Result<ContextPayload> {
        let unit = self.limits.unit;
        let section = run
            .sections
            .get(section_index)
            .ok_or(DraftError::SectionNotFound(section_index))?;

        let mut mandatory = vec![
            ContextItem::new(
                ContextTier::ResearchQuestions,
                "Research questions",
                questions_block(run, section_index),
                unit,
            ),
            ContextItem::new(
                ContextTier::SectionBrief,
                format!("Section brief: {}", section.name),
                brief_block(run, section),
                unit,
            ),
        ];
        let previous = run.previous_accepted(section_index);
        if let Some(block) = previous_block(run, previous) {
            let label = match previous {
                Some(prev) => format!("Previous section: {}", prev.name),
                None => "Established terminology".to_string(),
            };
            mandatory.push(ContextItem::new(
                ContextTier::PreviousSection,
                label,
                block,
                unit,
            ));
        }

        let required: usize = mandatory.iter().map(|i| i.size).sum();
        if required > self.limits.budget {
            return Err(DraftError::ContextOverflow {
                section: section_index,
                required,
                budget: self.limits.budget,
                unit,
            });
        }

        let mut optional: Vec<ContextItem> = self
            .related_sections(run, section, previous.map(|p| p.index))
            .into_iter()
            .map(|s| {
                ContextItem::new(
                    ContextTier::RelatedSection,
                    format!("Related section: {}", s.name),
                    s.final_text.clone().unwrap_or_default(),
                    unit,
                )
            })
            .collect();
        optional.extend(self.ranked_sources(&section.sources).into_iter().map(|s| {
            ContextItem::new(
                ContextTier::Source,
                format!("Source [{}]", s.record.source_id),
                source_block(s),
                unit,
            )
        }));

        let mut total = required;
        total += optional.iter().map(|i| i.size).sum::<usize>();
        let mut dropped = Vec::new();
        while total > self.limits.budget {
            let Some(item) = optional.pop() else { break };
            total -= item.size;
            dropped.push(DroppedItem {
                tier: item.tier,
                label: item.label,
                size: item.size,
            });
        }
        dropped.reverse();

        let mut items = mandatory;
        items.extend(optional);
        Ok(ContextPayload {
            items,
            total_size: total,
            budget: self.limits.budget,
            unit,
            dropped,
        })
    }

    /// Older accepted sections passing the similarity floor, best first,
    /// ties broken by template proximity.
    fn related_sections<'r>(
        &self,
        run: &'r Run,
        section: &Section,
        previous_index: Option<usize>,
    ) -> Vec<&'r Section> {
        if self.limits.older_sections_top_k == 0 {
            return Vec::new();
        }
        // Closest first, so relevance ties keep proximity order.
        let candidates: Vec<&Section> = run.sections[..section.index]
            .iter()
            .rev()
            .filter(|s| Some(s.index) != previous_index && s.final_text.is_some())
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let ids: Vec<String> = candidates.iter().map(|s| s.index.to_string()).collect();
        let documents: Vec<RelevanceDocument<'_>> = candidates
            .iter()
            .zip(&ids)
            .map(|(s, id)| RelevanceDocument {
                id,
                text: s.final_text.as_deref().unwrap_or_default(),
            })
            .collect();

        let query = format!("{} {}", section.name, section.goal);
        let mut ranked: Vec<(f64, &Section)> = self
            .relevance
            .rank(&query, &documents, documents.len())
            .into_iter()
            .filter(|r| r.score >= self.limits.min_similarity)
            .filter_map(|r| {
                let index: usize = r.id.parse().ok()?;
                run.sections.get(index).map(|s| (r.score, s))
            })
            .collect();
        ranked.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (section.index - a.index).cmp(&(section.index - b.index)))
        });
        ranked.truncate(self.limits.older_sections_top_k);
        ranked.into_iter().map(|(_, s)| s).collect()
    }

    fn ranked_sources<'s>(&self, sources: &'s [ScoredSource]) -> Vec<&'s ScoredSource> {
        let mut ranked: Vec<&ScoredSource> = sources.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(self.limits.max_sources);
        ranked
    }
}

fn questions_block(run: &Run, section_index: usize) -> String {
    let mut out = format!("Document topic: {}\n", run.topic);
    for q in run.questions_for(section_index) {
        out.push_str(&format!("Q{}. {}\n", q.id, q.text));
    }
    out
}

fn brief_block(run: &Run, section: &Section) -> String {
    let mut out = format!(
        "Position: section {} of {}\nGoal: {}\nTarget length: {}\n",
        section.index + 1,
        run.sections.len(),
        section.goal,
        section.word_range,
    );
    if !section.must_fix.is_empty() {
        out.push_str("Must fix from the previous attempt:\n");
        for instruction in &section.must_fix {
            out.push_str(&format!("- {instruction}\n"));
        }
    }
    out
}

fn previous_block(run: &Run, previous: Option<&Section>) -> Option<String> {
    let mut out = String::new();
    if let Some(text) = previous.and_then(|p| p.final_text.as_deref()) {
        out.push_str(text);
        out.push('\n');
    }
    if !run.terminology.is_empty() {
        out.push_str("Established terms:\n");
        for (acronym, long_form) in &run.terminology {
            out.push_str(&format!("- {long_form} ({acronym})\n"));
        }
    }
    (!out.is_empty()).then_some(out)
}

fn source_block(source: &ScoredSource) -> String {
    let meta = &source.record.metadata;
    let mut out = String::new();
    if !meta.authors.is_empty() {
        out.push_str(&meta.authors.join(", "));
        out.push(' ');
    }
    if let Some(year) = meta.year {
        out.push_str(&format!("({year}) "));
    }
    if !meta.title.is_empty() {
        out.push_str(&meta.title);
    }
    out.push('\n');
    for span in &source.record.spans {
        out.push_str(&format!("> \"{span}\"\n"));
    }
    out
}
