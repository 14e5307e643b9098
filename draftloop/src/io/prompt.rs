//! Prompt rendering for command-backed collaborators.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the token budget, droppable sections go
//! first, then the design document is shortened with its headers intact.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::budget::{estimate_units, truncate};
use crate::io::collaborators::{DraftRequest, ReviewRequest};

const DRAFTER_TEMPLATE: &str = include_str!("prompts/drafter.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");

/// Dropped in this order when over budget.
const DROP_ORDER: [&str; 3] = ["references", "excerpts", "prior_draft"];
/// Section shortened (not dropped) when dropping is not enough.
const SHRINKABLE: &str = "input";

static SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap());

#[derive(Debug, Clone, Serialize)]
struct SnapshotContext<'a> {
    location: &'a str,
    kind: &'a str,
    excerpt: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct ReferenceContext<'a> {
    location: &'a str,
    start: usize,
    end: usize,
    relevance: &'a str,
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.add_template("drafter", DRAFTER_TEMPLATE)
        .expect("drafter template should be valid");
    env.add_template("reviewer", REVIEWER_TEMPLATE)
        .expect("reviewer template should be valid");
    env
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (idx, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(Section {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_units(sections: &[Section]) -> usize {
    sections.iter().map(|s| estimate_units(&s.content)).sum()
}

/// Fit sections into `budget` units. Returns a warning if anything was cut.
fn apply_budget(sections: &mut Vec<Section>, budget: usize) -> Option<String> {
    if total_units(sections) <= budget {
        return None;
    }
    let mut dropped = Vec::new();
    for key in DROP_ORDER {
        if total_units(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(section = key, "dropped section for budget");
            sections.remove(idx);
            dropped.push(key);
        }
    }

    let mut shortened = None;
    let over = total_units(sections).saturating_sub(budget);
    if over > 0
        && let Some(section) = sections.iter_mut().find(|s| s.key == SHRINKABLE)
    {
        let allowed = estimate_units(&section.content).saturating_sub(over);
        let cut = truncate(&section.content, allowed, true);
        section.content = cut.text;
        shortened = cut.warning;
    }

    let mut notes = Vec::new();
    if !dropped.is_empty() {
        notes.push(format!("omitted {}", dropped.join(", ")));
    }
    notes.extend(shortened);
    let warning = notes.join("; ");
    warn!(budget, warning = %warning, "prompt exceeded budget");
    Some(warning)
}

fn render_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds collaborator prompts within a token budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_units: usize,
}

impl PromptBuilder {
    pub fn new(budget_units: usize) -> Self {
        Self { budget_units }
    }

    pub fn build_draft(&self, request: &DraftRequest<'_>) -> Result<String> {
        let snapshots: Vec<_> = request
            .context_snapshots
            .iter()
            .map(|(location, snapshot)| SnapshotContext {
                location,
                kind: snapshot.kind.as_str(),
                excerpt: snapshot.excerpt.trim_end(),
            })
            .collect();
        let references: Vec<_> = request
            .pattern_references
            .iter()
            .map(|reference| ReferenceContext {
                location: &reference.location,
                start: reference.range.start,
                end: reference.range.end,
                relevance: reference.relevance.trim(),
            })
            .collect();
        let env = environment();
        let rendered = env.get_template("drafter")?.render(context! {
            input => request.input_artifact.trim(),
            feedback => request.feedback.map(str::trim),
            issues => request.validation_issues,
            prior_draft => request.prior_draft.map(str::trim),
            snapshots => snapshots,
            references => references,
        })?;
        Ok(self.fit(&rendered))
    }

    pub fn build_review(&self, request: &ReviewRequest<'_>) -> Result<String> {
        let env = environment();
        let rendered = env.get_template("reviewer")?.render(context! {
            input => request.input_artifact.trim(),
            draft => request.draft.trim(),
            iteration => request.iteration,
            warning => request.truncation_warning.as_deref(),
        })?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        let mut prompt = match apply_budget(&mut sections, self.budget_units) {
            Some(warning) => {
                let mut prompt = render_sections(&sections);
                prompt.push_str(&format!("\n\n[note: {warning}]"));
                prompt
            }
            None => render_sections(&sections),
        };
        prompt.push('\n');
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::RunState;
    use crate::core::types::{ContextSnapshot, LineRange, PatternReference, ReferenceKind};

    fn state() -> RunState {
        let mut state = RunState::new("r1", "design.md", 3, false);
        state.input_artifact = "# Discounts\n\nApply a 10% discount to carts over $100.\n".to_string();
        state.context_snapshots.insert(
            "src/cart.rs".to_string(),
            ContextSnapshot {
                kind: ReferenceKind::Modify,
                excerpt: "pub struct Cart;".to_string(),
            },
        );
        state.pattern_references.push(PatternReference {
            location: "src/orders.rs".to_string(),
            range: LineRange::new(10, 40),
            relevance: "totals".to_string(),
        });
        state
    }

    #[test]
    fn draft_prompt_includes_context() {
        let state = state();
        let prompt = PromptBuilder::new(10_000)
            .build_draft(&DraftRequest::from_state(&state))
            .expect("render");
        assert!(prompt.contains("Apply a 10% discount"));
        assert!(prompt.contains("### `src/cart.rs` (modify)"));
        assert!(prompt.contains("- `src/orders.rs:10-40`: totals"));
        assert!(!prompt.contains("Feedback to address"));
        assert!(!prompt.contains("<!-- section:"));
    }

    /// Second-pass prompts carry the feedback, issues and prior draft.
    #[test]
    fn revision_prompt_includes_feedback_and_issues() {
        let mut state = state();
        state.draft_artifact = "# Plan v1".to_string();
        state.review_feedback = "Add a JSON example.".to_string();
        state.validation_issues = vec!["specificity: too vague".to_string()];
        let prompt = PromptBuilder::new(10_000)
            .build_draft(&DraftRequest::from_state(&state))
            .expect("render");
        assert!(prompt.contains("Add a JSON example."));
        assert!(prompt.contains("- specificity: too vague"));
        assert!(prompt.contains("# Plan v1"));
    }

    #[test]
    fn over_budget_drops_droppable_sections_first() {
        let mut state = state();
        state.draft_artifact = "x".repeat(4_000);
        let prompt = PromptBuilder::new(400)
            .build_draft(&DraftRequest::from_state(&state))
            .expect("render");
        assert!(!prompt.contains("Previous draft"));
        assert!(!prompt.contains("Patterns to follow"));
        assert!(prompt.contains("Apply a 10% discount"));
        assert!(prompt.contains("[note: omitted"));
    }

    #[test]
    fn oversized_input_is_shortened_with_headers_kept() {
        let mut state = state();
        state.input_artifact = format!(
            "# Discounts\n\n{}\n\n## Rollout\n\n{}\n",
            "body ".repeat(2_000),
            "more ".repeat(2_000)
        );
        let prompt = PromptBuilder::new(1_000)
            .build_draft(&DraftRequest::from_state(&state))
            .expect("render");
        assert!(prompt.contains("# Discounts"));
        assert!(prompt.contains("## Rollout"));
        assert!(prompt.contains("content truncated"));
    }

    #[test]
    fn review_prompt_forwards_warning() {
        let mut state = state();
        state.draft_artifact = "# Plan".to_string();
        let mut request = ReviewRequest::from_state(&state);
        request.truncation_warning = Some("content truncated from ~9 to ~3 tokens".to_string());
        let prompt = PromptBuilder::new(10_000)
            .build_review(&request)
            .expect("render");
        assert!(prompt.contains("VERDICT: APPROVED"));
        assert!(prompt.contains("Note: content truncated from ~9 to ~3 tokens"));
        assert!(prompt.contains("# Plan"));
    }
}
