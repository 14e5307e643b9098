//! Specificity density: vague prose-only drafts fail.

use std::sync::LazyLock;

use regex::Regex;

use super::document::Document;
use super::{SPECIFICITY, ValidatorConfig};
use crate::core::types::CheckResult;

static LINE_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\blines?\s+\d+|\bL\d+\b|\.[A-Za-z0-9]{1,8}:\d+").unwrap()
});

static BEFORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*]\s*)?(?:#+\s*)?(?:\*\*|__)?\s*before\b").unwrap()
});

static AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*]\s*)?(?:#+\s*)?(?:\*\*|__)?\s*after\b").unwrap()
});

/// Counted specificity signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signals {
    pub fenced_blocks: usize,
    pub line_references: usize,
    pub before_after_pairs: usize,
}

impl Signals {
    pub fn total(&self) -> usize {
        self.fenced_blocks + self.line_references + self.before_after_pairs
    }
}

pub fn count_signals(doc: &Document<'_>) -> Signals {
    let mut line_references = 0;
    let mut befores = 0;
    let mut afters = 0;
    for (idx, line) in doc.lines.iter().enumerate() {
        line_references += LINE_REF_RE.find_iter(line).count();
        // Before/after labels inside code are code, not labels.
        if doc.fence_at(idx).is_some() {
            continue;
        }
        if BEFORE_RE.is_match(line) {
            befores += 1;
        } else if AFTER_RE.is_match(line) {
            afters += 1;
        }
    }
    Signals {
        fenced_blocks: doc.fences.len(),
        line_references,
        before_after_pairs: befores.min(afters),
    }
}

/// Signals required for a document of `chars` characters.
pub fn required_signals(chars: usize, config: &ValidatorConfig) -> usize {
    config
        .specificity_floor
        .max(chars / config.specificity_scale.max(1))
}

pub fn specificity(doc: &Document<'_>, config: &ValidatorConfig) -> CheckResult {
    let signals = count_signals(doc);
    let required = required_signals(doc.chars, config);
    if signals.total() >= required {
        return CheckResult::pass(SPECIFICITY);
    }
    CheckResult::fail(
        SPECIFICITY,
        format!(
            "specificity: found {} specific signals ({} fenced blocks, {} line references, {} before/after pairs) but a draft of {} characters needs at least {}. Replace vague instructions with code, line numbers, or before/after pairs.",
            signals.total(),
            signals.fenced_blocks,
            signals.line_references,
            signals.before_after_pairs,
            doc.chars,
            required
        ),
    )
}
