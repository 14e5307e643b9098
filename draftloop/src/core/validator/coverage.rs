//! Coverage checks: shown excerpts, concrete data examples, input/output examples.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;

use super::document::{Document, Fence};
use super::{CONCRETE_EXAMPLES, EXCERPT_COVERAGE, IO_EXAMPLES, ValidatorConfig};
use crate::core::types::{CheckResult, ContextSnapshot, ReferenceKind};

static DEFINITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:struct|enum|class|interface|record|message|schema|dataclass)\s+([A-Z][A-Za-z0-9_]*)|\btype\s+([A-Z][A-Za-z0-9_]*)\s*=",
    )
    .unwrap()
});

static SIGNATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:fn|def|function|func)\s+([A-Za-z_][A-Za-z0-9_]*)\s*[(<]").unwrap()
});

static INPUT_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*>]\s*)?(?:\*\*|__)?\s*(?:example\s+)?(?:input|inputs|given|request|arguments?|args)\b",
    )
    .unwrap()
});

static OUTPUT_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*>]\s*)?(?:\*\*|__)?\s*(?:example\s+)?(?:output|outputs|returns?|result|expected|response)\b",
    )
    .unwrap()
});

const DATA_LANGS: [&str; 6] = ["json", "jsonc", "json5", "yaml", "yml", "toml"];

/// Every `modify` reference must be mentioned and shown as a fenced excerpt
/// nearby. When the snapshot has content, the fence must repeat at least one
/// of its lines; an empty snapshot accepts any non-empty fence.
pub fn excerpt_coverage(
    doc: &Document<'_>,
    snapshots: &BTreeMap<String, ContextSnapshot>,
    config: &ValidatorConfig,
) -> CheckResult {
    let window = config.excerpt_window_lines;
    let mut problems = Vec::new();

    for (key, snapshot) in snapshots {
        if snapshot.kind != ReferenceKind::Modify {
            continue;
        }
        let mentions: Vec<usize> = doc
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.contains(key.as_str()))
            .map(|(idx, _)| idx)
            .collect();
        if mentions.is_empty() {
            problems.push(format!(
                "`{key}` is marked for modification but the draft never mentions it"
            ));
            continue;
        }
        let excerpt = code_lines(snapshot.excerpt.lines());
        let shown = mentions.iter().any(|&line| {
            doc.fences_starting_in(line.saturating_sub(window), line + window)
                .any(|fence| fence.has_content && quotes_excerpt(doc, fence, &excerpt))
        });
        if !shown {
            problems.push(format!(
                "`{key}` is marked for modification but no fenced excerpt of its content appears within {window} lines of a mention"
            ));
        }
    }

    if problems.is_empty() {
        CheckResult::pass(EXCERPT_COVERAGE)
    } else {
        CheckResult::fail(
            EXCERPT_COVERAGE,
            format!(
                "excerpt coverage: {}. Show the current code being changed, not only a description.",
                problems.join("; ")
            ),
        )
    }
}

/// Every named data structure needs a serialized example shortly after its definition.
pub fn concrete_examples(doc: &Document<'_>, config: &ValidatorConfig) -> CheckResult {
    let window = config.example_window_lines;
    let mut missing = Vec::new();

    for (name, line) in first_occurrences(doc, &DEFINITION_RE) {
        let own_fence = doc.fence_at(line).map(|f| (f.start, f.end));
        let found = doc
            .fences_starting_in(line + 1, line + window)
            .any(|fence| fence.has_content && is_data_fence(doc, fence.start, &fence.lang))
            || doc.window(line + 1, line + window).any(|idx| {
                let in_own = own_fence.is_some_and(|(s, e)| idx >= s && idx <= e);
                !in_own && looks_like_literal(doc.lines[idx])
            });
        if !found {
            missing.push(format!("`{name}` (line {})", line + 1));
        }
    }

    if missing.is_empty() {
        CheckResult::pass(CONCRETE_EXAMPLES)
    } else {
        CheckResult::fail(
            CONCRETE_EXAMPLES,
            format!(
                "concrete examples: no JSON/YAML/literal example within {window} lines after {}. Add a filled-in instance for each.",
                missing.join(", ")
            ),
        )
    }
}

/// Every named operation needs one occurrence accompanied by concrete input and output.
pub fn io_examples(doc: &Document<'_>, config: &ValidatorConfig) -> CheckResult {
    let window = config.io_window_lines;
    let mut missing = Vec::new();

    for (name, def_line) in first_occurrences(doc, &SIGNATURE_RE) {
        let call = format!("{name}(");
        let call_result = call_result_regex(&name);
        let covered = doc
            .lines
            .iter()
            .enumerate()
            .filter(|(idx, line)| *idx == def_line || line.contains(&call))
            .any(|(idx, _)| {
                let range = doc.window(idx, idx + window);
                let mut has_input = false;
                let mut has_output = false;
                for i in range {
                    let line = doc.lines[i];
                    if call_result.is_match(line) {
                        return true;
                    }
                    has_input |= INPUT_MARKER_RE.is_match(line);
                    has_output |= OUTPUT_MARKER_RE.is_match(line);
                }
                has_input && has_output
            });
        if !covered {
            missing.push(format!("`{name}`"));
        }
    }

    if missing.is_empty() {
        CheckResult::pass(IO_EXAMPLES)
    } else {
        CheckResult::fail(
            IO_EXAMPLES,
            format!(
                "input/output examples: {} never shown with concrete input and output values within {window} lines. Add an example call and its result.",
                missing.join(", ")
            ),
        )
    }
}

/// First line of each distinct name captured by `re`, in document order.
/// Trimmed lines carrying at least one identifier or literal character.
fn code_lines<'a>(lines: impl Iterator<Item = &'a str>) -> BTreeSet<&'a str> {
    lines
        .map(str::trim)
        .filter(|line| line.chars().any(char::is_alphanumeric))
        .collect()
}

fn quotes_excerpt(doc: &Document<'_>, fence: &Fence, excerpt: &BTreeSet<&str>) -> bool {
    if excerpt.is_empty() {
        return true;
    }
    // The closing marker has no alphanumerics, so it never matches.
    let body = doc.lines[fence.start + 1..=fence.end].iter().copied();
    !code_lines(body).is_disjoint(excerpt)
}

fn first_occurrences(doc: &Document<'_>, re: &Regex) -> Vec<(String, usize)> {
    let mut seen: Vec<(String, usize)> = Vec::new();
    for (idx, line) in doc.lines.iter().enumerate() {
        for caps in re.captures_iter(line) {
            let Some(name) = caps.iter().skip(1).flatten().next() else {
                continue;
            };
            if !seen.iter().any(|(n, _)| n == name.as_str()) {
                seen.push((name.as_str().to_string(), idx));
            }
        }
    }
    seen
}

fn is_data_fence(doc: &Document<'_>, start: usize, lang: &str) -> bool {
    if DATA_LANGS.contains(&lang) {
        return true;
    }
    // Untagged fence whose first content line is an object or array literal.
    lang.is_empty()
        && doc
            .lines
            .iter()
            .skip(start + 1)
            .find(|line| !line.trim().is_empty())
            .is_some_and(|line| looks_like_literal(line))
}

fn looks_like_literal(line: &str) -> bool {
    let trimmed = line.trim().trim_start_matches('`');
    (trimmed.starts_with('{') && trimmed.contains(':'))
        || trimmed.starts_with("[{")
        || trimmed.starts_with("{\"")
}

fn call_result_regex(name: &str) -> Regex {
    let pattern = format!(
        r"{}\s*\(.*\)\s*(?:=>|==|→|returns\b|//\s*=>|#\s*=>)",
        regex::escape(name)
    );
    Regex::new(&pattern).unwrap_or_else(|_| Regex::new("$^").expect("empty regex"))
}
