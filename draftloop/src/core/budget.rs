//! Token budget helpers for collaborator input.
//!
//! Units are approximate model tokens (one unit per four characters). The
//! estimate only has to be monotonic and stable, not exact.

const CHARS_PER_UNIT: usize = 4;
/// Room reserved for the marker line appended to each shortened section.
const MARKER_RESERVE: usize = 48;

/// Result of fitting text into a budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    pub text: String,
    /// Set whenever anything was cut.
    pub warning: Option<String>,
}

impl Truncation {
    pub fn truncated(&self) -> bool {
        self.warning.is_some()
    }
}

/// Approximate unit count for `text`.
pub fn estimate_units(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_UNIT)
}

/// Fit `text` into `max_units`.
///
/// With `preserve_structure`, every markdown header line survives and section
/// bodies are shortened in proportion to their size. If the headers alone do
/// not fit, falls back to a plain cut at a line boundary.
pub fn truncate(text: &str, max_units: usize, preserve_structure: bool) -> Truncation {
    let before = estimate_units(text);
    if before <= max_units {
        return Truncation {
            text: text.to_string(),
            warning: None,
        };
    }

    let max_chars = max_units * CHARS_PER_UNIT;
    let (out, shortened) = if preserve_structure {
        truncate_sections(text, max_chars).unwrap_or_else(|| (plain_cut(text, max_chars), 1))
    } else {
        (plain_cut(text, max_chars), 1)
    };

    let after = estimate_units(&out);
    Truncation {
        warning: Some(format!(
            "content truncated from ~{before} to ~{after} tokens (limit {max_units}); {shortened} section(s) shortened"
        )),
        text: out,
    }
}

struct Section<'a> {
    header: Option<&'a str>,
    body: Vec<&'a str>,
}

impl Section<'_> {
    fn body_chars(&self) -> usize {
        self.body.iter().map(|l| l.chars().count() + 1).sum()
    }
}

fn split_sections(text: &str) -> Vec<Section<'_>> {
    let mut sections = vec![Section {
        header: None,
        body: Vec::new(),
    }];
    let mut in_fence = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        if !in_fence && line.starts_with('#') {
            sections.push(Section {
                header: Some(line),
                body: Vec::new(),
            });
        } else if let Some(last) = sections.last_mut() {
            last.body.push(line);
        }
    }
    sections
}

fn truncate_sections(text: &str, max_chars: usize) -> Option<(String, usize)> {
    let sections = split_sections(text);
    let header_chars: usize = sections
        .iter()
        .filter_map(|s| s.header)
        .map(|h| h.chars().count() + 1)
        .sum();
    let reserve = header_chars + sections.len() * MARKER_RESERVE;
    if reserve >= max_chars {
        return None;
    }
    let body_budget = max_chars - reserve;
    let total_body: usize = sections.iter().map(Section::body_chars).sum();

    let mut out = String::new();
    let mut shortened = 0usize;
    for section in &sections {
        if let Some(header) = section.header {
            out.push_str(header);
            out.push('\n');
        }
        let chars = section.body_chars();
        let allowance = if total_body == 0 {
            0
        } else {
            body_budget * chars / total_body
        };
        if chars <= allowance {
            for line in &section.body {
                out.push_str(line);
                out.push('\n');
            }
            continue;
        }

        shortened += 1;
        let mut used = 0usize;
        for line in &section.body {
            let len = line.chars().count() + 1;
            if used + len > allowance {
                break;
            }
            out.push_str(line);
            out.push('\n');
            used += len;
        }
        out.push_str(&format!("[... {} chars truncated ...]\n", chars - used));
    }
    Some((out, shortened))
}

fn plain_cut(text: &str, max_chars: usize) -> String {
    let marker = "\n[... truncated ...]\n";
    let keep = max_chars.saturating_sub(marker.len());
    let byte_end = text
        .char_indices()
        .nth(keep)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let head = &text[..byte_end];
    // Prefer a line boundary if one exists in the second half of the kept text.
    let head = match head.rfind('\n') {
        Some(pos) if pos >= head.len() / 2 => &head[..pos],
        _ => head,
    };
    format!("{head}{marker}")
}
