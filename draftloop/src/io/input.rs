//! Reading the input artifact and its YAML-ish frontmatter.
//!
//! Only flat `key: value` pairs are understood. That is enough for the keys
//! the pipeline cares about (`id`, `status`) without a YAML dependency.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Input document split into frontmatter and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputArtifact {
    /// Full file contents, frontmatter included.
    pub contents: String,
    pub frontmatter: BTreeMap<String, String>,
    pub body: String,
}

impl InputArtifact {
    pub fn parse(contents: &str) -> Self {
        let (frontmatter, body) = match split_frontmatter(contents) {
            Some((frontmatter, rest)) => (parse_frontmatter(frontmatter), rest),
            None => (BTreeMap::new(), contents),
        };
        Self {
            contents: contents.to_string(),
            frontmatter,
            body: body.to_string(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.frontmatter.get("id").map(String::as_str)
    }

    pub fn status(&self) -> Option<&str> {
        self.frontmatter.get("status").map(String::as_str)
    }

    /// Reason the input may not enter the pipeline, if any.
    pub fn ineligibility(&self, require_approved: bool) -> Option<String> {
        if !require_approved {
            return None;
        }
        match self.status() {
            Some(status) if status.eq_ignore_ascii_case("approved") => None,
            Some(status) => Some(format!(
                "input artifact status is '{status}'; expected 'approved'"
            )),
            None => Some("input artifact has no status; expected 'approved'".to_string()),
        }
    }
}

pub fn read_input(path: &Path) -> Result<InputArtifact> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read input {}", path.display()))?;
    Ok(InputArtifact::parse(&contents))
}

/// Run identity for an input: frontmatter `id` if present, otherwise the
/// file stem. Deterministic, so re-running the same input reuses its
/// partition and output name.
pub fn derive_run_id(path: &Path) -> Option<String> {
    if let Ok(input) = read_input(path)
        && let Some(id) = input.id()
    {
        return Some(id.to_string());
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

fn parse_frontmatter(frontmatter: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in frontmatter.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once(':') else {
            continue;
        };
        let value = unquote(value.trim());
        if value.is_empty() {
            continue;
        }
        map.entry(key.trim().to_string())
            .or_insert_with(|| value.to_string());
    }
    map
}

fn unquote(value: &str) -> &str {
    let quoted = (value.starts_with('"') && value.ends_with('"'))
        || (value.starts_with('\'') && value.ends_with('\''));
    if quoted && value.len() >= 2 {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Split a document into (frontmatter, rest). Returns None if it doesn't look like frontmatter.
fn split_frontmatter(contents: &str) -> Option<(&str, &str)> {
    let after = contents.strip_prefix("---\n")?;
    let end = after.find("\n---\n")?;
    Some((&after[..end], &after[end + 5..]))
}
