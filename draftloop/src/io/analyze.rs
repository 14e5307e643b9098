//! Analyze stage: resolve the files an input artifact points at.
//!
//! Inputs list their references as bullets:
//!
//! ```text
//! - modify: src/cart.rs
//! - create: src/discount.rs
//! - read: docs/pricing.md
//! - pattern: src/orders.rs:10-40 existing total computation
//! ```
//!
//! `modify` and `read` targets must exist and are captured as excerpts;
//! `create` targets are recorded with an empty excerpt. `pattern` bullets
//! become pattern references with a line range (the whole file if omitted).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use tracing::{debug, warn};

use crate::core::types::{ContextSnapshot, LineRange, PatternReference, ReferenceKind};
use crate::core::validator::SourceExtents;

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*[-*]\s+(modify|create|read|pattern)\s*:\s*`?([^\s`:]+)(?::(\d+)(?:-(\d+))?)?`?(?:\s+(.*?))?\s*$",
    )
    .unwrap()
});

/// A reference bullet as written in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceSpec {
    Snapshot {
        kind: ReferenceKind,
        location: String,
    },
    Pattern {
        location: String,
        range: Option<LineRange>,
        relevance: String,
    },
}

impl ReferenceSpec {
    fn location(&self) -> &str {
        match self {
            ReferenceSpec::Snapshot { location, .. } | ReferenceSpec::Pattern { location, .. } => {
                location
            }
        }
    }
}

/// Everything Analyze contributes to the run state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analysis {
    pub context_snapshots: BTreeMap<String, ContextSnapshot>,
    pub pattern_references: Vec<PatternReference>,
}

/// Parse every reference bullet in `input`, in document order.
pub fn parse_references(input: &str) -> Vec<ReferenceSpec> {
    let mut in_fence = false;
    let mut specs = Vec::new();
    for line in input.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let Some(caps) = REFERENCE_RE.captures(line) else {
            continue;
        };
        let location = caps[2].to_string();
        let spec = match caps[1].to_ascii_lowercase().as_str() {
            "modify" => ReferenceSpec::Snapshot {
                kind: ReferenceKind::Modify,
                location,
            },
            "create" => ReferenceSpec::Snapshot {
                kind: ReferenceKind::Create,
                location,
            },
            "read" => ReferenceSpec::Snapshot {
                kind: ReferenceKind::Read,
                location,
            },
            _ => {
                let start = caps.get(3).and_then(|m| m.as_str().parse().ok());
                let end = caps.get(4).and_then(|m| m.as_str().parse().ok()).or(start);
                let range = start.zip(end).map(|(start, end)| LineRange::new(start, end));
                let relevance = caps
                    .get(5)
                    .map(|m| m.as_str().trim_start_matches(['-', '—', '–', ':', ' ']))
                    .unwrap_or_default()
                    .to_string();
                ReferenceSpec::Pattern {
                    location,
                    range,
                    relevance,
                }
            }
        };
        specs.push(spec);
    }
    specs
}

/// Resolve the references in `input` against the workspace at `root`.
///
/// Files are read concurrently; results keep document order.
pub fn analyze(root: &Path, input: &str, max_excerpt_lines: usize) -> Result<Analysis> {
    let specs = parse_references(input);
    let workspace = WorkspaceExtents::new(root);

    let contents: Vec<Result<Option<String>>> = thread::scope(|scope| {
        let handles: Vec<_> = specs
            .iter()
            .map(|spec| {
                let workspace = &workspace;
                scope.spawn(move || workspace.read(spec.location()))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("reference reader thread panicked")))
            })
            .collect()
    });

    let mut analysis = Analysis::default();
    for (spec, content) in specs.into_iter().zip(contents) {
        let content = content?;
        match spec {
            ReferenceSpec::Snapshot { kind, location } => {
                if analysis.context_snapshots.contains_key(&location) {
                    warn!(location = %location, "duplicate reference ignored");
                    continue;
                }
                let excerpt = match (kind, content) {
                    (ReferenceKind::Create, _) => String::new(),
                    (_, Some(text)) => excerpt(&text, max_excerpt_lines),
                    (_, None) => bail!(
                        "referenced file for {} does not exist: {location}",
                        kind.as_str()
                    ),
                };
                analysis
                    .context_snapshots
                    .insert(location, ContextSnapshot { kind, excerpt });
            }
            ReferenceSpec::Pattern {
                location,
                range,
                relevance,
            } => {
                let Some(text) = content else {
                    warn!(location = %location, "pattern reference does not exist; skipping");
                    continue;
                };
                let line_count = count_lines(&text);
                let Some(range) = clamp_range(range, line_count) else {
                    warn!(
                        location = %location,
                        line_count,
                        "pattern range lies outside the file; skipping"
                    );
                    continue;
                };
                analysis.pattern_references.push(PatternReference {
                    location,
                    range,
                    relevance,
                });
            }
        }
    }
    debug!(
        snapshots = analysis.context_snapshots.len(),
        references = analysis.pattern_references.len(),
        "analysis complete"
    );
    Ok(analysis)
}

/// Line count as the validator sees it.
fn count_lines(text: &str) -> usize {
    text.lines().count()
}

/// Fit `range` inside a file of `line_count` lines; a missing range covers
/// the whole file. `None` when nothing of the range is left.
fn clamp_range(range: Option<LineRange>, line_count: usize) -> Option<LineRange> {
    let range = range.unwrap_or(LineRange::new(1, line_count));
    let start = range.start.max(1);
    let end = range.end.min(line_count);
    (start <= end).then(|| LineRange::new(start, end))
}

fn excerpt(text: &str, max_lines: usize) -> String {
    let total = text.lines().count();
    if total <= max_lines {
        return text.to_string();
    }
    let mut kept = text.lines().take(max_lines).collect::<Vec<_>>().join("\n");
    kept.push_str(&format!("\n[... {} more lines]\n", total - max_lines));
    kept
}

/// Reference locations resolved relative to a workspace root.
///
/// Locations that are absolute or climb out of the root never resolve.
#[derive(Debug, Clone)]
pub struct WorkspaceExtents {
    root: PathBuf,
}

impl WorkspaceExtents {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, location: &str) -> Option<PathBuf> {
        let relative = Path::new(location);
        let contained = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        contained.then(|| self.root.join(relative))
    }

    /// Contents of `location`, `None` if it does not exist.
    fn read(&self, location: &str) -> Result<Option<String>> {
        let path = self
            .resolve(location)
            .ok_or_else(|| anyhow!("reference escapes the workspace: {location}"))?;
        if !path.is_file() {
            return Ok(None);
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(Some(text))
    }
}

impl SourceExtents for WorkspaceExtents {
    fn line_count(&self, location: &str) -> Option<usize> {
        let path = self.resolve(location)?;
        let text = fs::read_to_string(path).ok()?;
        Some(count_lines(&text))
    }
}
