//! Mechanical completeness checks run before the (slow, costly) review.
//!
//! Each check is independent, local, and fast. A check with nothing to check
//! passes vacuously: drafts are never blocked for lacking content they were
//! not required to contain. The aggregate issue list is the `details` of
//! every failed check, in check order.

mod coverage;
mod document;
mod references;
mod specificity;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use document::{Document, Fence};
pub use specificity::{Signals, count_signals, required_signals};

use crate::core::types::{CheckResult, ContextSnapshot, PatternReference};

pub const EXCERPT_COVERAGE: &str = "excerpt_coverage";
pub const CONCRETE_EXAMPLES: &str = "concrete_examples";
pub const IO_EXAMPLES: &str = "io_examples";
pub const SPECIFICITY: &str = "specificity";
pub const REFERENCE_VALIDITY: &str = "reference_validity";

/// Thresholds for the completeness checks (`[validator]` in `config.toml`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Max distance in lines between a file mention and its fenced excerpt.
    pub excerpt_window_lines: usize,
    /// Lines after a data definition searched for a serialized example.
    pub example_window_lines: usize,
    /// Lines after an operation mention searched for input/output values.
    pub io_window_lines: usize,
    /// Minimum specificity signals for any draft.
    pub specificity_floor: usize,
    /// One additional signal required per this many characters.
    pub specificity_scale: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            excerpt_window_lines: 40,
            example_window_lines: 60,
            io_window_lines: 25,
            specificity_floor: 3,
            specificity_scale: 2000,
        }
    }
}

impl ValidatorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.excerpt_window_lines == 0
            || self.example_window_lines == 0
            || self.io_window_lines == 0
        {
            anyhow::bail!("validator windows must be > 0");
        }
        if self.specificity_scale == 0 {
            anyhow::bail!("validator.specificity_scale must be > 0");
        }
        Ok(())
    }
}

/// Real extent (line count) of referenced locations.
///
/// Kept as a trait so the checks stay free of filesystem access.
pub trait SourceExtents {
    /// Number of lines at `location`, or `None` if it does not exist.
    fn line_count(&self, location: &str) -> Option<usize>;
}

impl SourceExtents for BTreeMap<String, usize> {
    fn line_count(&self, location: &str) -> Option<usize> {
        self.get(location).copied()
    }
}

impl SourceExtents for HashMap<String, usize> {
    fn line_count(&self, location: &str) -> Option<usize> {
        self.get(location).copied()
    }
}

/// Run every check against `draft`, in a fixed order.
pub fn validate(
    draft: &str,
    context_snapshots: &BTreeMap<String, ContextSnapshot>,
    pattern_references: &[PatternReference],
    extents: &dyn SourceExtents,
    config: &ValidatorConfig,
) -> Vec<CheckResult> {
    let doc = Document::parse(draft);
    let results = vec![
        coverage::excerpt_coverage(&doc, context_snapshots, config),
        coverage::concrete_examples(&doc, config),
        coverage::io_examples(&doc, config),
        specificity::specificity(&doc, config),
        references::reference_validity(draft, pattern_references, extents),
    ];
    for result in &results {
        debug!(check = %result.name, passed = result.passed, "validator check");
    }
    results
}

/// Details of every failed check; empty means the draft passed.
pub fn issues(results: &[CheckResult]) -> Vec<String> {
    results
        .iter()
        .filter(|result| !result.passed)
        .map(|result| result.details.clone())
        .collect()
}
