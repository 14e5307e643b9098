//! Shared deterministic types for the pipeline core.
//!
//! These types define stable contracts between core components and the
//! persisted checkpoint format. They must not depend on I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Named unit of work in the pipeline.
///
/// Every run starts at `Load` and ends at exactly one of `Finalized` or
/// `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Read the input artifact and check its eligibility.
    Load,
    /// Collect excerpts and pattern references named by the input.
    Analyze,
    /// Ask the drafter for a new candidate artifact.
    Generate,
    /// Run the mechanical completeness checks.
    Validate,
    /// Wait for a human proceed/revise/abort decision.
    HumanGate,
    /// Ask the reviewer for a verdict.
    Review,
    /// Write the approved artifact.
    Finalize,
    /// Terminal: artifact written.
    Finalized,
    /// Terminal: error recorded, nothing written.
    Aborted,
}

impl Stage {
    /// Whether this is a terminal stage (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Aborted)
    }

    /// Whether the stage calls an external collaborator (and may therefore wait).
    pub fn is_wait_point(self) -> bool {
        matches!(self, Self::Generate | Self::HumanGate | Self::Review)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Analyze => "analyze",
            Self::Generate => "generate",
            Self::Validate => "validate",
            Self::HumanGate => "human_gate",
            Self::Review => "review",
            Self::Finalize => "finalize",
            Self::Finalized => "finalized",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state outcome of an external review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Approved,
    Revise,
    Blocked,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "APPROVED",
            Self::Revise => "REVISE",
            Self::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision recorded at the human gate.
///
/// Feedback text is opaque: it is forwarded to the drafter verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum HumanDecision {
    Proceed,
    Revise {
        #[serde(default)]
        feedback: String,
    },
    Abort {
        #[serde(default)]
        reason: String,
    },
}

/// How the input artifact intends to use a referenced file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    /// Existing file the output must change; the draft has to show its content.
    Modify,
    /// New file the output introduces.
    Create,
    /// Supporting context only.
    Read,
}

impl ReferenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Modify => "modify",
            Self::Create => "create",
            Self::Read => "read",
        }
    }
}

/// Excerpt captured at Analyze for one referenced file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub kind: ReferenceKind,
    pub excerpt: String,
}

/// Inclusive, 1-indexed line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Supporting example found during Analyze.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternReference {
    pub location: String,
    pub range: LineRange,
    pub relevance: String,
}

/// Result of one mechanical completeness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub details: String,
}

impl CheckResult {
    pub fn pass(name: &str) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            details: String::new(),
        }
    }

    pub fn fail(name: &str, details: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            details: details.into(),
        }
    }
}
