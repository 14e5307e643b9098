//! Run state threaded through every stage, and its merge contract.
//!
//! Stages never replace the state wholesale. They return a [`StateUpdate`]
//! naming only the fields they own, and [`RunState::apply`] overwrites exactly
//! those fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::types::{ContextSnapshot, HumanDecision, PatternReference, Verdict};

/// Canonical record for one run, owned by the engine for the run's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    /// Where the input artifact was read from.
    pub input_path: String,
    /// Source document; set once at Load.
    pub input_artifact: String,
    /// Reference key (file path) to excerpt, populated at Analyze.
    pub context_snapshots: BTreeMap<String, ContextSnapshot>,
    pub pattern_references: Vec<PatternReference>,
    /// Current candidate output, replaced on every Generate.
    pub draft_artifact: String,
    /// Empty means the last validation passed.
    pub validation_issues: Vec<String>,
    pub review_verdict: Option<Verdict>,
    pub review_feedback: String,
    /// Every review and human feedback text, oldest first.
    pub feedback_history: Vec<String>,
    pub human_decision: Option<HumanDecision>,
    /// RFC 3339 time of the approving review.
    pub approved_at: Option<String>,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub human_gate_enabled: bool,
    pub final_artifact_path: Option<String>,
    pub error_message: Option<String>,
}

impl RunState {
    pub fn new(run_id: &str, input_path: &str, max_iterations: u32, human_gate: bool) -> Self {
        Self {
            run_id: run_id.to_string(),
            input_path: input_path.to_string(),
            input_artifact: String::new(),
            context_snapshots: BTreeMap::new(),
            pattern_references: Vec::new(),
            draft_artifact: String::new(),
            validation_issues: Vec::new(),
            review_verdict: None,
            review_feedback: String::new(),
            feedback_history: Vec::new(),
            human_decision: None,
            approved_at: None,
            iteration_count: 0,
            max_iterations,
            human_gate_enabled: human_gate,
            final_artifact_path: None,
            error_message: None,
        }
    }

    pub fn validation_passed(&self) -> bool {
        self.validation_issues.is_empty()
    }

    /// Whether another back-edge is allowed.
    pub fn can_iterate(&self) -> bool {
        self.iteration_count < self.max_iterations
    }

    /// Merge `update` into the state. Returns the names of fields written.
    ///
    /// `input_artifact` is write-once and `iteration_count` never decreases;
    /// updates violating either are dropped.
    pub fn apply(&mut self, update: StateUpdate) -> Vec<&'static str> {
        let mut written = Vec::new();

        if let Some(input) = update.input_artifact {
            if self.input_artifact.is_empty() || self.input_artifact == input {
                self.input_artifact = input;
                written.push("input_artifact");
            } else {
                warn!(run_id = %self.run_id, "ignoring attempt to replace input_artifact");
            }
        }
        if let Some(snapshots) = update.context_snapshots {
            self.context_snapshots = snapshots;
            written.push("context_snapshots");
        }
        if let Some(references) = update.pattern_references {
            self.pattern_references = references;
            written.push("pattern_references");
        }
        if let Some(draft) = update.draft_artifact {
            self.draft_artifact = draft;
            written.push("draft_artifact");
        }
        if let Some(issues) = update.validation_issues {
            self.validation_issues = issues;
            written.push("validation_issues");
        }
        if let Some(verdict) = update.review_verdict {
            self.review_verdict = verdict;
            written.push("review_verdict");
        }
        if let Some(feedback) = update.review_feedback {
            self.review_feedback = feedback;
            written.push("review_feedback");
        }
        if let Some(history) = update.feedback_history {
            self.feedback_history = history;
            written.push("feedback_history");
        }
        if let Some(decision) = update.human_decision {
            self.human_decision = decision;
            written.push("human_decision");
        }
        if let Some(approved_at) = update.approved_at {
            self.approved_at = approved_at;
            written.push("approved_at");
        }
        if let Some(count) = update.iteration_count {
            if count >= self.iteration_count {
                self.iteration_count = count;
                written.push("iteration_count");
            } else {
                warn!(
                    run_id = %self.run_id,
                    current = self.iteration_count,
                    requested = count,
                    "ignoring iteration_count decrement"
                );
            }
        }
        if let Some(path) = update.final_artifact_path {
            self.final_artifact_path = Some(path);
            written.push("final_artifact_path");
        }
        if let Some(error) = update.error_message {
            self.error_message = Some(error);
            written.push("error_message");
        }

        written
    }
}

/// Partial update returned by a stage or by routing.
///
/// `None` leaves the field untouched. Nullable fields use `Option<Option<_>>`
/// so that `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub input_artifact: Option<String>,
    pub context_snapshots: Option<BTreeMap<String, ContextSnapshot>>,
    pub pattern_references: Option<Vec<PatternReference>>,
    pub draft_artifact: Option<String>,
    pub validation_issues: Option<Vec<String>>,
    pub review_verdict: Option<Option<Verdict>>,
    pub review_feedback: Option<String>,
    pub feedback_history: Option<Vec<String>>,
    pub human_decision: Option<Option<HumanDecision>>,
    pub approved_at: Option<Option<String>>,
    pub iteration_count: Option<u32>,
    pub final_artifact_path: Option<String>,
    pub error_message: Option<String>,
}

impl StateUpdate {
    /// Update carrying only an error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Combine two updates; fields set in `later` win.
    pub fn then(self, later: StateUpdate) -> StateUpdate {
        StateUpdate {
            input_artifact: later.input_artifact.or(self.input_artifact),
            context_snapshots: later.context_snapshots.or(self.context_snapshots),
            pattern_references: later.pattern_references.or(self.pattern_references),
            draft_artifact: later.draft_artifact.or(self.draft_artifact),
            validation_issues: later.validation_issues.or(self.validation_issues),
            review_verdict: later.review_verdict.or(self.review_verdict),
            review_feedback: later.review_feedback.or(self.review_feedback),
            feedback_history: later.feedback_history.or(self.feedback_history),
            human_decision: later.human_decision.or(self.human_decision),
            approved_at: later.approved_at.or(self.approved_at),
            iteration_count: later.iteration_count.or(self.iteration_count),
            final_artifact_path: later.final_artifact_path.or(self.final_artifact_path),
            error_message: later.error_message.or(self.error_message),
        }
    }
}
