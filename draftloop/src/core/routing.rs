//! Transition function for the pipeline state machine.
//!
//! Routing is pure: given the stage that just completed and the state it left
//! behind, it always selects the same next stage and the same bookkeeping
//! update. Resume relies on this to re-derive the transition from a
//! checkpoint.
//!
//! ```text
//! Load → Analyze → Generate → Validate ─┬─ pass ─→ HumanGate? → Review ─┬─ APPROVED → Finalize → Finalized
//!                     ↑                 │                               ├─ REVISE ───┐
//!                     └── back-edge ────┴─ issues ←─────────────────────┘            │
//!                     └──────────────────────────────────────────────────────────────┘
//! any stage with error_message → Aborted; BLOCKED → Aborted
//! ```

use crate::core::state::{RunState, StateUpdate};
use crate::core::types::{HumanDecision, Stage, Verdict};

pub const VALIDATION_LIMIT_MESSAGE: &str = "iteration limit exceeded during validation";
pub const HUMAN_LIMIT_MESSAGE: &str = "iteration limit exceeded during human review";

/// Next stage plus the routing-owned part of the state update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Stage,
    pub update: StateUpdate,
}

impl Transition {
    fn to(next: Stage) -> Self {
        Self {
            next,
            update: StateUpdate::default(),
        }
    }

    fn abort(message: impl Into<String>) -> Self {
        Self {
            next: Stage::Aborted,
            update: StateUpdate::error(message),
        }
    }

    fn back_edge(state: &RunState, update: StateUpdate) -> Self {
        Self {
            next: Stage::Generate,
            update: update.then(StateUpdate {
                iteration_count: Some(state.iteration_count + 1),
                ..StateUpdate::default()
            }),
        }
    }

    pub fn is_back_edge(&self) -> bool {
        self.next == Stage::Generate && self.update.iteration_count.is_some()
    }
}

/// Select the stage that follows `completed`.
pub fn route(completed: Stage, state: &RunState) -> Transition {
    if completed.is_terminal() {
        return Transition::to(completed);
    }
    // Stage-local failures are recorded as error_message; they always abort.
    if state.error_message.is_some() {
        return Transition::to(Stage::Aborted);
    }

    match completed {
        Stage::Load => Transition::to(Stage::Analyze),
        Stage::Analyze => Transition::to(Stage::Generate),
        Stage::Generate => Transition::to(Stage::Validate),
        Stage::Validate => route_after_validate(state),
        Stage::HumanGate => route_after_human_gate(state),
        Stage::Review => route_after_review(state),
        Stage::Finalize => {
            if state.final_artifact_path.is_some() {
                Transition::to(Stage::Finalized)
            } else {
                Transition::abort("finalize completed without writing an artifact")
            }
        }
        Stage::Finalized | Stage::Aborted => Transition::to(completed),
    }
}

fn route_after_validate(state: &RunState) -> Transition {
    if state.validation_passed() {
        return if state.human_gate_enabled {
            Transition::to(Stage::HumanGate)
        } else {
            Transition::to(Stage::Review)
        };
    }
    if !state.can_iterate() {
        let mut message = VALIDATION_LIMIT_MESSAGE.to_string();
        for issue in &state.validation_issues {
            message.push_str("\n- ");
            message.push_str(issue);
        }
        return Transition::abort(message);
    }
    // Issues stay in state as generation guidance; stale review feedback does not.
    Transition::back_edge(
        state,
        StateUpdate {
            review_feedback: Some(String::new()),
            ..StateUpdate::default()
        },
    )
}

fn route_after_human_gate(state: &RunState) -> Transition {
    match &state.human_decision {
        None => Transition::abort("human gate completed without a decision"),
        Some(HumanDecision::Proceed) => Transition::to(Stage::Review),
        Some(HumanDecision::Revise { feedback }) => {
            if !state.can_iterate() {
                return Transition::abort(HUMAN_LIMIT_MESSAGE);
            }
            let mut update = StateUpdate {
                review_feedback: Some(feedback.clone()),
                ..StateUpdate::default()
            };
            if !feedback.trim().is_empty() {
                let mut history = state.feedback_history.clone();
                history.push(feedback.clone());
                update.feedback_history = Some(history);
            }
            Transition::back_edge(state, update)
        }
        Some(HumanDecision::Abort { reason }) => {
            let reason = reason.trim();
            if reason.is_empty() {
                Transition::abort("aborted at human gate")
            } else {
                Transition::abort(format!("aborted at human gate: {reason}"))
            }
        }
    }
}

fn route_after_review(state: &RunState) -> Transition {
    match state.review_verdict {
        None => Transition::abort("review completed without a verdict"),
        Some(Verdict::Approved) => Transition::to(Stage::Finalize),
        Some(Verdict::Revise) => {
            if state.can_iterate() {
                Transition::back_edge(state, StateUpdate::default())
            } else {
                Transition::abort(accumulated_feedback(state))
            }
        }
        Some(Verdict::Blocked) => {
            let feedback = state.review_feedback.trim();
            if feedback.is_empty() {
                Transition::abort("review blocked the draft")
            } else {
                Transition::abort(format!("review blocked the draft: {feedback}"))
            }
        }
    }
}

fn accumulated_feedback(state: &RunState) -> String {
    let mut message = format!(
        "review still requested revisions after {} iteration(s)",
        state.iteration_count
    );
    if state.feedback_history.is_empty() {
        return message;
    }
    message.push_str("; accumulated feedback:");
    for (idx, feedback) in state.feedback_history.iter().enumerate() {
        message.push_str(&format!("\n\n[{}] {}", idx + 1, feedback.trim()));
    }
    message
}
