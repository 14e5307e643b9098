//! Workflow engine: drives one run through the stage graph to a terminal stage.
//!
//! Each stage returns a partial [`StateUpdate`]; the engine merges it,
//! checkpoints `(state, stage)`, then routes. Stage failures never escape as
//! errors. They become `error_message`, which routes to `Aborted`. Only
//! failures of the engine's own bookkeeping (checkpoint or transition log
//! writes) are returned as `Err`, and those leave the last checkpoint intact
//! for `resume`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, info_span, warn};

use crate::core::routing::{Transition, route};
use crate::core::secrets::{scan, summarize};
use crate::core::state::{RunState, StateUpdate};
use crate::core::types::{Stage, Verdict};
use crate::core::validator;
use crate::io::analyze::{WorkspaceExtents, analyze};
use crate::io::checkpoint::CheckpointStore;
use crate::io::collaborators::{DraftRequest, Drafter, HumanGate, ReviewRequest, Reviewer};
use crate::io::config::PipelineConfig;
use crate::io::finalize::{Finalizer, RunMetadata};
use crate::io::input::{derive_run_id, read_input};
use crate::io::paths::{StatePaths, validate_id};
use crate::io::retry::{RetryPolicy, with_retry};
use crate::io::timestamp;
use crate::io::transitions::{TransitionRecord, append_transition};
use crate::review_gate::{GateConfig, run_review_gate};

/// Parameters for a fresh run. `None` fields fall back to config.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub input_path: PathBuf,
    pub run_id: Option<String>,
    pub max_iterations: Option<u32>,
    pub human_gate: Option<bool>,
}

/// How `run` or `resume` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Finalized {
        run_id: String,
        path: PathBuf,
        iterations: u32,
    },
    Aborted {
        run_id: String,
        error: String,
        /// Most recent review or human feedback, if any was given.
        last_feedback: Option<String>,
    },
    /// The human gate has no decision yet; `resume` once one is recorded.
    AwaitingHuman { run_id: String, iterations: u32 },
}

impl RunOutcome {
    pub fn run_id(&self) -> &str {
        match self {
            RunOutcome::Finalized { run_id, .. }
            | RunOutcome::Aborted { run_id, .. }
            | RunOutcome::AwaitingHuman { run_id, .. } => run_id,
        }
    }

    /// Outcome recorded by a terminal checkpoint.
    pub fn from_terminal(state: &RunState, stage: Stage) -> Option<Self> {
        match stage {
            Stage::Finalized => Some(RunOutcome::Finalized {
                run_id: state.run_id.clone(),
                path: PathBuf::from(state.final_artifact_path.clone().unwrap_or_default()),
                iterations: state.iteration_count,
            }),
            Stage::Aborted => Some(RunOutcome::Aborted {
                run_id: state.run_id.clone(),
                error: state
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "aborted".to_string()),
                last_feedback: last_feedback(state),
            }),
            _ => None,
        }
    }
}

fn last_feedback(state: &RunState) -> Option<String> {
    state
        .feedback_history
        .last()
        .filter(|text| !text.trim().is_empty())
        .or_else(|| Some(&state.review_feedback).filter(|text| !text.trim().is_empty()))
        .cloned()
}

/// Result of executing one stage and routing from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Stage update combined with the routing update, and the next stage.
    Next { update: StateUpdate, next: Stage },
    /// The stage is waiting on outside input; nothing changed.
    Suspended,
}

enum StageResult {
    Done(StateUpdate),
    Suspend,
}

pub struct Engine<D, R, H> {
    paths: StatePaths,
    config: PipelineConfig,
    drafter: D,
    reviewer: R,
    gate: H,
    store: CheckpointStore,
    finalizer: Finalizer,
    retry: RetryPolicy,
}

impl<D: Drafter, R: Reviewer, H: HumanGate> Engine<D, R, H> {
    pub fn new(paths: StatePaths, config: PipelineConfig, drafter: D, reviewer: R, gate: H) -> Self {
        Self {
            store: CheckpointStore::new(&paths),
            finalizer: Finalizer::new(&paths, &config),
            retry: RetryPolicy::from_config(&config.retry),
            paths,
            config,
            drafter,
            reviewer,
            gate,
        }
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    /// Start a fresh run and drive it until it terminates or suspends.
    ///
    /// A run id with a finished checkpoint starts over, with the old run's
    /// files moved to `previous/`; one with an unfinished checkpoint must be
    /// resumed instead.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        let run_id = match &request.run_id {
            Some(id) => id.clone(),
            None => derive_run_id(&self.resolve(&request.input_path)).ok_or_else(|| {
                anyhow!(
                    "cannot derive a run id from {}; pass --run-id",
                    request.input_path.display()
                )
            })?,
        };
        validate_id(&run_id).with_context(|| format!("invalid run id '{run_id}'"))?;
        if let Some(existing) = self.store.load(&run_id)? {
            if !existing.stage.is_terminal() {
                bail!(
                    "run '{run_id}' is in progress (last completed stage: {}); use `draftloop resume {run_id}`",
                    existing.stage
                );
            }
            if let Some(archive) = self.store.archive(&run_id)? {
                info!(run_id = %run_id, archive = %archive.display(), "archived finished run");
            }
        }

        let state = RunState::new(
            &run_id,
            &request.input_path.display().to_string(),
            request.max_iterations.unwrap_or(self.config.max_iterations),
            request.human_gate.unwrap_or(self.config.human_gate),
        );
        info!(
            run_id = %run_id,
            input = %request.input_path.display(),
            max_iterations = state.max_iterations,
            human_gate = state.human_gate_enabled,
            "starting run"
        );
        self.drive(state, None)
    }

    /// Continue a run from its last checkpoint.
    ///
    /// Routing is re-derived from the checkpointed stage, so stages that
    /// completed before the interruption are not repeated. A terminal
    /// checkpoint returns its recorded outcome without running anything.
    pub fn resume(&self, run_id: &str) -> Result<RunOutcome> {
        let checkpoint = self
            .store
            .load(run_id)?
            .ok_or_else(|| anyhow!("no checkpoint for run '{run_id}'"))?;
        info!(run_id, stage = %checkpoint.stage, "resuming run");
        self.drive(checkpoint.state, Some(checkpoint.stage))
    }

    /// Execute `stage` against `state` and route from the result, without
    /// checkpointing or logging a transition.
    pub fn advance(&self, state: &RunState, stage: Stage) -> Advance {
        match self.execute(stage, state) {
            StageResult::Suspend => Advance::Suspended,
            StageResult::Done(update) => {
                let mut scratch = state.clone();
                scratch.apply(update.clone());
                let Transition {
                    next,
                    update: routed,
                } = route(stage, &scratch);
                Advance::Next {
                    update: update.then(routed),
                    next,
                }
            }
        }
    }

    fn drive(&self, mut state: RunState, completed: Option<Stage>) -> Result<RunOutcome> {
        let mut stage = match completed {
            None => Stage::Load,
            Some(done) => {
                if let Some(outcome) = RunOutcome::from_terminal(&state, done) {
                    return Ok(outcome);
                }
                if done == Stage::HumanGate {
                    self.acknowledge_decision(&state)?;
                }
                self.transition(&mut state, done)?
            }
        };

        loop {
            if let Some(outcome) = RunOutcome::from_terminal(&state, stage) {
                self.store.save(&state.run_id, &state, stage)?;
                match &outcome {
                    RunOutcome::Aborted { error, .. } => {
                        warn!(run_id = %state.run_id, iteration_count = state.iteration_count, error = %error, "run aborted");
                    }
                    _ => info!(run_id = %state.run_id, iteration_count = state.iteration_count, "run finalized"),
                }
                return Ok(outcome);
            }

            match self.execute(stage, &state) {
                StageResult::Suspend => {
                    info!(run_id = %state.run_id, "run suspended awaiting human decision");
                    return Ok(RunOutcome::AwaitingHuman {
                        run_id: state.run_id.clone(),
                        iterations: state.iteration_count,
                    });
                }
                StageResult::Done(update) => {
                    let written = state.apply(update);
                    debug!(run_id = %state.run_id, %stage, ?written, "stage update merged");
                    self.store.save(&state.run_id, &state, stage)?;
                    if stage == Stage::HumanGate {
                        self.acknowledge_decision(&state)?;
                    }
                    stage = self.transition(&mut state, stage)?;
                }
            }
        }
    }

    /// Route from `completed`, apply routing bookkeeping, and log the edge.
    fn transition(&self, state: &mut RunState, completed: Stage) -> Result<Stage> {
        let transition = route(completed, state);
        let back_edge = transition.is_back_edge();
        let next = transition.next;
        state.apply(transition.update);

        append_transition(
            &self.paths.run(&state.run_id).transitions_path,
            &TransitionRecord {
                run_id: state.run_id.clone(),
                from: completed,
                to: next,
                iteration_count: state.iteration_count,
                at: timestamp(),
            },
        )?;
        info!(
            run_id = %state.run_id,
            from = %completed,
            to = %next,
            iteration_count = state.iteration_count,
            back_edge,
            "transition"
        );
        Ok(next)
    }

    fn execute(&self, stage: Stage, state: &RunState) -> StageResult {
        let _span = info_span!("stage", run_id = %state.run_id, %stage).entered();
        match stage {
            Stage::Load => StageResult::Done(self.load(state)),
            Stage::Analyze => StageResult::Done(self.analyze(state)),
            Stage::Generate => StageResult::Done(self.generate(state)),
            Stage::Validate => StageResult::Done(self.validate(state)),
            Stage::HumanGate => self.human_gate(state),
            Stage::Review => StageResult::Done(self.review(state)),
            Stage::Finalize => StageResult::Done(self.finalize(state)),
            Stage::Finalized | Stage::Aborted => StageResult::Done(StateUpdate::default()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.paths.root.join(path)
        }
    }

    /// Read the input and refuse anything that must not reach a collaborator.
    fn load(&self, state: &RunState) -> StateUpdate {
        let input = match read_input(&self.resolve(Path::new(&state.input_path))) {
            Ok(input) => input,
            Err(err) => return StateUpdate::error(format!("cannot load input artifact: {err:#}")),
        };
        if input.contents.trim().is_empty() {
            return StateUpdate::error(format!("input artifact {} is empty", state.input_path));
        }
        if let Some(reason) = input.ineligibility(self.config.require_approved_input) {
            return StateUpdate::error(reason);
        }
        let findings = scan(&input.contents);
        if !findings.is_empty() {
            return StateUpdate::error(format!(
                "input artifact contains secrets: {}",
                summarize(&findings)
            ));
        }
        StateUpdate {
            input_artifact: Some(input.contents),
            ..StateUpdate::default()
        }
    }

    fn analyze(&self, state: &RunState) -> StateUpdate {
        match analyze(
            &self.paths.root,
            &state.input_artifact,
            self.config.max_excerpt_lines,
        ) {
            Ok(analysis) => StateUpdate {
                context_snapshots: Some(analysis.context_snapshots),
                pattern_references: Some(analysis.pattern_references),
                ..StateUpdate::default()
            },
            Err(err) => StateUpdate::error(format!("analysis failed: {err:#}")),
        }
    }

    fn generate(&self, state: &RunState) -> StateUpdate {
        let request = DraftRequest::from_state(state);
        let result = with_retry(&self.retry, |attempt| {
            info!(attempt, iteration = state.iteration_count, "requesting draft");
            self.drafter.generate(&request)
        });
        match result {
            Ok(draft) if draft.trim().is_empty() => {
                StateUpdate::error("drafter returned an empty draft")
            }
            Ok(draft) => StateUpdate {
                draft_artifact: Some(draft),
                ..StateUpdate::default()
            },
            Err(err) => StateUpdate::error(format!("generate failed: {err}")),
        }
    }

    /// Run the mechanical checks. Clears any verdict or human decision left
    /// over from the previous pass.
    fn validate(&self, state: &RunState) -> StateUpdate {
        let extents = WorkspaceExtents::new(self.paths.root.clone());
        let results = validator::validate(
            &state.draft_artifact,
            &state.context_snapshots,
            &state.pattern_references,
            &extents,
            &self.config.validator,
        );
        let issues = validator::issues(&results);
        if let Err(err) = write_checks(&self.paths.run(&state.run_id).checks_path, &results) {
            warn!(err = %format!("{err:#}"), "failed to write check results");
        }
        info!(
            passed = issues.is_empty(),
            issues = issues.len(),
            "validation complete"
        );
        StateUpdate {
            validation_issues: Some(issues),
            review_verdict: Some(None),
            human_decision: Some(None),
            ..StateUpdate::default()
        }
    }

    fn human_gate(&self, state: &RunState) -> StageResult {
        match self.gate.decide(state) {
            Ok(Some(decision)) => StageResult::Done(StateUpdate {
                human_decision: Some(Some(decision)),
                ..StateUpdate::default()
            }),
            Ok(None) => StageResult::Suspend,
            Err(err) => StageResult::Done(StateUpdate::error(format!("human gate failed: {err:#}"))),
        }
    }

    /// Tell the gate its decision is durable so it is not offered again.
    fn acknowledge_decision(&self, state: &RunState) -> Result<()> {
        if state.human_decision.is_none() {
            return Ok(());
        }
        self.gate
            .acknowledge(state)
            .with_context(|| format!("acknowledge human decision for run '{}'", state.run_id))
    }

    fn review(&self, state: &RunState) -> StateUpdate {
        let config = GateConfig {
            max_units: self.config.max_input_tokens,
            retry: self.retry,
        };
        let outcome = match run_review_gate(&ReviewRequest::from_state(state), &self.reviewer, &config) {
            Ok(outcome) => outcome,
            Err(err) => return StateUpdate::error(format!("review failed: {err}")),
        };
        let (verdict, feedback) = outcome.into_verdict();
        info!(%verdict, "review complete");

        let mut update = StateUpdate {
            review_verdict: Some(Some(verdict)),
            review_feedback: Some(feedback.clone()),
            ..StateUpdate::default()
        };
        if !feedback.trim().is_empty() {
            let mut history = state.feedback_history.clone();
            history.push(feedback);
            update.feedback_history = Some(history);
        }
        if verdict == Verdict::Approved {
            update.approved_at = Some(Some(timestamp()));
        }
        update
    }

    fn finalize(&self, state: &RunState) -> StateUpdate {
        let metadata = RunMetadata {
            run_id: &state.run_id,
            approved_at: state.approved_at.as_deref(),
        };
        match self.finalizer.finalize(
            &state.draft_artifact,
            state.review_verdict,
            state.iteration_count,
            &metadata,
        ) {
            Ok(path) => StateUpdate {
                final_artifact_path: Some(path.display().to_string()),
                ..StateUpdate::default()
            },
            Err(err) => StateUpdate::error(format!("finalize refused: {err}")),
        }
    }
}

fn write_checks(path: &Path, results: &[crate::core::types::CheckResult]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(results).context("serialize check results")?;
    buf.push('\n');
    std::fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
