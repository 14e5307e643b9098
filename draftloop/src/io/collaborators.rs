//! External collaborators: the drafter, the reviewer, and the human gate.
//!
//! The engine only sees these traits. Production implementations spawn a
//! configured command; tests use scripted implementations from
//! `test_support` that return queued responses without spawning anything.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, instrument};

use crate::core::state::RunState;
use crate::core::types::{ContextSnapshot, HumanDecision, PatternReference, Verdict};
use crate::core::verdict::{VerdictSource, decode_verdict, feedback_body};
use crate::io::config::{CommandConfig, PipelineConfig};
use crate::io::process::{spawn_piped, wait_with_timeout};
use crate::io::prompt::PromptBuilder;

/// Failure of a collaborator call, classified for retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Worth retrying: the collaborator was unavailable, slow, or crashed.
    #[error("{collaborator} unavailable: {message}")]
    Transient {
        collaborator: &'static str,
        message: String,
    },
    /// Retrying cannot help (missing binary, unusable response).
    #[error("{collaborator} failed: {message}")]
    Fatal {
        collaborator: &'static str,
        message: String,
    },
}

impl CollaboratorError {
    pub fn transient(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            collaborator,
            message: message.into(),
        }
    }

    pub fn fatal(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Fatal {
            collaborator,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Everything the drafter sees for one Generate.
#[derive(Debug, Clone, Copy)]
pub struct DraftRequest<'a> {
    pub run_id: &'a str,
    pub input_artifact: &'a str,
    pub context_snapshots: &'a BTreeMap<String, ContextSnapshot>,
    pub pattern_references: &'a [PatternReference],
    /// Previous draft, absent on the first pass.
    pub prior_draft: Option<&'a str>,
    /// Latest review or human feedback to address.
    pub feedback: Option<&'a str>,
    /// Mechanical validation issues from the previous pass.
    pub validation_issues: &'a [String],
    pub iteration: u32,
}

impl<'a> DraftRequest<'a> {
    pub fn from_state(state: &'a RunState) -> Self {
        let non_empty = |text: &'a str| (!text.trim().is_empty()).then_some(text);
        Self {
            run_id: &state.run_id,
            input_artifact: &state.input_artifact,
            context_snapshots: &state.context_snapshots,
            pattern_references: &state.pattern_references,
            prior_draft: non_empty(&state.draft_artifact),
            feedback: non_empty(&state.review_feedback),
            validation_issues: &state.validation_issues,
            iteration: state.iteration_count,
        }
    }
}

/// Everything the reviewer sees for one Review.
#[derive(Debug, Clone)]
pub struct ReviewRequest<'a> {
    pub run_id: &'a str,
    pub input_artifact: &'a str,
    pub draft: &'a str,
    pub iteration: u32,
    /// Set when the material was cut to fit the budget.
    pub truncation_warning: Option<String>,
}

impl<'a> ReviewRequest<'a> {
    pub fn from_state(state: &'a RunState) -> Self {
        Self {
            run_id: &state.run_id,
            input_artifact: &state.input_artifact,
            draft: &state.draft_artifact,
            iteration: state.iteration_count,
            truncation_warning: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub verdict: Verdict,
    pub feedback: String,
}

impl Review {
    /// Decode free-form reviewer output. Undecodable output is BLOCKED.
    pub fn parse(text: &str) -> Self {
        let decoded = decode_verdict(text);
        if decoded.source == VerdictSource::Fallback {
            info!("reviewer output had no verdict; treating as BLOCKED");
        }
        Self {
            verdict: decoded.verdict,
            feedback: feedback_body(text),
        }
    }
}

/// Produces a draft from the input and context.
pub trait Drafter {
    /// An empty draft must be reported as an error, never returned.
    fn generate(&self, request: &DraftRequest<'_>) -> Result<String, CollaboratorError>;
}

/// Judges a draft.
pub trait Reviewer {
    fn review(&self, request: &ReviewRequest<'_>) -> Result<Review, CollaboratorError>;
}

/// Human checkpoint between validation and review.
pub trait HumanGate {
    /// `Ok(None)` means no decision is available yet; the run suspends.
    fn decide(&self, state: &RunState) -> anyhow::Result<Option<HumanDecision>>;

    /// Called once the decision in `state.human_decision` is checkpointed,
    /// and again when a run resumes from that checkpoint. Must be idempotent.
    fn acknowledge(&self, _state: &RunState) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<T: Drafter + ?Sized> Drafter for &T {
    fn generate(&self, request: &DraftRequest<'_>) -> Result<String, CollaboratorError> {
        (**self).generate(request)
    }
}

impl<T: Reviewer + ?Sized> Reviewer for &T {
    fn review(&self, request: &ReviewRequest<'_>) -> Result<Review, CollaboratorError> {
        (**self).review(request)
    }
}

impl<T: HumanGate + ?Sized> HumanGate for &T {
    fn decide(&self, state: &RunState) -> anyhow::Result<Option<HumanDecision>> {
        (**self).decide(state)
    }

    fn acknowledge(&self, state: &RunState) -> anyhow::Result<()> {
        (**self).acknowledge(state)
    }
}

/// Run a collaborator command with `prompt` on stdin and return its stdout.
///
/// Spawn failures are fatal; everything that happens after spawning
/// (non-zero exit, timeout, I/O while waiting) is transient.
fn run_collaborator(
    collaborator: &'static str,
    command: &CommandConfig,
    workdir: &Path,
    prompt: &str,
) -> Result<String, CollaboratorError> {
    let child = spawn_piped(&command.command, workdir).map_err(|err| {
        CollaboratorError::fatal(
            collaborator,
            format!("cannot spawn `{}`: {err}", command.command.join(" ")),
        )
    })?;
    let output = wait_with_timeout(
        child,
        prompt.as_bytes(),
        command.timeout(),
        command.output_limit_bytes,
    )
    .map_err(|err| CollaboratorError::transient(collaborator, format!("{err:#}")))?;
    if !output.success() {
        return Err(CollaboratorError::transient(
            collaborator,
            output.failure_summary(command.timeout()),
        ));
    }
    Ok(output.stdout_text())
}

/// Drafter backed by an external command (`[drafter]` in config).
#[derive(Debug, Clone)]
pub struct CommandDrafter {
    command: CommandConfig,
    workdir: PathBuf,
    prompts: PromptBuilder,
}

impl CommandDrafter {
    pub fn new(config: &PipelineConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.drafter.clone(),
            workdir: workdir.into(),
            prompts: PromptBuilder::new(config.max_input_tokens),
        }
    }
}

impl Drafter for CommandDrafter {
    #[instrument(skip_all, fields(run_id = request.run_id, iteration = request.iteration))]
    fn generate(&self, request: &DraftRequest<'_>) -> Result<String, CollaboratorError> {
        let prompt = self
            .prompts
            .build_draft(request)
            .map_err(|err| CollaboratorError::fatal("drafter", format!("render prompt: {err:#}")))?;
        let draft = run_collaborator("drafter", &self.command, &self.workdir, &prompt)?;
        if draft.trim().is_empty() {
            return Err(CollaboratorError::transient(
                "drafter",
                "command produced an empty draft",
            ));
        }
        Ok(draft)
    }
}

/// Reviewer backed by an external command (`[reviewer]` in config).
#[derive(Debug, Clone)]
pub struct CommandReviewer {
    command: CommandConfig,
    workdir: PathBuf,
    prompts: PromptBuilder,
}

impl CommandReviewer {
    pub fn new(config: &PipelineConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.reviewer.clone(),
            workdir: workdir.into(),
            prompts: PromptBuilder::new(config.max_input_tokens),
        }
    }
}

impl Reviewer for CommandReviewer {
    #[instrument(skip_all, fields(run_id = request.run_id, iteration = request.iteration))]
    fn review(&self, request: &ReviewRequest<'_>) -> Result<Review, CollaboratorError> {
        let prompt = self
            .prompts
            .build_review(request)
            .map_err(|err| CollaboratorError::fatal("reviewer", format!("render prompt: {err:#}")))?;
        let output = run_collaborator("reviewer", &self.command, &self.workdir, &prompt)?;
        Ok(Review::parse(&output))
    }
}
