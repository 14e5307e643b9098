//! Test-only collaborators and workspace fixtures.
//!
//! Scripted collaborators replay a queue of canned responses and record what
//! they were asked, so tests can assert on both the outcome and the traffic.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::TempDir;

use crate::core::state::RunState;
use crate::core::types::{HumanDecision, Verdict};
use crate::engine::RunRequest;
use crate::io::collaborators::{
    CollaboratorError, DraftRequest, Drafter, HumanGate, Review, ReviewRequest, Reviewer,
};
use crate::io::config::PipelineConfig;
use crate::io::init::{InitOptions, init_state};
use crate::io::paths::StatePaths;

/// What a scripted drafter was asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDraft {
    pub iteration: u32,
    pub prior_draft: Option<String>,
    pub feedback: Option<String>,
    pub validation_issues: Vec<String>,
}

/// What a scripted reviewer was asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedReview {
    pub iteration: u32,
    pub draft: String,
    pub truncation_warning: Option<String>,
}

/// Replays `script`, then `fallback` forever (or a fatal error if unset).
#[derive(Debug)]
struct Script<T> {
    queue: Mutex<VecDeque<Result<T, CollaboratorError>>>,
    fallback: Option<T>,
}

impl<T: Clone> Script<T> {
    fn new(script: Vec<Result<T, CollaboratorError>>, fallback: Option<T>) -> Self {
        Self {
            queue: Mutex::new(script.into()),
            fallback,
        }
    }

    fn next(&self, collaborator: &'static str) -> Result<T, CollaboratorError> {
        let scripted = self.queue.lock().expect("script lock").pop_front();
        match (scripted, &self.fallback) {
            (Some(response), _) => response,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => Err(CollaboratorError::fatal(collaborator, "script exhausted")),
        }
    }
}

#[derive(Debug)]
pub struct ScriptedDrafter {
    script: Script<String>,
    requests: Mutex<Vec<RecordedDraft>>,
}

impl ScriptedDrafter {
    pub fn new(script: Vec<Result<String, CollaboratorError>>) -> Self {
        Self {
            script: Script::new(script, None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Returns `draft` on every call.
    pub fn repeating(draft: String) -> Self {
        Self {
            script: Script::new(Vec::new(), Some(draft)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replays `script`, then returns `draft` forever.
    pub fn then_repeating(script: Vec<Result<String, CollaboratorError>>, draft: String) -> Self {
        Self {
            script: Script::new(script, Some(draft)),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn requests(&self) -> Vec<RecordedDraft> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Drafter for ScriptedDrafter {
    fn generate(&self, request: &DraftRequest<'_>) -> Result<String, CollaboratorError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedDraft {
                iteration: request.iteration,
                prior_draft: request.prior_draft.map(str::to_string),
                feedback: request.feedback.map(str::to_string),
                validation_issues: request.validation_issues.to_vec(),
            });
        self.script.next("drafter")
    }
}

#[derive(Debug)]
pub struct ScriptedReviewer {
    script: Script<Review>,
    requests: Mutex<Vec<RecordedReview>>,
}

impl ScriptedReviewer {
    pub fn new(script: Vec<Result<Review, CollaboratorError>>) -> Self {
        Self {
            script: Script::new(script, None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Approves every draft.
    pub fn approving() -> Self {
        Self::then_approving(Vec::new())
    }

    /// Replays `script`, then approves every draft.
    pub fn then_approving(script: Vec<Result<Review, CollaboratorError>>) -> Self {
        Self {
            script: Script::new(script, Some(review(Verdict::Approved, ""))),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn requests(&self) -> Vec<RecordedReview> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Reviewer for ScriptedReviewer {
    fn review(&self, request: &ReviewRequest<'_>) -> Result<Review, CollaboratorError> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedReview {
                iteration: request.iteration,
                draft: request.draft.to_string(),
                truncation_warning: request.truncation_warning.clone(),
            });
        self.script.next("reviewer")
    }
}

/// Human gate fed from a queue; an empty queue means "no decision yet".
#[derive(Debug, Default)]
pub struct ScriptedGate {
    decisions: Mutex<VecDeque<HumanDecision>>,
    asked: Mutex<u32>,
    acknowledged: Mutex<Vec<HumanDecision>>,
}

impl ScriptedGate {
    pub fn with(decisions: Vec<HumanDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            ..Self::default()
        }
    }

    pub fn push(&self, decision: HumanDecision) {
        self.decisions.lock().expect("gate lock").push_back(decision);
    }

    pub fn asked(&self) -> u32 {
        *self.asked.lock().expect("gate lock")
    }

    /// Decisions the engine confirmed as checkpointed, in order.
    pub fn acknowledged(&self) -> Vec<HumanDecision> {
        self.acknowledged.lock().expect("gate lock").clone()
    }
}

impl HumanGate for ScriptedGate {
    fn decide(&self, _state: &RunState) -> anyhow::Result<Option<HumanDecision>> {
        *self.asked.lock().expect("gate lock") += 1;
        Ok(self.decisions.lock().expect("gate lock").pop_front())
    }

    fn acknowledge(&self, state: &RunState) -> anyhow::Result<()> {
        if let Some(decision) = &state.human_decision {
            self.acknowledged
                .lock()
                .expect("gate lock")
                .push(decision.clone());
        }
        Ok(())
    }
}

pub fn review(verdict: Verdict, feedback: &str) -> Review {
    Review {
        verdict,
        feedback: feedback.to_string(),
    }
}

pub const SOURCE_FILE: &str = "src/cart.rs";

pub const SOURCE_CONTENTS: &str = "pub struct Cart {\n    items: Vec<Item>,\n}\n";

pub const INPUT_FILE: &str = "design.md";

/// Approved input with id `0042` referencing `src/cart.rs`.
pub fn sample_input() -> String {
    "---\n\
     id: \"0042\"\n\
     status: approved\n\
     ---\n\
     \n\
     # Cart totals\n\
     \n\
     Carts must report the sum of their item prices.\n\
     \n\
     ## References\n\
     \n\
     - modify: src/cart.rs\n\
     - pattern: src/cart.rs:1-3 existing cart shape\n"
        .to_string()
}

/// Draft that passes every mechanical check against [`sample_input`].
pub fn complete_draft() -> String {
    "# Plan\n\
     \n\
     Modify `src/cart.rs` (see src/cart.rs:1-3):\n\
     \n\
     ```rust\n\
     pub struct Cart {\n\
         items: Vec<Item>,\n\
     }\n\
     pub fn total(cart: &Cart) -> u64 { 0 }\n\
     ```\n\
     \n\
     Example cart:\n\
     \n\
     ```json\n\
     {\"items\": [{\"price\": 2}, {\"price\": 3}]}\n\
     ```\n\
     \n\
     total(cart) => 5\n\
     \n\
     Change line 2 so totals sum prices.\n"
        .to_string()
}

/// Prose-only draft that fails validation.
pub fn vague_draft() -> String {
    "Improve the cart so that it handles totals better and is more robust.\n".to_string()
}

/// Temporary project root with `.draftloop/` initialized, one source file,
/// and [`sample_input`] at [`INPUT_FILE`].
#[derive(Debug)]
pub struct TestWorkspace {
    dir: TempDir,
    config: PipelineConfig,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        init_state(dir.path(), &InitOptions { force: false }).expect("init state");
        let workspace = Self {
            dir,
            config: fast_config(),
        };
        workspace.write(SOURCE_FILE, SOURCE_CONTENTS);
        workspace.write(INPUT_FILE, &sample_input());
        workspace
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> StatePaths {
        StatePaths::new(self.root())
    }

    pub fn config(&self) -> PipelineConfig {
        self.config.clone()
    }

    pub fn config_mut(&mut self) -> &mut PipelineConfig {
        &mut self.config
    }

    /// Write `contents` at `relative`, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, contents).expect("write file");
        path
    }

    /// Request for [`INPUT_FILE`] with config defaults.
    pub fn request(&self) -> RunRequest {
        RunRequest {
            input_path: PathBuf::from(INPUT_FILE),
            ..RunRequest::default()
        }
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.root().join(&self.config.output_dir).join(name)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Default config without retry delays.
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.retry.base_delay_ms = 0;
    config
}
