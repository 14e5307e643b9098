//! File-backed human gate.
//!
//! A reviewer records a decision by writing
//! `.draftloop/runs/<run_id>/decision.json`:
//!
//! ```json
//! {"decision": "revise", "feedback": "Split the migration into two steps."}
//! ```
//!
//! Reading the file does not consume it. Once the engine has checkpointed
//! the decision, the gate renames the file to `decision.<iteration>.json`,
//! so a crash in between re-reads the same decision and a decision is never
//! applied twice.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::state::RunState;
use crate::core::types::HumanDecision;
use crate::io::collaborators::HumanGate;
use crate::io::paths::{RunPaths, StatePaths};

#[derive(Debug, Clone)]
pub struct FileHumanGate {
    runs_dir: PathBuf,
}

impl FileHumanGate {
    pub fn new(paths: &StatePaths) -> Self {
        Self {
            runs_dir: paths.runs_dir.clone(),
        }
    }
}

fn read_decision(path: &Path) -> Result<HumanDecision> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

impl HumanGate for FileHumanGate {
    fn decide(&self, state: &RunState) -> Result<Option<HumanDecision>> {
        let paths = RunPaths::new(&self.runs_dir, &state.run_id);
        if !paths.decision_path.exists() {
            info!(
                run_id = %state.run_id,
                path = %paths.decision_path.display(),
                "awaiting human decision"
            );
            return Ok(None);
        }
        let decision = read_decision(&paths.decision_path)?;
        info!(run_id = %state.run_id, ?decision, "human decision recorded");
        Ok(Some(decision))
    }

    fn acknowledge(&self, state: &RunState) -> Result<()> {
        let paths = RunPaths::new(&self.runs_dir, &state.run_id);
        let Some(applied) = &state.human_decision else {
            return Ok(());
        };
        if !paths.decision_path.exists() {
            return Ok(());
        }
        // A different decision was written after this one was read; keep it.
        match read_decision(&paths.decision_path) {
            Ok(pending) if pending == *applied => {}
            _ => {
                debug!(run_id = %state.run_id, "decision file changed since it was read; leaving it");
                return Ok(());
            }
        }
        let consumed = paths
            .dir
            .join(format!("decision.{}.json", state.iteration_count));
        fs::rename(&paths.decision_path, &consumed).with_context(|| {
            format!("consume decision {}", paths.decision_path.display())
        })?;
        debug!(run_id = %state.run_id, path = %consumed.display(), "decision consumed");
        Ok(())
    }
}

/// Write a decision file for `run_id`, as `draftloop decide` does.
pub fn write_decision(paths: &StatePaths, run_id: &str, decision: &HumanDecision) -> Result<PathBuf> {
    let run = paths.run(run_id);
    fs::create_dir_all(&run.dir).with_context(|| format!("create {}", run.dir.display()))?;
    let mut buf = serde_json::to_string_pretty(decision).context("serialize decision")?;
    buf.push('\n');
    let tmp = run.decision_path.with_extension("json.tmp");
    fs::write(&tmp, buf).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, &run.decision_path)
        .with_context(|| format!("replace {}", run.decision_path.display()))?;
    Ok(run.decision_path)
}
