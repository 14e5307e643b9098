//! Canonical paths under `.draftloop/` for a project root.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

pub const STATE_DIR: &str = ".draftloop";

/// All state locations for a project root. Per-run files live under
/// `runs/<run_id>/` so runs never share mutable files.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub runs_dir: PathBuf,
    pub audit_path: PathBuf,
}

impl StatePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR);
        Self {
            root: root.clone(),
            config_path: state_dir.join("config.toml"),
            runs_dir: state_dir.join("runs"),
            audit_path: state_dir.join("audit.jsonl"),
            state_dir,
        }
    }

    pub fn run(&self, run_id: &str) -> RunPaths {
        RunPaths::new(&self.runs_dir, run_id)
    }
}

/// Files belonging to one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub transitions_path: PathBuf,
    pub decision_path: PathBuf,
    pub checks_path: PathBuf,
    /// Files of the last finished run with this id, moved aside on restart.
    pub previous_dir: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let dir = runs_dir.join(run_id);
        Self {
            checkpoint_path: dir.join("checkpoint.json"),
            transitions_path: dir.join("transitions.jsonl"),
            decision_path: dir.join("decision.json"),
            checks_path: dir.join("checks.json"),
            previous_dir: dir.join("previous"),
            dir,
        }
    }
}

/// Validate that an id is safe to use as a directory and file name.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("id must not be empty"));
    }
    if id.contains('/') || id.contains('\\') {
        return Err(anyhow!("id must not contain path separators"));
    }
    if id.starts_with('.') {
        return Err(anyhow!("id must not start with '.' (got '{id}')"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    Ok(())
}
