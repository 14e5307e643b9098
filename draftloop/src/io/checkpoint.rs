//! Durable per-run checkpoints under `.draftloop/runs/<run_id>/checkpoint.json`.
//!
//! A checkpoint records the state as it stood after a stage's own update,
//! together with that stage's name. Routing is re-derived on resume, so
//! bookkeeping done by routing (the iteration counter) happens exactly once.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::state::RunState;
use crate::core::types::Stage;
use crate::io::paths::{RunPaths, StatePaths, validate_id};

pub const SCHEMA_VERSION: u32 = 1;

const CHECKPOINT_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/checkpoint/v1.schema.json"
));

static CHECKPOINT_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(CHECKPOINT_SCHEMA).expect("checkpoint schema should be valid JSON");
    jsonschema::validator_for(&schema).expect("checkpoint schema should compile")
});

/// On-disk checkpoint document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub schema_version: u32,
    pub run_id: String,
    /// Last stage that completed for this run.
    pub stage: Stage,
    pub saved_at: String,
    pub state: RunState,
}

/// One line of `draftloop status` output.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub run_id: String,
    pub stage: Stage,
    pub saved_at: String,
    pub iteration_count: u32,
}

/// Checkpoint persistence partitioned by run id.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    runs_dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(paths: &StatePaths) -> Self {
        Self {
            runs_dir: paths.runs_dir.clone(),
        }
    }

    fn run_paths(&self, run_id: &str) -> Result<RunPaths> {
        validate_id(run_id).with_context(|| format!("invalid run id '{run_id}'"))?;
        Ok(RunPaths::new(&self.runs_dir, run_id))
    }

    /// Persist `state` as of the completion of `stage`. Overwrites the
    /// previous checkpoint for the run atomically.
    #[instrument(skip_all, fields(run_id, stage = %stage))]
    pub fn save(&self, run_id: &str, state: &RunState, stage: Stage) -> Result<Checkpoint> {
        let paths = self.run_paths(run_id)?;
        if state.run_id != run_id {
            bail!(
                "checkpoint for run '{run_id}' carries state of run '{}'",
                state.run_id
            );
        }
        let checkpoint = Checkpoint {
            schema_version: SCHEMA_VERSION,
            run_id: run_id.to_string(),
            stage,
            saved_at: crate::io::timestamp(),
            state: state.clone(),
        };
        let mut buf = serde_json::to_string_pretty(&checkpoint).context("serialize checkpoint")?;
        buf.push('\n');
        write_atomic(&paths.checkpoint_path, &buf)?;
        debug!(
            path = %paths.checkpoint_path.display(),
            iteration_count = state.iteration_count,
            "checkpoint saved"
        );
        Ok(checkpoint)
    }

    /// Latest checkpoint for `run_id`, or `None` if the run never saved one.
    pub fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let paths = self.run_paths(run_id)?;
        if !paths.checkpoint_path.exists() {
            return Ok(None);
        }
        let checkpoint = read_checkpoint(&paths.checkpoint_path)?;
        if checkpoint.run_id != run_id || checkpoint.state.run_id != run_id {
            bail!(
                "checkpoint {} belongs to run '{}', not '{run_id}'",
                paths.checkpoint_path.display(),
                checkpoint.run_id
            );
        }
        Ok(Some(checkpoint))
    }

    /// Move the files of a finished run into `runs/<run_id>/previous/` so a
    /// restart begins with an empty partition. Replaces any older archive.
    /// Returns the archive directory, or `None` if there was nothing to move.
    #[instrument(skip_all, fields(run_id))]
    pub fn archive(&self, run_id: &str) -> Result<Option<PathBuf>> {
        let paths = self.run_paths(run_id)?;
        if !paths.dir.exists() {
            return Ok(None);
        }
        let files = fs::read_dir(&paths.dir)
            .with_context(|| format!("read run dir {}", paths.dir.display()))?
            .map(|entry| entry.context("read run dir entry").map(|entry| entry.path()))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        if files.is_empty() {
            return Ok(None);
        }
        if paths.previous_dir.exists() {
            fs::remove_dir_all(&paths.previous_dir).with_context(|| {
                format!("remove old archive {}", paths.previous_dir.display())
            })?;
        }
        fs::create_dir_all(&paths.previous_dir)
            .with_context(|| format!("create archive {}", paths.previous_dir.display()))?;
        for file in &files {
            let Some(name) = file.file_name() else {
                continue;
            };
            let target = paths.previous_dir.join(name);
            fs::rename(file, &target)
                .with_context(|| format!("archive {} to {}", file.display(), target.display()))?;
        }
        debug!(
            archive = %paths.previous_dir.display(),
            files = files.len(),
            "archived previous run"
        );
        Ok(Some(paths.previous_dir))
    }

    /// Every run with a readable checkpoint, sorted by run id.
    pub fn list(&self) -> Result<Vec<CheckpointSummary>> {
        if !self.runs_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.runs_dir)
            .with_context(|| format!("read runs dir {}", self.runs_dir.display()))?;
        let mut summaries = Vec::new();
        for entry in entries {
            let entry = entry.context("read runs dir entry")?;
            let Some(run_id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_id(&run_id).is_err() {
                continue;
            }
            match self.load(&run_id) {
                Ok(Some(checkpoint)) => summaries.push(CheckpointSummary {
                    run_id,
                    stage: checkpoint.stage,
                    saved_at: checkpoint.saved_at,
                    iteration_count: checkpoint.state.iteration_count,
                }),
                Ok(None) => {}
                Err(err) => warn!(run_id = %run_id, err = %format!("{err:#}"), "skipping unreadable checkpoint"),
            }
        }
        summaries.sort_by(|a, b| a.run_id.cmp(&b.run_id));
        Ok(summaries)
    }
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read checkpoint {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse checkpoint {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("checkpoint {}", path.display()))?;
    serde_json::from_value(value)
        .with_context(|| format!("deserialize checkpoint {}", path.display()))
}

fn validate_schema(value: &Value) -> Result<()> {
    let validator = &*CHECKPOINT_VALIDATOR;
    if validator.is_valid(value) {
        return Ok(());
    }
    let messages = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect::<Vec<_>>();
    Err(anyhow!("schema validation failed: {}", messages.join("; ")))
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("checkpoint path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp checkpoint {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace checkpoint {}", path.display()))?;
    Ok(())
}
