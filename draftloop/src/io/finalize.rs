//! Finalizer: the only code that writes a finished artifact.
//!
//! A run's artifact is written exactly once per approval, atomically, and is
//! always followed by an audit record. The provenance trailer is derived from
//! the run state alone, so finalizing the same state twice produces the same
//! bytes at the same path.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::types::Verdict;
use crate::io::config::PipelineConfig;
use crate::io::paths::{StatePaths, validate_id};
use crate::io::transitions::append_json_line;

pub const PROVENANCE_MARKER: &str = "<!-- draftloop:provenance -->";

/// Why an artifact was not written. Any existing artifact is left untouched.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("draft is {actual} bytes; at least {minimum} required")]
    DraftTooSmall { actual: usize, minimum: usize },

    #[error("verdict is {}; only APPROVED drafts are finalized", .0.map_or("missing", Verdict::as_str))]
    NotApproved(Option<Verdict>),

    #[error("invalid run identity '{run_id}': {reason}")]
    InvalidIdentity { run_id: String, reason: String },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Identity and approval data for the artifact being finalized.
#[derive(Debug, Clone)]
pub struct RunMetadata<'a> {
    pub run_id: &'a str,
    /// RFC 3339 time of approval, used verbatim in the trailer.
    pub approved_at: Option<&'a str>,
}

/// One line of `.draftloop/audit.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditRecord {
    pub run_id: String,
    pub path: String,
    pub verdict: Verdict,
    pub iteration_count: u32,
    pub finalized_at: String,
    pub sha256: String,
    pub bytes: usize,
}

#[derive(Debug, Clone)]
pub struct Finalizer {
    output_dir: PathBuf,
    suffix: String,
    min_bytes: usize,
    audit_path: PathBuf,
}

impl Finalizer {
    pub fn new(paths: &StatePaths, config: &PipelineConfig) -> Self {
        Self {
            output_dir: paths.root.join(&config.output_dir),
            suffix: config.artifact_suffix.clone(),
            min_bytes: config.min_artifact_bytes,
            audit_path: paths.audit_path.clone(),
        }
    }

    /// Target path for a run, without writing anything.
    pub fn artifact_path(&self, run_id: &str) -> PathBuf {
        self.output_dir.join(artifact_name(run_id, &self.suffix))
    }

    /// Write the approved draft plus its provenance trailer.
    #[instrument(skip_all, fields(run_id = metadata.run_id, iteration_count = iteration_count))]
    pub fn finalize(
        &self,
        draft: &str,
        verdict: Option<Verdict>,
        iteration_count: u32,
        metadata: &RunMetadata<'_>,
    ) -> Result<PathBuf, FinalizeError> {
        let actual = draft.trim().len();
        if actual == 0 || actual < self.min_bytes {
            return Err(FinalizeError::DraftTooSmall {
                actual,
                minimum: self.min_bytes,
            });
        }
        if verdict != Some(Verdict::Approved) {
            return Err(FinalizeError::NotApproved(verdict));
        }
        validate_id(metadata.run_id).map_err(|err| FinalizeError::InvalidIdentity {
            run_id: metadata.run_id.to_string(),
            reason: err.to_string(),
        })?;

        let finalized_at = metadata
            .approved_at
            .map_or_else(crate::io::timestamp, str::to_string);
        let contents = render_artifact(draft, iteration_count, &finalized_at);
        let path = self.artifact_path(metadata.run_id);
        write_atomic(&path, contents.as_bytes())?;
        info!(path = %path.display(), bytes = contents.len(), "artifact finalized");

        let record = AuditRecord {
            run_id: metadata.run_id.to_string(),
            path: path.display().to_string(),
            verdict: Verdict::Approved,
            iteration_count,
            finalized_at,
            sha256: hex::encode(Sha256::digest(contents.as_bytes())),
            bytes: contents.len(),
        };
        // The artifact is already in place; a lost audit line must not turn
        // a finished run into an aborted one.
        if let Err(err) = append_json_line(&self.audit_path, &record) {
            warn!(err = %format!("{err:#}"), "failed to append audit record");
        }
        Ok(path)
    }
}

/// `0042-spec.md` for numeric ids, `<id>-spec.md` otherwise.
pub fn artifact_name(run_id: &str, suffix: &str) -> String {
    if !run_id.is_empty() && run_id.chars().all(|c| c.is_ascii_digit()) {
        format!("{run_id:0>4}{suffix}")
    } else {
        format!("{run_id}{suffix}")
    }
}

/// Draft followed by the provenance trailer.
pub fn render_artifact(draft: &str, iteration_count: u32, finalized_at: &str) -> String {
    format!(
        "{}\n\n---\n{PROVENANCE_MARKER}\n- Verdict: {}\n- Iterations: {iteration_count}\n- Finalized: {finalized_at}\n",
        draft.trim_end(),
        Verdict::Approved
    )
}

/// Temp file in the target directory, fsync, rename. The temp file is
/// removed on any failure.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), FinalizeError> {
    let io_err = |source| FinalizeError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(io_err)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{name}.tmp-{}", std::process::id()));

    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(source) = result {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(source));
    }
    Ok(())
}
