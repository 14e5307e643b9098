//! Append-only transition log at `.draftloop/runs/<run_id>/transitions.jsonl`.
//!
//! Product artifact, always written, independent of `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::Stage;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionRecord {
    pub run_id: String,
    pub from: Stage,
    pub to: Stage,
    pub iteration_count: u32,
    pub at: String,
}

/// Append one record as a single JSON line.
pub fn append_transition(path: &Path, record: &TransitionRecord) -> Result<()> {
    append_json_line(path, record)
}

/// Read every record in order. A missing log is empty.
pub fn read_transitions(path: &Path) -> Result<Vec<TransitionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse {} line {}", path.display(), idx + 1))
        })
        .collect()
}

pub(crate) fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(value).context("serialize log record")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("runs/r1/transitions.jsonl");
        for (from, to) in [(Stage::Load, Stage::Analyze), (Stage::Analyze, Stage::Generate)] {
            append_transition(
                &path,
                &TransitionRecord {
                    run_id: "r1".to_string(),
                    from,
                    to,
                    iteration_count: 0,
                    at: "2026-01-01T00:00:00Z".to_string(),
                },
            )
            .expect("append");
        }
        let records = read_transitions(&path).expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].to, Stage::Generate);

        let raw = fs::read_to_string(&path).expect("read raw");
        assert!(raw.starts_with(r#"{"run_id":"r1","from":"load","to":"analyze""#));
    }

    #[test]
    fn missing_log_is_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(read_transitions(&temp.path().join("none.jsonl")).expect("read").is_empty());
    }
}
