//! Pipeline configuration stored under `.draftloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::validator::ValidatorConfig;

/// Pipeline configuration (TOML).
///
/// Edited by humans; missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Back-edges allowed per run before it aborts.
    pub max_iterations: u32,

    /// Pause for a human decision between validation and review.
    pub human_gate: bool,

    /// Refuse inputs whose frontmatter `status` is not `approved`.
    pub require_approved_input: bool,

    /// Directory (relative to the project root) for finalized artifacts.
    pub output_dir: PathBuf,

    /// Appended to the run identity to name the finalized artifact.
    pub artifact_suffix: String,

    /// Drafts smaller than this are never finalized.
    pub min_artifact_bytes: usize,

    /// Budget for input material sent to a collaborator, in approximate tokens.
    pub max_input_tokens: usize,

    /// Lines kept per excerpt captured at Analyze.
    pub max_excerpt_lines: usize,

    pub retry: RetryConfig,
    pub validator: ValidatorConfig,
    pub drafter: CommandConfig,
    pub reviewer: CommandConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per collaborator call, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// External command backing a collaborator. The prompt is written to stdin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            timeout_secs: 15 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(anyhow!("{name}.command must be a non-empty array"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("{name}.timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("{name}.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            human_gate: false,
            require_approved_input: true,
            output_dir: PathBuf::from("specs"),
            artifact_suffix: "-spec.md".to_string(),
            min_artifact_bytes: 200,
            max_input_tokens: 30_000,
            max_excerpt_lines: 200,
            retry: RetryConfig::default(),
            validator: ValidatorConfig::default(),
            drafter: CommandConfig::default(),
            reviewer: CommandConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.max_input_tokens == 0 {
            return Err(anyhow!("max_input_tokens must be > 0"));
        }
        if self.max_excerpt_lines == 0 {
            return Err(anyhow!("max_excerpt_lines must be > 0"));
        }
        if self.artifact_suffix.contains('/') {
            return Err(anyhow!("artifact_suffix must not contain '/'"));
        }
        self.validator.validate()?;
        self.drafter.validate("drafter")?;
        self.reviewer.validate("reviewer")?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = PipelineConfig {
            max_iterations: 5,
            human_gate: true,
            ..PipelineConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    /// Partial files keep defaults for everything they omit.
    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_iterations = 1\n[validator]\nspecificity_floor = 5\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 1);
        assert_eq!(cfg.validator.specificity_floor, 5);
        assert_eq!(cfg.validator.excerpt_window_lines, 40);
        assert_eq!(cfg.retry, RetryConfig::default());
    }

    #[test]
    fn rejects_empty_drafter_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[drafter]\ncommand = []\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("drafter.command"));
    }
}
