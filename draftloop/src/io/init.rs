//! Initialization helpers for `.draftloop/` scaffolding.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use super::config::{PipelineConfig, write_config};
use super::paths::StatePaths;

/// Options for `init_state`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing files.
    pub force: bool,
}

/// Create `.draftloop/` in `root` with a default config.
///
/// Fails if `.draftloop/` already exists unless `options.force` is set.
/// Existing runs are never touched, even with `force`.
pub fn init_state(root: &Path, options: &InitOptions) -> Result<StatePaths> {
    let paths = StatePaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "draftloop init: .draftloop exists but is not a directory"
        ));
    }
    if paths.state_dir.exists() && !options.force {
        return Err(anyhow!(
            "draftloop init: .draftloop already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.state_dir)?;
    create_dir(&paths.runs_dir)?;
    write_file(&paths.state_dir.join(".gitignore"), STATE_GITIGNORE)?;
    write_config(&paths.config_path, &PipelineConfig::default())?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const STATE_GITIGNORE: &str = "runs/\n";
