//! Workspace configuration helpers.
//!
//! This module loads, validates, and resolves the workspace config. The config
//! is passed as a value into every operation; nothing reads it globally.
use super::{PipelineConfig, WorkspacePaths, CONFIG_SCHEMA_VERSION};
use crate::staging::write_json_atomic;
use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming the workspace root when `--root` is omitted.
pub const ROOT_ENV: &str = "CFLOW_ROOT";

/// Build the default config used when a workspace is first initialized.
pub fn default_config() -> PipelineConfig {
    PipelineConfig::default()
}

/// Load `config.json`, falling back to defaults when it does not exist.
pub fn load_config(root: &Path) -> Result<PipelineConfig> {
    let paths = WorkspacePaths::new(root.to_path_buf());
    let path = paths.config_path();
    if !path.is_file() {
        return Ok(default_config());
    }
    let config: PipelineConfig =
        super::read_json(&path).with_context(|| format!("load config {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Persist a config to disk in a stable JSON format.
pub fn write_config(root: &Path, config: &PipelineConfig) -> Result<()> {
    let paths = WorkspacePaths::new(root.to_path_buf());
    write_json_atomic(&paths.config_path(), config)
}

/// Validate schema version and the tunable intake and runner settings.
pub fn validate_config(config: &PipelineConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    let intake = &config.intake;
    if intake.proximity_window_seconds == 0 {
        return Err(anyhow!("intake.proximity_window_seconds must be positive"));
    }
    if !(intake.similarity_threshold > 0.0 && intake.similarity_threshold <= 1.0) {
        return Err(anyhow!(
            "intake.similarity_threshold must be in (0, 1] (got {})",
            intake.similarity_threshold
        ));
    }
    if intake.resume_extensions.is_empty() {
        return Err(anyhow!("intake.resume_extensions must not be empty"));
    }
    if intake.suffix_len == 0 || intake.suffix_len > 32 {
        return Err(anyhow!("intake.suffix_len must be between 1 and 32"));
    }
    if config.runner.stage_timeout_seconds == 0 {
        return Err(anyhow!("runner.stage_timeout_seconds must be positive"));
    }
    for (key, spec) in &config.collaborators {
        if !is_known_collaborator(key) {
            return Err(anyhow!("unknown collaborator {key:?}"));
        }
        let words = shell_words::split(&spec.command)
            .with_context(|| format!("parse collaborator {key} command"))?;
        if words.is_empty() {
            return Err(anyhow!("collaborator {key} command is empty"));
        }
        if spec.timeout_seconds == Some(0) {
            return Err(anyhow!("collaborator {key} timeout_seconds must be positive"));
        }
    }
    Ok(())
}

/// Check that every configured collaborator program can be found.
///
/// Programs containing a path separator resolve relative to the workspace
/// root; bare names are looked up on `PATH`.
pub fn validate_collaborators(config: &PipelineConfig, root: &Path) -> Result<()> {
    for (key, spec) in &config.collaborators {
        let words = shell_words::split(&spec.command)
            .with_context(|| format!("parse collaborator {key} command"))?;
        let Some(program) = words.first() else {
            return Err(anyhow!("collaborator {key} command is empty"));
        };
        if program.contains('/') {
            let path = root.join(program);
            if !path.is_file() {
                return Err(anyhow!(
                    "collaborator {key} program not found at {}",
                    path.display()
                ));
            }
        } else {
            which::which(program)
                .with_context(|| format!("collaborator {key} program {program:?} not on PATH"))?;
        }
    }
    Ok(())
}

fn is_known_collaborator(key: &str) -> bool {
    matches!(
        key,
        "parse" | "gate" | "score" | "summarize" | "draft-outreach" | "send"
    )
}

/// Resolve the workspace root: explicit flag, then `CFLOW_ROOT`, then the
/// platform data directory.
pub fn resolve_workspace_root(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(value) = std::env::var_os(ROOT_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(value));
    }
    let data_dir = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow!("cannot determine home directory; pass --root"))?;
    Ok(data_dir.join("cflow"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
