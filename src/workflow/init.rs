//! Workflow init step.
//!
//! Init writes the workspace config (once) and a job context so later
//! commands have a role code to name candidates with.
use crate::cli::InitArgs;
use crate::workspace::{
    default_config, resolve_workspace_root, write_config, write_job, JobContext, WorkspacePaths,
    JOB_SCHEMA_VERSION,
};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::Path;

/// Run the init step.
pub fn run_init(root: Option<&Path>, args: &InitArgs) -> Result<()> {
    let root = resolve_workspace_root(root)?;
    let paths = WorkspacePaths::new(root);
    let job_id = args.job.trim();
    validate_job_id(job_id)?;
    let role_code = args.role_code.trim();
    if role_code.is_empty() {
        return Err(anyhow!("--role-code must not be empty"));
    }

    let job_paths = paths.job(job_id);
    if job_paths.job_path().is_file() {
        return Err(anyhow!(
            "job {job_id} already exists at {}",
            job_paths.job_path().display()
        ));
    }
    let config_path = paths.config_path();
    let write_config_file = !config_path.is_file();

    if args.dry_run {
        if write_config_file {
            println!("would write {}", config_path.display());
        }
        println!("would write {}", job_paths.job_path().display());
        return Ok(());
    }

    for dir in [paths.inbox_dir(), job_paths.candidates_dir()] {
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    }
    if write_config_file {
        write_config(paths.root(), &default_config())?;
        println!("wrote {}", config_path.display());
    }
    let job = JobContext {
        schema_version: JOB_SCHEMA_VERSION,
        job_id: job_id.to_string(),
        role_code: role_code.to_string(),
        title: args.title.clone().filter(|title| !title.trim().is_empty()),
        created_at: Utc::now(),
    };
    write_job(&job_paths, &job)?;
    tracing::info!(%job_id, %role_code, "job initialized");
    println!("wrote {}", job_paths.job_path().display());
    Ok(())
}

/// Job ids become directory names.
fn validate_job_id(job_id: &str) -> Result<()> {
    let valid = !job_id.is_empty()
        && !job_id.starts_with('.')
        && job_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(anyhow!(
            "invalid job id {job_id:?} (use letters, digits, '-', '_' or '.')"
        ))
    }
}

#[cfg(test)]
#[path = "init_tests.rs"]
mod tests;
