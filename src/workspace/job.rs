//! Job context resolution.
use super::{JobContext, JobPaths, WorkspacePaths};
use crate::staging::write_json_atomic;
use anyhow::{anyhow, Context, Result};
use std::fs;

/// List job identifiers that have a `job.json`, sorted.
pub fn list_jobs(paths: &WorkspacePaths) -> Result<Vec<String>> {
    let jobs_dir = paths.jobs_dir();
    if !jobs_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut jobs = Vec::new();
    for entry in fs::read_dir(&jobs_dir).with_context(|| format!("read {}", jobs_dir.display()))? {
        let entry = entry.with_context(|| format!("read {}", jobs_dir.display()))?;
        if !entry.path().join("job.json").is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            jobs.push(name.to_string());
        }
    }
    jobs.sort();
    Ok(jobs)
}

/// Load a job context; an unknown job is a fatal error.
pub fn load_job(paths: &JobPaths) -> Result<JobContext> {
    let path = paths.job_path();
    if !path.is_file() {
        return Err(anyhow!(
            "unknown job {:?} (no {}; run `cflow init --job {} --role-code <code>`)",
            paths.job_id(),
            path.display(),
            paths.job_id()
        ));
    }
    super::read_json(&path)
}

/// Persist a job context.
pub fn write_job(paths: &JobPaths, job: &JobContext) -> Result<()> {
    write_json_atomic(&paths.job_path(), job)
}

/// Resolve the job for this invocation.
///
/// An explicit id wins; otherwise the single existing job is used. Zero or
/// several jobs without `--job` is a usage error.
pub fn resolve_job(paths: &WorkspacePaths, explicit: Option<&str>) -> Result<(JobPaths, JobContext)> {
    let job_id = match explicit {
        Some(job_id) => job_id.to_string(),
        None => {
            let jobs = list_jobs(paths)?;
            match jobs.as_slice() {
                [only] => {
                    tracing::debug!(job_id = %only, "defaulting to single job");
                    only.clone()
                }
                [] => {
                    return Err(anyhow!(
                        "no jobs under {}; run `cflow init --job <id> --role-code <code>`",
                        paths.jobs_dir().display()
                    ))
                }
                many => {
                    return Err(anyhow!(
                        "--job is required when multiple jobs exist ({})",
                        many.join(", ")
                    ))
                }
            }
        }
    };
    let job_paths = paths.job(&job_id);
    let job = load_job(&job_paths)?;
    Ok((job_paths, job))
}
