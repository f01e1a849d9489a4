use crate::cli::JobArg;
use crate::workspace::{
    load_config, resolve_job, resolve_workspace_root, JobContext, JobPaths, PipelineConfig,
    WorkspacePaths,
};
use anyhow::{anyhow, Result};
use std::path::Path;

/// Everything a job-scoped command needs, loaded fresh from disk.
pub(crate) struct WorkspaceContext {
    pub(crate) paths: WorkspacePaths,
    pub(crate) config: PipelineConfig,
    pub(crate) job_paths: JobPaths,
    pub(crate) job: JobContext,
}

impl WorkspaceContext {
    pub(crate) fn load(root: Option<&Path>, job: &JobArg) -> Result<Self> {
        let root = resolve_workspace_root(root)?;
        if !root.is_dir() {
            return Err(anyhow!(
                "workspace {} does not exist (run `cflow --root {} init --job <id> --role-code <code>` first)",
                root.display(),
                root.display()
            ));
        }
        let paths = WorkspacePaths::new(root);
        let config = load_config(paths.root())?;
        let (job_paths, job) = resolve_job(&paths, job.job.as_deref())?;
        tracing::debug!(root = %paths.root().display(), job_id = %job.job_id, "workspace loaded");
        Ok(Self {
            paths,
            config,
            job_paths,
            job,
        })
    }

    pub(crate) fn root(&self) -> &Path {
        self.paths.root()
    }
}
