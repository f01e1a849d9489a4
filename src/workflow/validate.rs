//! Workflow validate step.
//!
//! Validation loads everything a run would load and checks that each
//! configured collaborator program can actually be found.
use super::WorkspaceContext;
use crate::cli::ValidateArgs;
use crate::workspace::validate_collaborators;
use anyhow::Result;
use std::path::Path;

pub fn run_validate(root: Option<&Path>, args: &ValidateArgs) -> Result<()> {
    let ctx = WorkspaceContext::load(root, &args.job)?;
    validate_collaborators(&ctx.config, ctx.root())?;
    let missing: Vec<&str> = ["parse", "gate", "score", "summarize", "draft-outreach"]
        .into_iter()
        .filter(|key| !ctx.config.collaborators.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        tracing::warn!(
            missing = %missing.join(", "),
            "stages without a collaborator will fail when attempted"
        );
    }
    println!(
        "ok: job {} ({} collaborators configured)",
        ctx.job.job_id,
        ctx.config.collaborators.len()
    );
    Ok(())
}
