//! Workflow run step: one pipeline batch.
use super::{print_json, WorkspaceContext};
use crate::cli::RunArgs;
use crate::pipeline::{run_batch, BatchOptions, RunSummary};
use crate::workspace::StageName;
use anyhow::Result;
use std::path::Path;

/// Run a batch; per-candidate failures are reported, not returned.
pub fn run_run(root: Option<&Path>, args: &RunArgs) -> Result<()> {
    let ctx = WorkspaceContext::load(root, &args.job)?;
    let options = BatchOptions {
        candidates: args.candidates.clone(),
        stages: if args.stages.is_empty() {
            StageName::ALL.to_vec()
        } else {
            args.stages.clone()
        },
        recompute: args.recompute,
        step: args.step,
        dry_run: args.dry_run,
        preview: args.preview,
        from_inbox: args.from_inbox,
    };
    let summary = run_batch(&ctx.paths, &ctx.job_paths, &ctx.job, &ctx.config, &options)?;
    if args.json {
        return print_json(&summary);
    }
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if let Some(report) = &summary.intake {
        println!(
            "intake: {} accepted, {} held",
            report.accepted.len(),
            report.held.len()
        );
    }
    if let Some(err) = &summary.intake_error {
        println!("intake failed: {err}");
    }
    for candidate in &summary.candidates {
        let mut line = format!("{:<40} {}", candidate.candidate_id, candidate.outcome);
        if let Some(stage) = candidate.next_stage {
            line.push_str(&format!(" (next: {stage})"));
        }
        if let Some(detail) = &candidate.detail {
            line.push_str(&format!(": {detail}"));
        }
        println!("{line}");
    }
    let counts: Vec<String> = summary
        .counts
        .iter()
        .map(|(class, count)| format!("{class} {count}"))
        .collect();
    if counts.is_empty() {
        println!("no candidates");
    } else {
        println!("{}", counts.join(", "));
    }
    match &summary.summary_path {
        Some(path) => println!("wrote {path}"),
        None if summary.dry_run => println!("dry run: nothing written"),
        None => println!("preview: nothing recorded"),
    }
}
