//! Workflow intake step: one clustering pass over the staging directory.
use super::{print_json, WorkspaceContext};
use crate::cli::IntakeArgs;
use crate::intake::{run_intake, IntakeReport};
use anyhow::Result;
use std::path::Path;

pub fn run_intake_command(root: Option<&Path>, args: &IntakeArgs) -> Result<()> {
    let ctx = WorkspaceContext::load(root, &args.job)?;
    let report = run_intake(&ctx.paths, &ctx.job_paths, &ctx.job, &ctx.config, args.dry_run)?;
    if args.json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &IntakeReport) {
    let verb = if report.dry_run { "would accept" } else { "accepted" };
    for bundle in &report.accepted {
        let recovered = if bundle.recovered { " (recovered)" } else { "" };
        println!(
            "{verb} {}{recovered}: {}",
            bundle.candidate_id,
            bundle.files.join(", ")
        );
    }
    for held in &report.held {
        println!("held: {} ({})", held.files.join(", "), held.reason);
    }
    for issue in &report.issues {
        println!("issue: {issue}");
    }
    if report.accepted.is_empty() && report.held.is_empty() {
        println!("staging is empty");
    }
}
