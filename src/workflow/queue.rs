//! Approval queue commands.
//!
//! Approve and reject are the human checkpoint; `send-next` is the single-item
//! entry point for a scheduled send cycle.
use super::{print_json, WorkspaceContext};
use crate::approvals::ApprovalQueue;
use crate::cli::{QueueCommand, QueueItemArgs, QueueListArgs, QueueRejectArgs, QueueSendArgs};
use crate::runner::ProcessCollaborator;
use crate::workspace::{ApprovalItem, ApprovalStatus, COLLABORATOR_CONTRACT_VERSION};
use anyhow::{anyhow, Result};
use std::path::Path;

const SEND_COLLABORATOR: &str = "send";

pub fn run_queue(root: Option<&Path>, command: &QueueCommand) -> Result<()> {
    match command {
        QueueCommand::List(args) => list(root, args),
        QueueCommand::Next(args) => next(root, args),
        QueueCommand::Approve(args) => approve(root, args),
        QueueCommand::Reject(args) => reject(root, args),
        QueueCommand::MarkSent(args) => mark_sent(root, args),
        QueueCommand::SendNext(args) => send_next(root, args),
    }
}

fn list(root: Option<&Path>, args: &QueueListArgs) -> Result<()> {
    let ctx = WorkspaceContext::load(root, &args.job)?;
    let items = ApprovalQueue::new(&ctx.job_paths).list()?;
    if args.json {
        return print_json(&items);
    }
    if items.is_empty() {
        println!("queue is empty");
    }
    for item in &items {
        print_item(item);
    }
    Ok(())
}

fn next(root: Option<&Path>, args: &QueueListArgs) -> Result<()> {
    let ctx = WorkspaceContext::load(root, &args.job)?;
    let item = ApprovalQueue::new(&ctx.job_paths).select_next_pending()?;
    if args.json {
        return print_json(&item);
    }
    match item {
        Some(item) => print_item(&item),
        None => println!("no pending items"),
    }
    Ok(())
}

fn approve(root: Option<&Path>, args: &QueueItemArgs) -> Result<()> {
    let ctx = WorkspaceContext::load(root, &args.job)?;
    let queue = ApprovalQueue::new(&ctx.job_paths);
    if args.dry_run {
        let item = queue.check_transition(&args.candidate, args.kind, ApprovalStatus::Approved)?;
        println!("would approve #{} {} {}", item.seq, item.kind, item.candidate_id);
        return Ok(());
    }
    let item = queue.approve(&args.candidate, args.kind)?;
    print_item(&item);
    Ok(())
}

fn reject(root: Option<&Path>, args: &QueueRejectArgs) -> Result<()> {
    let item_args = &args.item;
    let ctx = WorkspaceContext::load(root, &item_args.job)?;
    let queue = ApprovalQueue::new(&ctx.job_paths);
    if item_args.dry_run {
        let item =
            queue.check_transition(&item_args.candidate, item_args.kind, ApprovalStatus::Rejected)?;
        println!("would reject #{} {} {}", item.seq, item.kind, item.candidate_id);
        return Ok(());
    }
    let item = queue.reject(&item_args.candidate, item_args.kind, args.note.as_deref())?;
    print_item(&item);
    Ok(())
}

fn mark_sent(root: Option<&Path>, args: &QueueItemArgs) -> Result<()> {
    let ctx = WorkspaceContext::load(root, &args.job)?;
    let queue = ApprovalQueue::new(&ctx.job_paths);
    let cycle = queue
        .begin_send_cycle()?
        .ok_or_else(|| anyhow!("a send cycle is in progress; try again after it finishes"))?;
    let ticket = queue.ticket_for(&cycle, &args.candidate, args.kind)?;
    if args.dry_run {
        let item = ticket.item();
        println!("would mark sent #{} {} {}", item.seq, item.kind, item.candidate_id);
        return Ok(());
    }
    let item = queue.mark_sent(ticket)?;
    print_item(&item);
    Ok(())
}

/// Send the oldest approved item, marking it sent only if the sender succeeds.
///
/// The send cycle lock is held from selection through `mark_sent`; a cycle
/// that finds it busy sends nothing.
fn send_next(root: Option<&Path>, args: &QueueSendArgs) -> Result<()> {
    let ctx = WorkspaceContext::load(root, &args.job)?;
    let queue = ApprovalQueue::new(&ctx.job_paths);
    let Some(cycle) = queue.begin_send_cycle()? else {
        tracing::info!(job_id = %ctx.job.job_id, "send cycle already running; skipping");
        println!("send cycle in progress; nothing sent");
        return Ok(());
    };
    let Some(ticket) = queue.select_next_approved(&cycle)? else {
        println!("no approved items");
        return Ok(());
    };
    let item = ticket.item().clone();
    let artifact = ctx.root().join(&item.artifact_path);
    if !artifact.is_file() {
        return Err(anyhow!(
            "artifact {} for #{} is missing; nothing was sent",
            artifact.display(),
            item.seq
        ));
    }
    if args.dry_run {
        println!("would send #{} {} {}", item.seq, item.kind, item.candidate_id);
        return Ok(());
    }

    let spec = ctx
        .config
        .collaborators
        .get(SEND_COLLABORATOR)
        .ok_or_else(|| anyhow!("no send collaborator configured; nothing was sent"))?;
    let sender =
        ProcessCollaborator::from_spec(spec, ctx.config.runner.stage_timeout_seconds, ctx.root())?;
    let send_args = vec![
        "--job".to_string(),
        item.job_id.clone(),
        "--candidate".to_string(),
        item.candidate_id.clone(),
        "--kind".to_string(),
        item.kind.to_string(),
        "--artifact".to_string(),
        artifact.display().to_string(),
    ];
    let envs = vec![
        (
            "CFLOW_CONTRACT_VERSION".to_string(),
            COLLABORATOR_CONTRACT_VERSION.to_string(),
        ),
        ("CFLOW_JOB_ID".to_string(), item.job_id.clone()),
        ("CFLOW_CANDIDATE_ID".to_string(), item.candidate_id.clone()),
        ("CFLOW_OUTREACH_KIND".to_string(), item.kind.to_string()),
        ("CFLOW_ARTIFACT".to_string(), artifact.display().to_string()),
    ];
    let log_dir = ctx.job_paths.candidate(&item.candidate_id).work_dir();
    let exit = sender.run(&send_args, &envs, &log_dir, &format!("send.{}", item.kind))?;
    if !exit.ok() {
        let status = match (exit.timed_out, exit.exit_code) {
            (true, _) => format!("timed out after {} ms", exit.duration_ms),
            (false, Some(code)) => format!("exited with status {code}"),
            (false, None) => "terminated by signal".to_string(),
        };
        tracing::warn!(
            candidate_id = %item.candidate_id,
            kind = %item.kind,
            %status,
            "send failed; item stays approved"
        );
        return Err(anyhow!(
            "send collaborator {status} for #{}; item stays approved: {}",
            item.seq,
            exit.diagnostics
        ));
    }
    let sent = queue.mark_sent(ticket)?;
    drop(cycle);
    print_item(&sent);
    Ok(())
}

fn print_item(item: &ApprovalItem) {
    let mut line = format!(
        "#{} {:<9} {:<22} {} {}",
        item.seq,
        item.status.as_str(),
        item.kind.as_str(),
        item.candidate_id,
        item.artifact_path
    );
    if let Some(note) = &item.note {
        line.push_str(&format!(" ({note})"));
    }
    println!("{line}");
}
