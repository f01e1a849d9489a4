//! CLI argument parsing for the candidate pipeline.
//!
//! The CLI is thin: every command resolves the workspace, loads state from
//! disk, and hands explicit values to the library modules.
use crate::workspace::{OutreachKind, StageName};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "cflow",
    version,
    about = "Disk-backed candidate pipeline with approval-gated outreach",
    after_help = "Examples:\n  cflow init --job eng-001 --role-code ENG --title \"Backend Engineer\"\n  cflow intake --dry-run\n  cflow run --from-inbox\n  cflow run --candidate eng-alice-20260302-a1b2c3 --recompute score\n  cflow status --json\n  cflow queue next\n  cflow queue approve --candidate eng-alice-20260302-a1b2c3 --kind decline\n  cflow queue send-next",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Workspace root (defaults to $CFLOW_ROOT, then the platform data dir)
    #[arg(long, value_name = "DIR", global = true, env = "CFLOW_ROOT")]
    pub root: Option<PathBuf>,

    /// Log at debug level unless CFLOW_LOG/RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    Init(InitArgs),
    Validate(ValidateArgs),
    Intake(IntakeArgs),
    Run(RunArgs),
    Status(StatusArgs),
    #[command(subcommand)]
    Queue(QueueCommand),
}

/// Job selection shared by every job-scoped command.
#[derive(Args, Debug, Clone, Default)]
pub struct JobArg {
    /// Job id (optional when exactly one job exists)
    #[arg(long, value_name = "ID")]
    pub job: Option<String>,
}

#[derive(Parser, Debug)]
#[command(about = "Create config.json (if absent) and a job context")]
pub struct InitArgs {
    /// Job id, used as the directory name under jobs/
    #[arg(long, value_name = "ID")]
    pub job: String,

    /// Role code used as the candidate id prefix
    #[arg(long, value_name = "CODE")]
    pub role_code: String,

    /// Human-readable job title
    #[arg(long)]
    pub title: Option<String>,

    /// Report what would be written without writing
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Check config, job context, and collaborator programs")]
pub struct ValidateArgs {
    #[command(flatten)]
    pub job: JobArg,
}

#[derive(Parser, Debug)]
#[command(about = "Cluster the staging directory into candidates")]
pub struct IntakeArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Report the plan without moving files
    #[arg(long)]
    pub dry_run: bool,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Advance candidates through the stage chain")]
pub struct RunArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Limit the batch to these candidates (repeatable)
    #[arg(long = "candidate", value_name = "ID")]
    pub candidates: Vec<String>,

    /// Stages this run may attempt (comma-separated; default all)
    #[arg(long, value_name = "STAGES", value_delimiter = ',')]
    pub stages: Vec<StageName>,

    /// Run a clustering pass over the staging directory first
    #[arg(long)]
    pub from_inbox: bool,

    /// Attempt at most one stage per candidate
    #[arg(long)]
    pub step: bool,

    /// Re-run this stage and reset every later stage
    #[arg(long, value_name = "STAGE")]
    pub recompute: Option<StageName>,

    /// Report what would run without writing anything
    #[arg(long, conflicts_with = "preview")]
    pub dry_run: bool,

    /// Invoke collaborators in no-write mode and record nothing
    #[arg(long, conflicts_with = "dry_run")]
    pub preview: bool,

    /// Emit the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Show stage progress and the approval queue")]
pub struct StatusArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

/// Approval queue commands.
#[derive(Subcommand, Debug)]
#[command(about = "Inspect and act on the approval queue")]
pub enum QueueCommand {
    /// List every queued item, oldest first
    List(QueueListArgs),
    /// Show the single oldest pending item
    Next(QueueListArgs),
    /// Approve a pending item (human sign-off)
    Approve(QueueItemArgs),
    /// Reject a pending or approved item
    Reject(QueueRejectArgs),
    /// Record that an approved item was sent
    MarkSent(QueueItemArgs),
    /// Send the oldest approved item via the send collaborator
    SendNext(QueueSendArgs),
}

#[derive(Parser, Debug)]
pub struct QueueListArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Emit machine-readable JSON output
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct QueueItemArgs {
    #[command(flatten)]
    pub job: JobArg,

    #[arg(long, value_name = "ID")]
    pub candidate: String,

    /// clarification-request or decline
    #[arg(long, value_name = "KIND")]
    pub kind: OutreachKind,

    /// Check the transition without recording it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser, Debug)]
pub struct QueueRejectArgs {
    #[command(flatten)]
    pub item: QueueItemArgs,

    /// Reason recorded with the rejection
    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Parser, Debug)]
pub struct QueueSendArgs {
    #[command(flatten)]
    pub job: JobArg,

    /// Show which item would be sent without sending it
    #[arg(long)]
    pub dry_run: bool,
}
