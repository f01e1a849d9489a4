//! `cflow`: a disk-backed pipeline that turns staged application files into
//! candidates, runs them through external stage collaborators, and holds every
//! candidate-facing message for human approval.
use anyhow::Result;
use clap::Parser;

mod approvals;
mod cli;
mod intake;
mod pipeline;
mod runner;
mod staging;
mod store;
mod telemetry;
mod util;
mod workflow;
mod workspace;

use cli::{Command, RootArgs};

fn main() -> Result<()> {
    let args = RootArgs::parse();
    telemetry::init(args.verbose)?;
    let root = args.root.as_deref();

    match &args.command {
        Command::Init(init) => workflow::run_init(root, init),
        Command::Validate(validate) => workflow::run_validate(root, validate),
        Command::Intake(intake) => workflow::run_intake_command(root, intake),
        Command::Run(run) => workflow::run_run(root, run),
        Command::Status(status) => workflow::run_status(root, status),
        Command::Queue(queue) => workflow::run_queue(root, queue),
    }
}
