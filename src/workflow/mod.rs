//! Command handlers behind the CLI.
//!
//! Each step resolves the workspace, reads state from disk, calls one library
//! operation, and prints either a short text report or JSON on stdout.
mod context;
mod init;
mod intake;
mod queue;
mod run;
mod status;
mod validate;

pub(crate) use context::WorkspaceContext;
pub(crate) use init::run_init;
pub(crate) use intake::run_intake_command;
pub(crate) use queue::run_queue;
pub(crate) use run::run_run;
pub(crate) use status::run_status;
pub(crate) use validate::run_validate;

use anyhow::{Context, Result};
use serde::Serialize;

/// Print a value as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{text}");
    Ok(())
}
