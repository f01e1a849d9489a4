//! Workspace-owned configuration, layout, and schema types.
//!
//! The workspace module centralizes schema versions, path handling, and typed
//! JSON structures so every command reconstructs state from disk the same way.
/// Current schema version for `config.json`.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;
/// Current schema version for `jobs/<job>/job.json`.
pub const JOB_SCHEMA_VERSION: u32 = 1;
/// Current schema version for `candidate.json`.
pub const CANDIDATE_SCHEMA_VERSION: u32 = 1;
/// Current schema version for `stages/<stage>.json`.
pub const STAGE_RECORD_SCHEMA_VERSION: u32 = 1;
/// Current schema version for `interactions.jsonl` entries.
pub const INTERACTION_SCHEMA_VERSION: u32 = 1;
/// Current schema version for `approvals/manifest.json`.
pub const APPROVAL_MANIFEST_SCHEMA_VERSION: u32 = 1;
/// Current schema version for `runs/<run_id>.json` and `runs/history.jsonl`.
pub const RUN_SUMMARY_SCHEMA_VERSION: u32 = 1;
/// Version of the collaborator request/response file contract.
pub const COLLABORATOR_CONTRACT_VERSION: u32 = 1;

mod config;
mod history;
mod job;
mod paths;
mod types;

pub use config::{
    default_config, load_config, resolve_workspace_root, validate_collaborators, write_config,
};
pub use history::{append_jsonl, read_jsonl};
pub use job::{resolve_job, write_job};
pub use paths::{rel_path, CandidatePaths, JobPaths, WorkspacePaths};
pub use types::*;

use anyhow::{Context, Result};

/// Read a JSON artifact from disk.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<T> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}
