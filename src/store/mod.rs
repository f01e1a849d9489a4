//! Candidate Store: the exclusive owner of one candidate's directory.
//!
//! Every read goes to disk. Stage records are replaced atomically and only
//! while the caller holds the candidate's advisory lock; the interaction log
//! is append-only.
mod lock;

pub use lock::{lock_blocking, try_lock, FileLock};

use crate::staging::{write_json_atomic, write_json_new};
use crate::workspace::{
    self, append_jsonl, read_jsonl, CandidateManifest, CandidatePaths, InteractionEvent, JobPaths,
    StageName, StageRecord, StageStatus,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Proof that the caller holds a specific candidate's lock.
#[derive(Debug)]
pub struct CandidateLock {
    lock: FileLock,
    candidate_root: PathBuf,
}

impl CandidateLock {
    pub fn lock_path(&self) -> &std::path::Path {
        self.lock.path()
    }
}

/// Narrow API over `jobs/<job>/candidates/<id>/`.
#[derive(Debug, Clone)]
pub struct CandidateStore {
    candidate_id: String,
    paths: CandidatePaths,
    stale_after: Duration,
}

impl CandidateStore {
    /// Open a store handle; nothing is touched on disk until a method runs.
    ///
    /// `stale_after` is the stage timeout: a `running` record older than this
    /// is reclassified as failed on read.
    pub fn open(job: &JobPaths, candidate_id: &str, stale_after: std::time::Duration) -> Self {
        let stale_after = Duration::from_std(stale_after).unwrap_or(Duration::MAX);
        Self {
            candidate_id: candidate_id.to_string(),
            paths: job.candidate(candidate_id),
            stale_after,
        }
    }

    pub fn candidate_id(&self) -> &str {
        &self.candidate_id
    }

    pub fn paths(&self) -> &CandidatePaths {
        &self.paths
    }

    /// True once intake has written `candidate.json`.
    pub fn exists(&self) -> bool {
        self.paths.manifest_path().is_file()
    }

    /// Create the candidate directory tree if missing.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.paths.root().to_path_buf(),
            self.paths.raw_dir(),
            self.paths.parsed_dir(),
            self.paths.outputs_dir(),
            self.paths.stages_dir(),
            self.paths.work_dir(),
        ] {
            fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Take the candidate lock without waiting; `None` when another run holds it.
    pub fn try_lock(&self) -> Result<Option<CandidateLock>> {
        Ok(try_lock(&self.paths.lock_path())?.map(|lock| CandidateLock {
            lock,
            candidate_root: self.paths.root().to_path_buf(),
        }))
    }

    /// Write the manifest once; a second write for the same candidate fails.
    pub fn create_manifest(&self, manifest: &CandidateManifest) -> Result<()> {
        if manifest.candidate_id != self.candidate_id {
            return Err(anyhow!(
                "manifest for {} written to store for {}",
                manifest.candidate_id,
                self.candidate_id
            ));
        }
        write_json_new(&self.paths.manifest_path(), manifest)
    }

    pub fn read_manifest(&self) -> Result<CandidateManifest> {
        workspace::read_json(&self.paths.manifest_path())
    }

    /// Read one stage record; a stage never attempted reads as `pending`.
    pub fn read_stage_record(&self, stage: StageName) -> Result<StageRecord> {
        let path = self.paths.stage_record_path(stage);
        if !path.is_file() {
            return Ok(StageRecord::pending(stage));
        }
        let record: StageRecord = workspace::read_json(&path)?;
        if record.stage_name != stage {
            return Err(anyhow!(
                "{} holds a record for stage {}",
                path.display(),
                record.stage_name
            ));
        }
        Ok(reclassify_stale(record, Utc::now(), self.stale_after))
    }

    /// Read the record for every stage, in pipeline order.
    pub fn read_stage_records(&self) -> Result<BTreeMap<StageName, StageRecord>> {
        StageName::ALL
            .into_iter()
            .map(|stage| Ok((stage, self.read_stage_record(stage)?)))
            .collect()
    }

    /// Atomically replace a stage record; requires this candidate's lock.
    pub fn write_stage_record(&self, guard: &CandidateLock, record: &StageRecord) -> Result<()> {
        if guard.candidate_root != self.paths.root() {
            return Err(anyhow!(
                "lock {} does not cover candidate {}",
                guard.lock_path().display(),
                self.candidate_id
            ));
        }
        write_json_atomic(&self.paths.stage_record_path(record.stage_name), record)
    }

    pub fn append_interaction(&self, event: &InteractionEvent) -> Result<()> {
        append_jsonl(&self.paths.interactions_path(), event)
    }

    pub fn read_interactions(&self) -> Result<Vec<InteractionEvent>> {
        read_jsonl(&self.paths.interactions_path())
    }

    /// Outputs a stage's record claims that are actually present on disk.
    pub fn list_outputs(&self, stage: StageName) -> Result<Vec<PathBuf>> {
        let record = self.read_stage_record(stage)?;
        Ok(record
            .output_paths
            .iter()
            .map(|rel| self.paths.resolve(rel))
            .filter(|path| path.is_file())
            .collect())
    }
}

/// Treat a `running` record older than the stage timeout as an interrupted
/// attempt. The record is not rewritten here; the next locked writer does that.
pub fn reclassify_stale(record: StageRecord, now: DateTime<Utc>, stale_after: Duration) -> StageRecord {
    if record.status != StageStatus::Running {
        return record;
    }
    let expired = match record.last_run_at {
        Some(started) => now.signed_duration_since(started) >= stale_after,
        None => true,
    };
    if !expired {
        return record;
    }
    let since = record
        .last_run_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    record.fail(
        now,
        format!("interrupted: running since {since} exceeded the stage timeout"),
    )
}

/// Candidate identifiers with a manifest under a job, sorted.
pub fn list_candidates(job: &JobPaths) -> Result<Vec<String>> {
    let dir = job.candidates_dir();
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read {}", dir.display()))?;
        if !entry.path().join("candidate.json").is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            ids.push(name.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
