//! Run summaries: one write-once file per batch plus an append-only index.
use crate::intake::IntakeReport;
use crate::staging::write_json_new;
use crate::workspace::{
    append_jsonl, rel_path, EvaluationDecision, JobPaths, StageName, StageStatus,
    RUN_SUMMARY_SCHEMA_VERSION,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a candidate ended up after this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    /// Every stage resolved; nothing awaits a human.
    Completed,
    /// Drafted outreach waits in the approval queue.
    AwaitingApproval,
    /// Gate deal-breaker; downstream stages skipped.
    ScreenedOut,
    /// The attempted stage failed; a later run retries it.
    Error,
    /// Stopped early (step mode); more stages remain.
    InProgress,
    /// The next unresolved stage is outside the requested stage list.
    Blocked,
    /// Another process holds the candidate lock.
    Locked,
    /// Dry run: the next stage that would run.
    WouldRun,
    /// Preview run: collaborator invoked in no-write mode.
    Previewed,
}

impl OutcomeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeClass::Completed => "completed",
            OutcomeClass::AwaitingApproval => "awaiting_approval",
            OutcomeClass::ScreenedOut => "screened_out",
            OutcomeClass::Error => "error",
            OutcomeClass::InProgress => "in_progress",
            OutcomeClass::Blocked => "blocked",
            OutcomeClass::Locked => "locked",
            OutcomeClass::WouldRun => "would_run",
            OutcomeClass::Previewed => "previewed",
        }
    }
}

impl fmt::Display for OutcomeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage touched for a candidate during this run.
#[derive(Debug, Clone, Serialize)]
pub struct StageAttempt {
    pub stage: StageName,
    /// Terminal status, or `would_run` / `previewed`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateOutcome {
    pub candidate_id: String,
    pub outcome: OutcomeClass,
    pub attempted: Vec<StageAttempt>,
    /// Stage statuses as left on disk after this run.
    pub stages: BTreeMap<StageName, StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<StageName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<EvaluationDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CandidateOutcome {
    pub fn new(candidate_id: &str, outcome: OutcomeClass) -> Self {
        Self {
            candidate_id: candidate_id.to_string(),
            outcome,
            attempted: Vec::new(),
            stages: BTreeMap::new(),
            next_stage: None,
            decision: None,
            detail: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub schema_version: u32,
    pub run_id: String,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub preview: bool,
    pub stages: Vec<StageName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recompute: Option<StageName>,
    pub step: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intake: Option<IntakeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intake_error: Option<String>,
    /// Candidates per outcome class.
    pub counts: BTreeMap<OutcomeClass, usize>,
    /// Per stage, candidates per status on disk after the run.
    pub stage_status_counts: BTreeMap<StageName, BTreeMap<StageStatus, usize>>,
    pub decision_breakdown: BTreeMap<EvaluationDecision, usize>,
    pub candidates: Vec<CandidateOutcome>,
    /// Workspace-relative path of the written summary, if written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_path: Option<String>,
}

impl RunSummary {
    /// Fill the aggregate tables from `candidates`.
    pub fn tally(&mut self) {
        self.counts.clear();
        self.stage_status_counts.clear();
        self.decision_breakdown.clear();
        for candidate in &self.candidates {
            *self.counts.entry(candidate.outcome).or_default() += 1;
            for (stage, status) in &candidate.stages {
                *self
                    .stage_status_counts
                    .entry(*stage)
                    .or_default()
                    .entry(*status)
                    .or_default() += 1;
            }
            if let Some(decision) = candidate.decision {
                *self.decision_breakdown.entry(decision).or_default() += 1;
            }
        }
    }

    pub fn count(&self, class: OutcomeClass) -> usize {
        self.counts.get(&class).copied().unwrap_or(0)
    }
}

#[derive(Debug, Serialize)]
struct RunIndexEntry<'a> {
    schema_version: u32,
    run_id: &'a str,
    job_id: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    path: &'a str,
    counts: &'a BTreeMap<OutcomeClass, usize>,
}

/// `<yyyymmddThhmmssZ>-<suffix>`; sorts chronologically.
pub fn new_run_id(at: DateTime<Utc>) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect();
    format!("{}-{suffix}", at.format("%Y%m%dT%H%M%SZ"))
}

/// Write the summary file (never overwriting) and append its index line.
pub fn write_run_summary(job: &JobPaths, summary: &mut RunSummary) -> Result<()> {
    let path = job.run_summary_path(&summary.run_id);
    let rel = rel_path(job.workspace_root(), &path);
    summary.summary_path = Some(rel.clone());
    write_json_new(&path, summary)?;
    append_jsonl(
        &job.run_history_path(),
        &RunIndexEntry {
            schema_version: RUN_SUMMARY_SCHEMA_VERSION,
            run_id: &summary.run_id,
            job_id: &summary.job_id,
            started_at: summary.started_at,
            finished_at: summary.finished_at,
            path: &rel,
            counts: &summary.counts,
        },
    )?;
    tracing::info!(run_id = %summary.run_id, path = %rel, "run summary written");
    Ok(())
}
