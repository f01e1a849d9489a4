//! Workflow status step.
//!
//! Status is read-only: it renders what is on disk, with stale `running`
//! records shown as the failures they will be treated as.
use super::{print_json, WorkspaceContext};
use crate::approvals::ApprovalQueue;
use crate::cli::StatusArgs;
use crate::runner::stale_after;
use crate::store::{list_candidates, CandidateStore};
use crate::workspace::{
    ApprovalItem, ApprovalStatus, JobPaths, PipelineConfig, StageName, StageStatus,
};
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct StageView {
    pub status: StageStatus,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CandidateStatus {
    pub candidate_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub stages: BTreeMap<StageName, StageView>,
    /// First stage that is neither succeeded nor skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_stage: Option<StageName>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub job_id: String,
    pub candidates: Vec<CandidateStatus>,
    pub queue: Vec<ApprovalItem>,
    pub queue_counts: BTreeMap<String, usize>,
}

pub fn run_status(root: Option<&Path>, args: &StatusArgs) -> Result<()> {
    let ctx = WorkspaceContext::load(root, &args.job)?;
    let report = build_status(&ctx.job_paths, &ctx.config)?;
    if args.json {
        return print_json(&report);
    }
    print_status(&report);
    Ok(())
}

/// Build the status report without side effects.
pub fn build_status(job_paths: &JobPaths, config: &PipelineConfig) -> Result<StatusReport> {
    let stale = stale_after(config);
    let mut candidates = Vec::new();
    for candidate_id in list_candidates(job_paths)? {
        let store = CandidateStore::open(job_paths, &candidate_id, stale);
        let name = store
            .read_manifest()
            .ok()
            .and_then(|manifest| manifest.metadata.name);
        let records = store.read_stage_records()?;
        let next_stage = records
            .values()
            .find(|record| !record.is_resolved())
            .map(|record| record.stage_name);
        let stages = records
            .into_iter()
            .map(|(stage, record)| {
                let detail = record.error_detail.or(record.skip_reason);
                (
                    stage,
                    StageView {
                        status: record.status,
                        attempt_count: record.attempt_count,
                        detail,
                    },
                )
            })
            .collect();
        candidates.push(CandidateStatus {
            candidate_id,
            name,
            stages,
            next_stage,
        });
    }

    let queue = ApprovalQueue::new(job_paths).list()?;
    let mut queue_counts = BTreeMap::new();
    for item in &queue {
        *queue_counts.entry(item.status.to_string()).or_insert(0) += 1;
    }
    Ok(StatusReport {
        job_id: job_paths.job_id().to_string(),
        candidates,
        queue,
        queue_counts,
    })
}

fn print_status(report: &StatusReport) {
    println!("job {}", report.job_id);
    if report.candidates.is_empty() {
        println!("no candidates");
    }
    for candidate in &report.candidates {
        let name = candidate.name.as_deref().unwrap_or("-");
        println!("{}  ({name})", candidate.candidate_id);
        for (stage, view) in &candidate.stages {
            let mut line = format!("  {:<15} {:<10}", stage.as_str(), view.status.as_str());
            if view.attempt_count > 1 {
                line.push_str(&format!(" x{}", view.attempt_count));
            }
            if let Some(detail) = &view.detail {
                line.push_str(&format!(" {}", first_line(detail)));
            }
            println!("{}", line.trim_end());
        }
    }

    let open: Vec<&ApprovalItem> = report
        .queue
        .iter()
        .filter(|item| item.status.is_open())
        .collect();
    println!(
        "approval queue: {} pending, {} approved, {} total",
        report.queue_counts.get(ApprovalStatus::Pending.as_str()).copied().unwrap_or(0),
        report.queue_counts.get(ApprovalStatus::Approved.as_str()).copied().unwrap_or(0),
        report.queue.len()
    );
    for item in open {
        println!(
            "  #{} {} {} {}",
            item.seq, item.status, item.kind, item.candidate_id
        );
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
