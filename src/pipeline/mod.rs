//! Pipeline Coordinator: advances a batch of candidates through the fixed
//! stage chain.
//!
//! Each candidate is handled on its own: a failure becomes that candidate's
//! outcome and the batch moves on. Only job-level problems (unknown candidate
//! in the filter, unreadable workspace) abort the invocation.
mod summary;
mod verdicts;

pub use summary::{CandidateOutcome, OutcomeClass, RunSummary, StageAttempt};
pub use verdicts::{gate_verdict, read_decision};

use crate::approvals::{ApprovalQueue, EnqueueOutcome};
use crate::intake::run_intake;
use crate::runner::{
    collaborator_for, run_stage, stale_after, ResultCheck, RunOptions, RunOutcome, StageRequest,
};
use crate::store::{list_candidates, CandidateLock, CandidateStore};
use crate::workspace::{
    rel_path, InteractionEvent, InteractionKind, JobContext, JobPaths, OutreachKind,
    PipelineConfig, StageName, StageRecord, StageStatus, WorkspacePaths,
    RUN_SUMMARY_SCHEMA_VERSION,
};
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use summary::{new_run_id, write_run_summary};

const SCREENED_OUT_REASON: &str = "screened out at gate";
const NO_OUTREACH_REASON: &str = "no outreach required";

/// What a batch should do.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Candidate ids to process; empty means every candidate of the job.
    pub candidates: Vec<String>,
    /// Stages this run may attempt, in pipeline order.
    pub stages: Vec<StageName>,
    /// Force this stage to re-run and reset everything after it.
    pub recompute: Option<StageName>,
    /// At most one stage attempt per candidate.
    pub step: bool,
    /// Report what would run; write nothing.
    pub dry_run: bool,
    /// Invoke collaborators in no-write mode; record nothing.
    pub preview: bool,
    /// Run a clustering pass before the batch.
    pub from_inbox: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            stages: StageName::ALL.to_vec(),
            recompute: None,
            step: false,
            dry_run: false,
            preview: false,
            from_inbox: false,
        }
    }
}

impl BatchOptions {
    fn writes(&self) -> bool {
        !self.dry_run && !self.preview
    }
}

struct Batch<'a> {
    job_paths: &'a JobPaths,
    config: &'a PipelineConfig,
    workspace_root: &'a Path,
    stale_after: std::time::Duration,
    queue: ApprovalQueue,
    options: &'a BatchOptions,
}

/// Run one batch for `job` and return (and, unless dry/preview, persist) its
/// summary.
pub fn run_batch(
    paths: &WorkspacePaths,
    job_paths: &JobPaths,
    job: &JobContext,
    config: &PipelineConfig,
    options: &BatchOptions,
) -> Result<RunSummary> {
    let started_at = Utc::now();
    let mut stages = options.stages.clone();
    stages.sort();
    stages.dedup();

    let mut intake = None;
    let mut intake_error = None;
    if options.from_inbox {
        match run_intake(paths, job_paths, job, config, !options.writes()) {
            Ok(report) => intake = Some(report),
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(error = %message, "intake pass failed; continuing with existing candidates");
                intake_error = Some(message);
            }
        }
    }

    let known = list_candidates(job_paths)?;
    let selected = if options.candidates.is_empty() {
        known
    } else {
        for id in &options.candidates {
            if !known.contains(id) {
                return Err(anyhow!(
                    "unknown candidate {id:?} in job {}",
                    job_paths.job_id()
                ));
            }
        }
        let mut ids = options.candidates.clone();
        ids.sort();
        ids.dedup();
        ids
    };

    let normalized = BatchOptions {
        stages: stages.clone(),
        ..options.clone()
    };
    let batch = Batch {
        job_paths,
        config,
        workspace_root: paths.root(),
        stale_after: stale_after(config),
        queue: ApprovalQueue::new(job_paths),
        options: &normalized,
    };

    let mut candidates = Vec::with_capacity(selected.len());
    for candidate_id in &selected {
        let outcome = match batch.process(candidate_id) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(%candidate_id, error = %format!("{err:#}"), "candidate failed");
                let mut outcome = CandidateOutcome::new(candidate_id, OutcomeClass::Error);
                outcome.detail = Some(format!("{err:#}"));
                outcome.stages = batch.statuses(candidate_id).unwrap_or_default();
                outcome
            }
        };
        candidates.push(outcome);
    }

    let finished_at = Utc::now();
    let mut summary = RunSummary {
        schema_version: RUN_SUMMARY_SCHEMA_VERSION,
        run_id: new_run_id(started_at),
        job_id: job_paths.job_id().to_string(),
        started_at,
        finished_at,
        dry_run: options.dry_run,
        preview: options.preview,
        stages,
        recompute: options.recompute,
        step: options.step,
        intake,
        intake_error,
        counts: BTreeMap::new(),
        stage_status_counts: BTreeMap::new(),
        decision_breakdown: BTreeMap::new(),
        candidates,
        summary_path: None,
    };
    summary.tally();
    if options.writes() {
        write_run_summary(job_paths, &mut summary)?;
    }
    tracing::info!(
        run_id = %summary.run_id,
        candidates = summary.candidates.len(),
        errors = summary.count(OutcomeClass::Error),
        screened_out = summary.count(OutcomeClass::ScreenedOut),
        "batch finished"
    );
    Ok(summary)
}

impl Batch<'_> {
    fn store(&self, candidate_id: &str) -> CandidateStore {
        CandidateStore::open(self.job_paths, candidate_id, self.stale_after)
    }

    fn statuses(&self, candidate_id: &str) -> Result<BTreeMap<StageName, StageStatus>> {
        Ok(self
            .store(candidate_id)
            .read_stage_records()?
            .into_iter()
            .map(|(stage, record)| (stage, record.status))
            .collect())
    }

    fn process(&self, candidate_id: &str) -> Result<CandidateOutcome> {
        let store = self.store(candidate_id);
        let guard = if self.options.dry_run {
            None
        } else {
            match store.try_lock()? {
                Some(guard) => Some(guard),
                None => {
                    tracing::info!(%candidate_id, "candidate locked by another run; skipping");
                    let mut outcome = CandidateOutcome::new(candidate_id, OutcomeClass::Locked);
                    outcome.stages = self.statuses(candidate_id)?;
                    return Ok(outcome);
                }
            }
        };

        let mut outcome = self.advance(&store, guard.as_ref())?;
        if self.options.writes() {
            self.ensure_enqueued(&store)?;
        }
        let records = store.read_stage_records()?;
        if outcome.decision.is_none() && records[&StageName::Score].status == StageStatus::Succeeded {
            outcome.decision = read_decision(store.paths()).ok();
        }
        if outcome.outcome == OutcomeClass::Completed && self.has_open_item(candidate_id)? {
            outcome.outcome = OutcomeClass::AwaitingApproval;
        }
        outcome.stages = records
            .into_iter()
            .map(|(stage, record)| (stage, record.status))
            .collect();
        Ok(outcome)
    }

    /// Attempt stages in order until one fails, the chain ends, or the run's
    /// limits stop it.
    fn advance(
        &self,
        store: &CandidateStore,
        guard: Option<&CandidateLock>,
    ) -> Result<CandidateOutcome> {
        let candidate_id = store.candidate_id();
        let options = self.options;
        let mut outcome = CandidateOutcome::new(candidate_id, OutcomeClass::Completed);
        let mut records = store.read_stage_records()?;
        let mut force = options.recompute;

        if let Some(target) = options.recompute {
            for stage in target.downstream() {
                let record = &records[&stage];
                if record.status == StageStatus::Pending {
                    continue;
                }
                let reset = record.reset();
                if let (Some(guard), true) = (guard, options.writes()) {
                    store.write_stage_record(guard, &reset)?;
                    store.append_interaction(
                        &InteractionEvent::new(
                            InteractionKind::StageReset,
                            format!("{stage} reset for recompute of {target}"),
                        )
                        .with_stage(stage),
                    )?;
                }
                records.insert(stage, reset);
            }
        }

        loop {
            let gate = &records[&StageName::Gate];
            if gate.screened_out && force != Some(StageName::Gate) {
                outcome.next_stage = None;
                outcome.outcome = OutcomeClass::ScreenedOut;
                outcome.detail = gate.error_detail.clone();
                self.skip_after_gate(store, guard, &mut records, &mut outcome)?;
                return Ok(outcome);
            }

            let next = StageName::ALL
                .into_iter()
                .find(|stage| force == Some(*stage) || !records[stage].is_resolved());
            let Some(next) = next else {
                outcome.next_stage = None;
                return Ok(outcome);
            };
            outcome.next_stage = Some(next);
            if !options.stages.contains(&next) {
                outcome.outcome = OutcomeClass::Blocked;
                outcome.detail = Some(format!("next stage {next} is not in this run's stage list"));
                return Ok(outcome);
            }
            if options.step && !outcome.attempted.is_empty() {
                outcome.outcome = OutcomeClass::InProgress;
                return Ok(outcome);
            }
            if options.dry_run {
                outcome.outcome = OutcomeClass::WouldRun;
                outcome.attempted.push(StageAttempt {
                    stage: next,
                    status: "would_run".to_string(),
                    detail: None,
                });
                return Ok(outcome);
            }
            let Some(guard) = guard else {
                return Err(anyhow!("candidate {candidate_id} is not locked"));
            };

            let mut kind = None;
            if next == StageName::DraftOutreach {
                match read_decision(store.paths()) {
                    Ok(decision) => {
                        outcome.decision = Some(decision);
                        kind = decision.outreach();
                    }
                    Err(err) => {
                        let detail = format!("unreadable evaluation decision: {err:#}");
                        if options.writes() {
                            let now = Utc::now();
                            let failed = records[&next].start_attempt(now).fail(now, detail.as_str());
                            store.write_stage_record(guard, &failed)?;
                            records.insert(next, failed);
                        }
                        tracing::warn!(%candidate_id, stage = %next, error = %detail, "stage failed");
                        outcome.attempted.push(StageAttempt {
                            stage: next,
                            status: StageStatus::Failed.to_string(),
                            detail: Some(detail.clone()),
                        });
                        outcome.outcome = OutcomeClass::Error;
                        outcome.detail = Some(detail);
                        return Ok(outcome);
                    }
                }
                if kind.is_none() {
                    if options.preview {
                        outcome.outcome = OutcomeClass::Previewed;
                        outcome.detail = Some(format!("{next} would be skipped: {NO_OUTREACH_REASON}"));
                        return Ok(outcome);
                    }
                    let skipped = records[&next].skip(Utc::now(), NO_OUTREACH_REASON);
                    store.write_stage_record(guard, &skipped)?;
                    store.append_interaction(
                        &InteractionEvent::new(
                            InteractionKind::StageSkipped,
                            format!("{next} skipped: {NO_OUTREACH_REASON}"),
                        )
                        .with_stage(next),
                    )?;
                    outcome.attempted.push(StageAttempt {
                        stage: next,
                        status: StageStatus::Skipped.to_string(),
                        detail: Some(NO_OUTREACH_REASON.to_string()),
                    });
                    records.insert(next, skipped);
                    if force == Some(next) {
                        force = None;
                    }
                    continue;
                }
            }

            let request =
                StageRequest::build(store, self.job_paths.job_id(), next, kind, options.preview)?;
            let collaborator = collaborator_for(self.config, next, self.workspace_root);
            let run_options = RunOptions {
                force: force == Some(next),
                check: (next == StageName::Gate).then_some(gate_verdict as ResultCheck),
            };
            if force == Some(next) {
                force = None;
            }

            match run_stage(store, guard, &request, collaborator.as_ref(), run_options)? {
                RunOutcome::Noop(record) => {
                    records.insert(next, record);
                }
                RunOutcome::Previewed { stage, exit } => {
                    let status = if exit.ok() { "previewed" } else { "preview_failed" };
                    let detail = (!exit.diagnostics.is_empty()).then(|| exit.diagnostics.clone());
                    outcome.attempted.push(StageAttempt {
                        stage,
                        status: status.to_string(),
                        detail: detail.clone(),
                    });
                    outcome.outcome = OutcomeClass::Previewed;
                    outcome.detail = detail;
                    return Ok(outcome);
                }
                RunOutcome::Finished(record) => {
                    outcome.attempted.push(StageAttempt {
                        stage: next,
                        status: record.status.to_string(),
                        detail: record.error_detail.clone(),
                    });
                    let status = record.status;
                    let screened_out = record.screened_out;
                    let error_detail = record.error_detail.clone();
                    records.insert(next, record);
                    if status == StageStatus::Succeeded || screened_out {
                        continue;
                    }
                    outcome.outcome = OutcomeClass::Error;
                    outcome.detail = error_detail;
                    return Ok(outcome);
                }
            }
        }
    }

    /// Write every stage after a screened-out gate as `skipped`.
    fn skip_after_gate(
        &self,
        store: &CandidateStore,
        guard: Option<&CandidateLock>,
        records: &mut BTreeMap<StageName, StageRecord>,
        outcome: &mut CandidateOutcome,
    ) -> Result<()> {
        let Some(guard) = guard.filter(|_| self.options.writes()) else {
            return Ok(());
        };
        for stage in StageName::Gate.downstream() {
            if records[&stage].status == StageStatus::Skipped {
                continue;
            }
            let skipped = records[&stage].skip(Utc::now(), SCREENED_OUT_REASON);
            store.write_stage_record(guard, &skipped)?;
            store.append_interaction(
                &InteractionEvent::new(
                    InteractionKind::StageSkipped,
                    format!("{stage} skipped: {SCREENED_OUT_REASON}"),
                )
                .with_stage(stage),
            )?;
            outcome.attempted.push(StageAttempt {
                stage,
                status: StageStatus::Skipped.to_string(),
                detail: Some(SCREENED_OUT_REASON.to_string()),
            });
            records.insert(stage, skipped);
        }
        tracing::info!(candidate_id = %store.candidate_id(), "screened out; downstream stages skipped");
        Ok(())
    }

    /// Queue the drafted artifact unless this draft was already queued.
    ///
    /// Runs on every pass, so a draft whose enqueue was interrupted is picked
    /// up by the next run; a human's rejection of this draft is not undone.
    fn ensure_enqueued(&self, store: &CandidateStore) -> Result<()> {
        let record = store.read_stage_record(StageName::DraftOutreach)?;
        if record.status != StageStatus::Succeeded {
            return Ok(());
        }
        let Some(kind) = drafted_kind(&record) else {
            return Ok(());
        };
        let candidate_id = store.candidate_id();
        let queued = self
            .queue
            .latest(candidate_id, kind)?
            .is_some_and(|item| record.finished_at.is_some_and(|at| item.enqueued_at >= at));
        if queued {
            return Ok(());
        }
        let artifact = rel_path(self.workspace_root, &store.paths().outreach_path(kind));
        if let EnqueueOutcome::Added(item) = self.queue.enqueue(candidate_id, kind, &artifact)? {
            tracing::info!(%candidate_id, %kind, seq = item.seq, "outreach queued for approval");
        }
        Ok(())
    }

    fn has_open_item(&self, candidate_id: &str) -> Result<bool> {
        Ok(self
            .queue
            .list()?
            .iter()
            .any(|item| item.candidate_id == candidate_id && item.status.is_open()))
    }
}

fn drafted_kind(record: &StageRecord) -> Option<OutreachKind> {
    [OutreachKind::ClarificationRequest, OutreachKind::Decline]
        .into_iter()
        .find(|kind| record.output_paths.contains(&kind.artifact_rel()))
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
