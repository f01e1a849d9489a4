//! Stage Runner: one attempt of one stage for one candidate.
//!
//! The record goes `running` before the collaborator starts and reaches a
//! terminal status once it exits, each transition an atomic write made under
//! the candidate lock.
mod collaborator;

pub use collaborator::{
    collaborator_for, stale_after, Collaborator, CollaboratorExit, ProcessCollaborator,
    StageRequest,
};

use crate::store::{CandidateLock, CandidateStore};
use crate::util::truncate_string;
use crate::workspace::{
    CandidatePaths, InteractionEvent, InteractionKind, StageName, StageRecord, StageStatus,
};
use anyhow::Result;
use chrono::Utc;
use std::time::Instant;

const MAX_ERROR_DETAIL_BYTES: usize = 2000;

/// What a stage's outputs say about the candidate once they exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// Hard deal-breaker; the stage fails with `screened_out` set.
    ScreenOut(String),
}

/// Reads a finished stage's outputs and judges them.
pub type ResultCheck = fn(&CandidatePaths) -> Result<Verdict>;

#[derive(Clone, Copy, Default)]
pub struct RunOptions {
    /// Re-run even when the stage already succeeded.
    pub force: bool,
    pub check: Option<ResultCheck>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Already succeeded and not forced; nothing ran.
    Noop(StageRecord),
    /// The collaborator ran and a terminal record was written.
    Finished(StageRecord),
    /// Preview invocation; nothing was recorded.
    Previewed {
        stage: StageName,
        exit: CollaboratorExit,
    },
}

/// Run `request.stage` for the store's candidate.
///
/// Collaborator problems become a `failed` record, never an `Err`; errors are
/// reserved for the store itself being unusable.
pub fn run_stage(
    store: &CandidateStore,
    guard: &CandidateLock,
    request: &StageRequest,
    collaborator: &dyn Collaborator,
    options: RunOptions,
) -> Result<RunOutcome> {
    let stage = request.stage;
    let current = store.read_stage_record(stage)?;
    if current.status == StageStatus::Succeeded && !options.force {
        tracing::debug!(candidate_id = %store.candidate_id(), %stage, "stage already succeeded");
        return Ok(RunOutcome::Noop(current));
    }

    if request.preview {
        let exit = collaborator.invoke(request)?;
        tracing::info!(
            candidate_id = %store.candidate_id(),
            %stage,
            exit_code = ?exit.exit_code,
            timed_out = exit.timed_out,
            "previewed stage"
        );
        return Ok(RunOutcome::Previewed { stage, exit });
    }

    if current.status == StageStatus::Running {
        // Holding the lock means no one else is running it.
        tracing::warn!(
            candidate_id = %store.candidate_id(),
            %stage,
            "previous attempt was interrupted"
        );
    }

    let running = current.start_attempt(Utc::now());
    store.write_stage_record(guard, &running)?;
    tracing::info!(
        candidate_id = %store.candidate_id(),
        %stage,
        attempt = running.attempt_count,
        "stage started"
    );

    let start = Instant::now();
    let finished = match collaborator.invoke(request) {
        Err(err) => running.fail(Utc::now(), format!("collaborator could not run: {err:#}")),
        Ok(exit) => classify(store.paths(), &running, request, &exit, options.check),
    };
    store.write_stage_record(guard, &finished)?;

    let event = InteractionEvent::new(
        InteractionKind::StageFinished,
        format!("{stage} {}", finished.status),
    )
    .with_stage(stage)
    .with_data(serde_json::json!({
        "status": finished.status,
        "attempt": finished.attempt_count,
        "screened_out": finished.screened_out,
        "error_detail": finished.error_detail,
        "outputs": finished.output_paths,
    }));
    store.append_interaction(&event)?;

    let elapsed_ms = start.elapsed().as_millis();
    match finished.status {
        StageStatus::Succeeded => tracing::info!(
            candidate_id = %store.candidate_id(),
            %stage,
            elapsed_ms,
            "stage succeeded"
        ),
        _ => tracing::warn!(
            candidate_id = %store.candidate_id(),
            %stage,
            elapsed_ms,
            screened_out = finished.screened_out,
            error = finished.error_detail.as_deref().unwrap_or(""),
            "stage failed"
        ),
    }
    Ok(RunOutcome::Finished(finished))
}

fn classify(
    paths: &CandidatePaths,
    running: &StageRecord,
    request: &StageRequest,
    exit: &CollaboratorExit,
    check: Option<ResultCheck>,
) -> StageRecord {
    let now = Utc::now();
    if exit.timed_out {
        return running.fail(
            now,
            detail(&format!("timed out after {} ms", exit.duration_ms), &exit.diagnostics),
        );
    }
    if !exit.ok() {
        let status = match exit.exit_code {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_string(),
        };
        return running.fail(now, detail(&status, &exit.diagnostics));
    }

    let missing = missing_outputs(paths, request);
    if !missing.is_empty() {
        return running.fail(
            now,
            format!(
                "exited 0 but declared output missing or empty: {}",
                missing.join(", ")
            ),
        );
    }

    let succeeded = running.succeed(now, request.output_rels.clone());
    match check.map(|check| check(paths)) {
        None | Some(Ok(Verdict::Accept)) => succeeded,
        Some(Ok(Verdict::ScreenOut(reason))) => succeeded.screen_out(now, reason),
        Some(Err(err)) => {
            running.fail(now, format!("unreadable {} result: {err:#}", request.stage))
        }
    }
}

/// Declared outputs that are absent (or empty, except intake's raw files,
/// which only need to exist).
fn missing_outputs(paths: &CandidatePaths, request: &StageRequest) -> Vec<String> {
    request
        .output_rels
        .iter()
        .filter(|rel| {
            let path = paths.resolve(rel);
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => {
                    request.stage != StageName::Intake && meta.len() == 0
                }
                _ => true,
            }
        })
        .cloned()
        .collect()
}

fn detail(status: &str, diagnostics: &str) -> String {
    if diagnostics.is_empty() {
        status.to_string()
    } else {
        truncate_string(&format!("{status}: {diagnostics}"), MAX_ERROR_DETAIL_BYTES)
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
