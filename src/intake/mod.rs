//! Bundle Clusterer: turns the staging directory into candidates.
//!
//! A pass holds `intake.lock` for its whole duration. Each accepted bundle is
//! first described in `intake.journal.json`, then moved; a later pass that
//! finds a journal finishes that bundle before clustering anything new.
mod cluster;
mod identity;

pub use cluster::ClusterOrigin;

use crate::staging::{list_visible_files, move_file, write_json_atomic};
use crate::store::{try_lock, CandidateStore};
use crate::workspace::{
    self, CandidateManifest, InferredMetadata, InteractionEvent, InteractionKind, IntakeConfig,
    JobContext, JobPaths, PipelineConfig, StageName, StageRecord, StageStatus, WorkspacePaths,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use cluster::{cluster_files, extension_of, Cluster, ClusterRules, DeclaredGroup, StagedFile};
use identity::{
    candidate_id, declared_members, infer_metadata, is_sidecar_name, load_sidecar,
    primary_resume, random_suffix, Sidecar,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;

const JOURNAL_SCHEMA_VERSION: u32 = 1;
const MAX_ID_ATTEMPTS: usize = 16;

/// A bundle that became (or, in dry-run, would become) a candidate.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptedBundle {
    pub candidate_id: String,
    pub origin: ClusterOrigin,
    pub files: Vec<String>,
    pub metadata: InferredMetadata,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub recovered: bool,
}

/// A cluster left in staging.
#[derive(Debug, Clone, Serialize)]
pub struct HeldBundle {
    pub files: Vec<String>,
    pub reason: String,
}

/// Outcome of one clustering pass.
#[derive(Debug, Clone, Serialize)]
pub struct IntakeReport {
    pub job_id: String,
    pub dry_run: bool,
    pub accepted: Vec<AcceptedBundle>,
    pub held: Vec<HeldBundle>,
    pub issues: Vec<String>,
}

impl IntakeReport {
    fn new(job_id: &str, dry_run: bool) -> Self {
        Self {
            job_id: job_id.to_string(),
            dry_run,
            accepted: Vec::new(),
            held: Vec::new(),
            issues: Vec::new(),
        }
    }
}

/// In-flight bundle written before any file moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IntakeJournal {
    schema_version: u32,
    job_id: String,
    candidate_id: String,
    origin: ClusterOrigin,
    files: Vec<String>,
    metadata: InferredMetadata,
    #[serde(default)]
    issues: Vec<String>,
    started_at: DateTime<Utc>,
}

enum BundleOutcome {
    Accepted(AcceptedBundle),
    Held(HeldBundle),
}

struct PlannedBundle {
    cluster: Cluster,
    metadata: InferredMetadata,
    issues: Vec<String>,
}

struct IntakePlan {
    bundles: Vec<PlannedBundle>,
    held: Vec<HeldBundle>,
    issues: Vec<String>,
}

/// Run one clustering pass over the staging directory for `job`.
///
/// Fails fast when another pass holds the staging lock. In dry-run mode the
/// plan is reported and nothing on disk changes.
pub fn run_intake(
    paths: &WorkspacePaths,
    job_paths: &JobPaths,
    job: &JobContext,
    config: &PipelineConfig,
    dry_run: bool,
) -> Result<IntakeReport> {
    let mut report = IntakeReport::new(job_paths.job_id(), dry_run);

    if dry_run {
        let plan = plan_bundles(paths, config)?;
        report.issues = plan.issues;
        report.held = plan.held;
        for bundle in plan.bundles {
            let suffix = random_suffix(config.intake.suffix_len);
            report.accepted.push(AcceptedBundle {
                candidate_id: candidate_id(
                    job,
                    &bundle.metadata,
                    newest_mtime(&bundle.cluster),
                    &suffix,
                ),
                origin: bundle.cluster.origin,
                files: bundle.cluster.names(),
                metadata: bundle.metadata,
                issues: bundle.issues,
                recovered: false,
            });
        }
        return Ok(report);
    }

    let lock_path = paths.intake_lock_path();
    let _lock = try_lock(&lock_path)?.ok_or_else(|| {
        anyhow!(
            "another intake pass holds {}; skipping this cycle",
            lock_path.display()
        )
    })?;

    let journal_path = paths.intake_journal_path();
    if journal_path.is_file() {
        let journal: IntakeJournal = workspace::read_json(&journal_path)?;
        tracing::warn!(
            candidate_id = %journal.candidate_id,
            files = journal.files.len(),
            "finishing interrupted intake bundle"
        );
        match complete_journal(paths, &config.intake, &journal)? {
            BundleOutcome::Accepted(mut bundle) => {
                bundle.recovered = true;
                report.accepted.push(bundle);
            }
            BundleOutcome::Held(held) => report.held.push(held),
        }
    }

    let plan = plan_bundles(paths, config)?;
    report.issues.extend(plan.issues);
    for held in plan.held {
        tracing::info!(files = ?held.files, reason = %held.reason, "bundle held in staging");
        report.held.push(held);
    }
    for bundle in plan.bundles {
        match materialize(paths, job_paths, job, &config.intake, bundle) {
            Ok(BundleOutcome::Accepted(accepted)) => report.accepted.push(accepted),
            Ok(BundleOutcome::Held(held)) => report.held.push(held),
            Err(err) => {
                // The journal stays behind; the next pass finishes this bundle.
                tracing::error!(error = %format!("{err:#}"), "intake pass stopped");
                report.issues.push(format!("intake stopped: {err:#}"));
                break;
            }
        }
    }
    Ok(report)
}

fn plan_bundles(paths: &WorkspacePaths, config: &PipelineConfig) -> Result<IntakePlan> {
    let intake = &config.intake;
    let (files, mut issues) = scan_staging(&paths.inbox_dir())?;

    let mut sidecars: BTreeMap<String, Sidecar> = BTreeMap::new();
    let mut declared = Vec::new();
    for file in files.iter().filter(|file| is_sidecar_name(&file.name)) {
        match load_sidecar(&file.path) {
            Ok(sidecar) => {
                declared.push(DeclaredGroup {
                    sidecar: file.name.clone(),
                    members: declared_members(&file.name, &sidecar, &files),
                });
                sidecars.insert(file.name.clone(), sidecar);
            }
            Err(err) => issues.push(format!("{}: sidecar ignored: {err:#}", file.name)),
        }
    }

    let window_secs = i64::try_from(intake.proximity_window_seconds)
        .unwrap_or(i64::MAX)
        .min(i64::MAX / 1000);
    let rules = ClusterRules {
        window: Duration::seconds(window_secs),
        similarity_threshold: intake.similarity_threshold,
        container_extensions: intake.container_extensions.clone(),
    };

    let mut plan = IntakePlan {
        bundles: Vec::new(),
        held: Vec::new(),
        issues,
    };
    for cluster in cluster_files(&files, &declared, &rules) {
        let mut bundle_issues: Vec<String> = cluster
            .files
            .iter()
            .filter_map(|file| {
                file_problem(&file.path).map(|problem| format!("{}: {problem}", file.name))
            })
            .collect();
        if !cluster.files.iter().any(|file| is_resume_bearing(&file.path, intake)) {
            plan.held.push(HeldBundle {
                files: cluster.names(),
                reason: "no resume-like file".to_string(),
            });
            continue;
        }
        let sidecar = cluster.files.iter().find_map(|file| sidecars.get(&file.name));
        let primary = primary_resume(
            &cluster,
            &intake.resume_extensions,
            &intake.container_extensions,
        );
        let (metadata, metadata_issues) = infer_metadata(&cluster, sidecar, primary);
        bundle_issues.extend(metadata_issues);
        plan.bundles.push(PlannedBundle {
            cluster,
            metadata,
            issues: bundle_issues,
        });
    }
    Ok(plan)
}

fn scan_staging(inbox: &Path) -> Result<(Vec<StagedFile>, Vec<String>)> {
    let mut files = Vec::new();
    let mut issues = Vec::new();
    for path in list_visible_files(inbox)? {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let stat = match fs::metadata(&path) {
            Ok(meta) => meta.modified().map(|modified| (modified, meta.len())),
            Err(err) => Err(err),
        };
        match stat {
            Ok((modified, size)) => files.push(StagedFile {
                path,
                name,
                modified: DateTime::<Utc>::from(modified),
                size,
            }),
            Err(err) => issues.push(format!("{name}: unreadable, left in staging: {err}")),
        }
    }
    Ok((files, issues))
}

/// Why a file cannot count toward the resume-presence check.
fn file_problem(path: &Path) -> Option<String> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => return Some("empty file".to_string()),
        Ok(_) => {}
        Err(err) => return Some(format!("unreadable: {err}")),
    }
    File::open(path).err().map(|err| format!("unreadable: {err}"))
}

/// Resume-like (or container) extension, non-empty, and readable.
fn is_resume_bearing(path: &Path, intake: &IntakeConfig) -> bool {
    let ext = extension_of(path);
    let resume_like =
        intake.resume_extensions.contains(&ext) || intake.container_extensions.contains(&ext);
    resume_like && file_problem(path).is_none()
}

fn newest_mtime(cluster: &Cluster) -> DateTime<Utc> {
    cluster
        .files
        .iter()
        .map(|file| file.modified)
        .max()
        .unwrap_or_else(Utc::now)
}

fn allocate_candidate_id(
    job_paths: &JobPaths,
    job: &JobContext,
    metadata: &InferredMetadata,
    newest: DateTime<Utc>,
    suffix_len: usize,
) -> Result<String> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let id = candidate_id(job, metadata, newest, &random_suffix(suffix_len));
        if !job_paths.candidate(&id).root().exists() {
            return Ok(id);
        }
    }
    Err(anyhow!(
        "could not allocate a unique candidate id after {MAX_ID_ATTEMPTS} attempts"
    ))
}

fn materialize(
    paths: &WorkspacePaths,
    job_paths: &JobPaths,
    job: &JobContext,
    intake: &IntakeConfig,
    bundle: PlannedBundle,
) -> Result<BundleOutcome> {
    let candidate_id = allocate_candidate_id(
        job_paths,
        job,
        &bundle.metadata,
        newest_mtime(&bundle.cluster),
        intake.suffix_len,
    )?;
    let journal = IntakeJournal {
        schema_version: JOURNAL_SCHEMA_VERSION,
        job_id: job_paths.job_id().to_string(),
        candidate_id,
        origin: bundle.cluster.origin,
        files: bundle.cluster.names(),
        metadata: bundle.metadata,
        issues: bundle.issues,
        started_at: Utc::now(),
    };
    write_json_atomic(&paths.intake_journal_path(), &journal)?;
    complete_journal(paths, intake, &journal)
}

/// Move a journaled bundle into its candidate and record it.
///
/// Safe to repeat: files already in `raw/` are kept, and the manifest,
/// interaction entry, and intake record are each written at most once.
fn complete_journal(
    paths: &WorkspacePaths,
    intake: &IntakeConfig,
    journal: &IntakeJournal,
) -> Result<BundleOutcome> {
    let job_paths = paths.job(&journal.job_id);
    // Intake records are terminal; staleness never applies to them.
    let store = CandidateStore::open(&job_paths, &journal.candidate_id, std::time::Duration::MAX);
    store.ensure()?;
    let guard = store.try_lock()?.ok_or_else(|| {
        anyhow!(
            "candidate {} is locked by another process",
            journal.candidate_id
        )
    })?;

    let inbox = paths.inbox_dir();
    let raw = store.paths().raw_dir();
    let mut issues = journal.issues.clone();
    let mut moved = Vec::new();
    for name in &journal.files {
        let source = inbox.join(name);
        let dest = raw.join(name);
        if dest.exists() {
            moved.push(name.clone());
            continue;
        }
        if !source.exists() {
            issues.push(format!("{name}: no longer in staging"));
            continue;
        }
        match move_file(&source, &dest) {
            Ok(()) => moved.push(name.clone()),
            Err(err) => issues.push(format!("{name}: not moved: {err:#}")),
        }
    }

    if !moved.iter().any(|name| is_resume_bearing(&raw.join(name), intake)) {
        drop(guard);
        for name in &moved {
            if let Err(err) = move_file(&raw.join(name), &inbox.join(name)) {
                tracing::warn!(
                    file = %name,
                    error = %format!("{err:#}"),
                    "could not return file to staging"
                );
            }
        }
        if !store.exists() {
            if let Err(err) = fs::remove_dir_all(store.paths().root()) {
                tracing::warn!(error = %err, "could not remove abandoned candidate directory");
            }
        }
        remove_journal(paths)?;
        tracing::info!(files = ?journal.files, "bundle held: no resume-like file could be moved");
        return Ok(BundleOutcome::Held(HeldBundle {
            files: journal.files.clone(),
            reason: "no resume-like file could be moved".to_string(),
        }));
    }

    let raw_files: Vec<String> = moved.iter().map(|name| format!("raw/{name}")).collect();
    if !store.exists() {
        let mut manifest =
            CandidateManifest::new(&journal.candidate_id, &journal.job_id, raw_files.clone());
        manifest.metadata = journal.metadata.clone();
        manifest.intake_issues = issues.clone();
        store.create_manifest(&manifest)?;
    }

    let logged = store
        .read_interactions()?
        .iter()
        .any(|event| event.kind == InteractionKind::Intake);
    if !logged {
        let event = InteractionEvent::new(
            InteractionKind::Intake,
            format!("received {} file(s) from staging", moved.len()),
        )
        .with_stage(StageName::Intake)
        .with_data(serde_json::json!({
            "source_files": moved,
            "origin": journal.origin,
            "metadata": journal.metadata,
            "issues": issues,
        }));
        store.append_interaction(&event)?;
    }

    let record = store.read_stage_record(StageName::Intake)?;
    if record.status != StageStatus::Succeeded {
        let now = Utc::now();
        let finished = StageRecord::pending(StageName::Intake)
            .start_attempt(now)
            .succeed(now, raw_files);
        store.write_stage_record(&guard, &finished)?;
    }

    remove_journal(paths)?;
    tracing::info!(
        candidate_id = %journal.candidate_id,
        files = moved.len(),
        issues = issues.len(),
        "bundle accepted"
    );
    Ok(BundleOutcome::Accepted(AcceptedBundle {
        candidate_id: journal.candidate_id.clone(),
        origin: journal.origin,
        files: moved,
        metadata: journal.metadata.clone(),
        issues,
        recovered: false,
    }))
}

fn remove_journal(paths: &WorkspacePaths) -> Result<()> {
    let path = paths.intake_journal_path();
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

#[cfg(test)]
#[path = "intake_tests.rs"]
mod tests;
