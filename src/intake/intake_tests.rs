use super::{run_intake, ClusterOrigin, IntakeJournal, JOURNAL_SCHEMA_VERSION};
use crate::staging::write_json_atomic;
use crate::store::{list_candidates, try_lock, CandidateStore};
use crate::workspace::{
    InferredMetadata, InteractionKind, JobContext, PipelineConfig, StageName, StageStatus,
    WorkspacePaths, JOB_SCHEMA_VERSION,
};
use chrono::Utc;
use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const JOB_ID: &str = "eng-001";

fn job() -> JobContext {
    JobContext {
        schema_version: JOB_SCHEMA_VERSION,
        job_id: JOB_ID.into(),
        role_code: "ENG".into(),
        title: Some("Backend Engineer".into()),
        created_at: Utc::now(),
    }
}

fn stage_file(root: &Path, name: &str, body: &str, offset_secs: u64) {
    let path = root.join("inbox").join(name);
    fs::create_dir_all(path.parent().expect("parent")).expect("create inbox");
    fs::write(&path, body).expect("write staged file");
    let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_772_442_000);
    File::options()
        .write(true)
        .open(&path)
        .expect("open staged file")
        .set_modified(base + Duration::from_secs(offset_secs))
        .expect("set mtime");
}

fn intake(dir: &TempDir, dry_run: bool) -> super::IntakeReport {
    let paths = WorkspacePaths::new(dir.path().to_path_buf());
    let job_paths = paths.job(JOB_ID);
    run_intake(&paths, &job_paths, &job(), &PipelineConfig::default(), dry_run).expect("intake")
}

fn inbox_names(dir: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir.path().join("inbox"))
        .expect("read inbox")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

fn store(dir: &TempDir, candidate_id: &str) -> CandidateStore {
    let job_paths = WorkspacePaths::new(dir.path().to_path_buf()).job(JOB_ID);
    CandidateStore::open(&job_paths, candidate_id, Duration::from_secs(600))
}

#[test]
fn resume_and_cover_letter_become_one_candidate() {
    let dir = TempDir::new().expect("temp dir");
    stage_file(dir.path(), "alice-resume.md", "# Alice", 0);
    stage_file(dir.path(), "alice-coverletter.pdf", "%PDF", 90);

    let report = intake(&dir, false);
    assert_eq!(report.accepted.len(), 1);
    assert!(report.held.is_empty());
    assert!(inbox_names(&dir).is_empty());

    let accepted = &report.accepted[0];
    assert!(accepted.candidate_id.starts_with("eng-alice-20260302-"));
    let store = store(&dir, &accepted.candidate_id);
    let manifest = store.read_manifest().expect("manifest");
    assert_eq!(
        manifest.raw_files,
        vec!["raw/alice-resume.md", "raw/alice-coverletter.pdf"]
    );
    assert!(store.paths().raw_dir().join("alice-coverletter.pdf").is_file());

    let record = store.read_stage_record(StageName::Intake).expect("record");
    assert_eq!(record.status, StageStatus::Succeeded);
    assert_eq!(record.output_paths, manifest.raw_files);

    let events = store.read_interactions().expect("interactions");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, InteractionKind::Intake);
}

#[test]
fn applicants_three_minutes_apart_become_two_candidates() {
    let dir = TempDir::new().expect("temp dir");
    stage_file(dir.path(), "alice-resume.md", "# Alice", 0);
    stage_file(dir.path(), "bob-resume.md", "# Bob", 180);

    let report = intake(&dir, false);
    assert_eq!(report.accepted.len(), 2);
    let job_paths = WorkspacePaths::new(dir.path().to_path_buf()).job(JOB_ID);
    assert_eq!(list_candidates(&job_paths).expect("list").len(), 2);
}

#[test]
fn bundle_without_resume_stays_in_staging() {
    let dir = TempDir::new().expect("temp dir");
    stage_file(dir.path(), "carol-photo.png", "png", 0);
    stage_file(dir.path(), "carol-notes.json", "{}", 10);

    let report = intake(&dir, false);
    assert!(report.accepted.is_empty());
    assert!(!report.held.is_empty());
    assert_eq!(inbox_names(&dir), vec!["carol-notes.json", "carol-photo.png"]);
    assert!(!dir.path().join("jobs").join(JOB_ID).join("candidates").exists());
}

#[test]
fn empty_resume_does_not_count_but_other_files_carry_the_bundle() {
    let dir = TempDir::new().expect("temp dir");
    stage_file(dir.path(), "dave-resume.md", "", 0);
    stage_file(dir.path(), "dave-cover.pdf", "%PDF", 30);

    let report = intake(&dir, false);
    assert_eq!(report.accepted.len(), 1);
    let accepted = &report.accepted[0];
    assert_eq!(accepted.files.len(), 2);
    assert!(accepted
        .issues
        .iter()
        .any(|issue| issue.contains("dave-resume.md") && issue.contains("empty")));

    let dir = TempDir::new().expect("temp dir");
    stage_file(dir.path(), "erin-resume.md", "", 0);
    let report = intake(&dir, false);
    assert!(report.accepted.is_empty());
    assert_eq!(inbox_names(&dir), vec!["erin-resume.md"]);
}

#[test]
fn second_pass_is_a_no_op() {
    let dir = TempDir::new().expect("temp dir");
    stage_file(dir.path(), "alice-resume.md", "# Alice", 0);
    let first = intake(&dir, false);
    assert_eq!(first.accepted.len(), 1);

    let second = intake(&dir, false);
    assert!(second.accepted.is_empty());
    assert!(second.held.is_empty());
    let job_paths = WorkspacePaths::new(dir.path().to_path_buf()).job(JOB_ID);
    assert_eq!(list_candidates(&job_paths).expect("list").len(), 1);
}

#[test]
fn dry_run_reports_without_moving() {
    let dir = TempDir::new().expect("temp dir");
    stage_file(dir.path(), "alice-resume.md", "# Alice", 0);
    stage_file(dir.path(), "ghost.png", "png", 3600);

    let report = intake(&dir, true);
    assert!(report.dry_run);
    assert_eq!(report.accepted.len(), 1);
    assert_eq!(report.held.len(), 1);
    assert_eq!(inbox_names(&dir), vec!["alice-resume.md", "ghost.png"]);
    assert!(!dir.path().join("jobs").exists());
    assert!(!dir.path().join("intake.lock").exists());
}

#[test]
fn sidecar_names_the_candidate_and_claims_unrelated_files() {
    let dir = TempDir::new().expect("temp dir");
    stage_file(dir.path(), "scan0001.pdf", "%PDF", 0);
    stage_file(dir.path(), "attachment-2.docx", "docx", 5);
    stage_file(
        dir.path(),
        "applicant.meta.json",
        r#"{"name": "Fatima Khan", "email": "fk@example.com", "applied_date": "2026/01/20",
            "files": ["scan0001.pdf", "attachment-2.docx"]}"#,
        6,
    );

    let report = intake(&dir, false);
    assert_eq!(report.accepted.len(), 1);
    let accepted = &report.accepted[0];
    assert_eq!(accepted.origin, ClusterOrigin::Sidecar);
    assert!(accepted.candidate_id.starts_with("eng-fatima-khan-20260120-"));
    assert_eq!(accepted.metadata.email.as_deref(), Some("fk@example.com"));
    assert_eq!(accepted.files.len(), 3);
}

#[test]
fn unreadable_sidecar_is_recorded_and_ignored() {
    let dir = TempDir::new().expect("temp dir");
    stage_file(dir.path(), "gus-resume.pdf", "%PDF", 0);
    stage_file(dir.path(), "gus.meta.json", "{not json", 1);

    let report = intake(&dir, false);
    assert!(report
        .issues
        .iter()
        .any(|issue| issue.contains("gus.meta.json")));
    assert_eq!(report.accepted.len(), 1);
}

#[test]
fn interrupted_bundle_is_finished_before_new_work() {
    let dir = TempDir::new().expect("temp dir");
    let paths = WorkspacePaths::new(dir.path().to_path_buf());
    let candidate_id = "eng-hana-20260302-abc123";
    let store = store(&dir, candidate_id);
    store.ensure().expect("ensure");
    fs::write(store.paths().raw_dir().join("hana-cover.pdf"), "%PDF").expect("moved file");
    stage_file(dir.path(), "hana-resume.md", "# Hana", 0);
    let journal = IntakeJournal {
        schema_version: JOURNAL_SCHEMA_VERSION,
        job_id: JOB_ID.into(),
        candidate_id: candidate_id.into(),
        origin: ClusterOrigin::Proximity,
        files: vec!["hana-resume.md".into(), "hana-cover.pdf".into()],
        metadata: InferredMetadata {
            name: Some("hana".into()),
            ..InferredMetadata::default()
        },
        issues: Vec::new(),
        started_at: Utc::now(),
    };
    write_json_atomic(&paths.intake_journal_path(), &journal).expect("journal");

    let report = intake(&dir, false);
    assert_eq!(report.accepted.len(), 1);
    assert!(report.accepted[0].recovered);
    assert!(!paths.intake_journal_path().exists());
    assert!(inbox_names(&dir).is_empty());
    let manifest = store.read_manifest().expect("manifest");
    assert_eq!(manifest.raw_files, vec!["raw/hana-resume.md", "raw/hana-cover.pdf"]);
}

#[test]
fn busy_staging_lock_fails_the_pass() {
    let dir = TempDir::new().expect("temp dir");
    stage_file(dir.path(), "alice-resume.md", "# Alice", 0);
    let paths = WorkspacePaths::new(dir.path().to_path_buf());
    let _held = try_lock(&paths.intake_lock_path())
        .expect("lock")
        .expect("free");
    let result = run_intake(
        &paths,
        &paths.job(JOB_ID),
        &job(),
        &PipelineConfig::default(),
        false,
    );
    assert!(result.is_err());
    assert_eq!(inbox_names(&dir), vec!["alice-resume.md"]);
}
