use super::{
    collaborator_for, run_stage, Collaborator, CollaboratorExit, ProcessCollaborator, RunOptions,
    RunOutcome, StageRequest, Verdict,
};
use crate::store::{CandidateLock, CandidateStore};
use crate::workspace::{
    CandidateManifest, CandidatePaths, CollaboratorSpec, PipelineConfig, StageName, StageStatus,
    WorkspacePaths,
};
use anyhow::Result;
use std::cell::Cell;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const JOB_ID: &str = "eng-001";
const CANDIDATE_ID: &str = "eng-alice-20260302-abc123";

struct Fake {
    writes: Vec<(&'static str, &'static str)>,
    exit_code: Option<i32>,
    diagnostics: &'static str,
    calls: Cell<u32>,
}

impl Fake {
    fn writing(writes: &[(&'static str, &'static str)]) -> Self {
        Self {
            writes: writes.to_vec(),
            exit_code: Some(0),
            diagnostics: "",
            calls: Cell::new(0),
        }
    }

    fn exiting(code: i32, diagnostics: &'static str) -> Self {
        Self {
            writes: Vec::new(),
            exit_code: Some(code),
            diagnostics,
            calls: Cell::new(0),
        }
    }
}

impl Collaborator for Fake {
    fn invoke(&self, request: &StageRequest) -> Result<CollaboratorExit> {
        self.calls.set(self.calls.get() + 1);
        if !request.preview {
            for (rel, body) in &self.writes {
                let path = request.candidate_dir.join(rel);
                fs::create_dir_all(path.parent().expect("parent"))?;
                fs::write(path, body)?;
            }
        }
        Ok(CollaboratorExit {
            exit_code: self.exit_code,
            timed_out: false,
            duration_ms: 1,
            diagnostics: self.diagnostics.to_string(),
        })
    }
}

fn setup(dir: &TempDir) -> (CandidateStore, CandidateLock) {
    let job = WorkspacePaths::new(dir.path().to_path_buf()).job(JOB_ID);
    let store = CandidateStore::open(&job, CANDIDATE_ID, Duration::from_secs(600));
    store.ensure().expect("ensure");
    fs::write(store.paths().raw_dir().join("alice.md"), "# Alice").expect("raw file");
    store
        .create_manifest(&CandidateManifest::new(
            CANDIDATE_ID,
            JOB_ID,
            vec!["raw/alice.md".into()],
        ))
        .expect("manifest");
    let lock = store.try_lock().expect("lock").expect("free");
    (store, lock)
}

fn request(store: &CandidateStore, stage: StageName, preview: bool) -> StageRequest {
    StageRequest::build(store, JOB_ID, stage, None, preview).expect("request")
}

fn finished(outcome: RunOutcome) -> crate::workspace::StageRecord {
    match outcome {
        RunOutcome::Finished(record) => record,
        other => panic!("expected a finished run, got {other:?}"),
    }
}

#[test]
fn success_records_outputs_and_second_run_is_a_no_op() {
    let dir = TempDir::new().expect("temp dir");
    let (store, lock) = setup(&dir);
    let parser = Fake::writing(&[("parsed/text.md", "Alice"), ("parsed/fields.json", "{}")]);
    let req = request(&store, StageName::Parse, false);
    assert_eq!(req.inputs, vec![store.paths().resolve("raw/alice.md")]);

    let record = finished(run_stage(&store, &lock, &req, &parser, RunOptions::default()).expect("run"));
    assert_eq!(record.status, StageStatus::Succeeded);
    assert_eq!(record.output_paths, vec!["parsed/text.md", "parsed/fields.json"]);
    assert_eq!(record.attempt_count, 1);

    let again = run_stage(&store, &lock, &req, &parser, RunOptions::default()).expect("rerun");
    assert!(matches!(again, RunOutcome::Noop(_)));
    assert_eq!(parser.calls.get(), 1);
    assert_eq!(store.read_stage_record(StageName::Parse).expect("read"), record);
}

#[test]
fn exit_zero_without_declared_output_fails() {
    let dir = TempDir::new().expect("temp dir");
    let (store, lock) = setup(&dir);
    let summarizer = Fake::writing(&[]);
    let req = request(&store, StageName::Summarize, false);
    let record =
        finished(run_stage(&store, &lock, &req, &summarizer, RunOptions::default()).expect("run"));
    assert_eq!(record.status, StageStatus::Failed);
    let detail = record.error_detail.expect("detail");
    assert!(detail.contains("outputs/summary.md"), "{detail}");
}

#[test]
fn empty_declared_output_fails() {
    let dir = TempDir::new().expect("temp dir");
    let (store, lock) = setup(&dir);
    let summarizer = Fake::writing(&[("outputs/summary.md", "")]);
    let req = request(&store, StageName::Summarize, false);
    let record =
        finished(run_stage(&store, &lock, &req, &summarizer, RunOptions::default()).expect("run"));
    assert_eq!(record.status, StageStatus::Failed);
}

#[test]
fn non_zero_exit_keeps_diagnostics() {
    let dir = TempDir::new().expect("temp dir");
    let (store, lock) = setup(&dir);
    let scorer = Fake::exiting(3, "rubric missing");
    let req = request(&store, StageName::Score, false);
    let record = finished(run_stage(&store, &lock, &req, &scorer, RunOptions::default()).expect("run"));
    assert_eq!(record.status, StageStatus::Failed);
    let detail = record.error_detail.expect("detail");
    assert!(detail.contains("status 3") && detail.contains("rubric missing"), "{detail}");

    let events = store.read_interactions().expect("interactions");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].stage, Some(StageName::Score));
}

#[test]
fn force_reruns_a_succeeded_stage() {
    let dir = TempDir::new().expect("temp dir");
    let (store, lock) = setup(&dir);
    let summarizer = Fake::writing(&[("outputs/summary.md", "ok")]);
    let req = request(&store, StageName::Summarize, false);
    run_stage(&store, &lock, &req, &summarizer, RunOptions::default()).expect("first");
    let forced = RunOptions {
        force: true,
        ..RunOptions::default()
    };
    let record = finished(run_stage(&store, &lock, &req, &summarizer, forced).expect("forced"));
    assert_eq!(record.attempt_count, 2);
    assert_eq!(summarizer.calls.get(), 2);
}

fn reject_all(_paths: &CandidatePaths) -> Result<Verdict> {
    Ok(Verdict::ScreenOut("no work authorization".into()))
}

#[test]
fn screen_out_check_marks_the_record() {
    let dir = TempDir::new().expect("temp dir");
    let (store, lock) = setup(&dir);
    let gate = Fake::writing(&[("outputs/gate.json", r#"{"verdict":"fail"}"#)]);
    let req = request(&store, StageName::Gate, false);
    let options = RunOptions {
        check: Some(reject_all),
        ..RunOptions::default()
    };
    let record = finished(run_stage(&store, &lock, &req, &gate, options).expect("run"));
    assert_eq!(record.status, StageStatus::Failed);
    assert!(record.screened_out);
    assert_eq!(record.error_detail.as_deref(), Some("no work authorization"));
}

#[test]
fn preview_records_nothing() {
    let dir = TempDir::new().expect("temp dir");
    let (store, lock) = setup(&dir);
    let parser = Fake::writing(&[("parsed/text.md", "Alice")]);
    let req = request(&store, StageName::Parse, true);
    let outcome = run_stage(&store, &lock, &req, &parser, RunOptions::default()).expect("preview");
    assert!(matches!(outcome, RunOutcome::Previewed { .. }));
    let record = store.read_stage_record(StageName::Parse).expect("read");
    assert_eq!(record.status, StageStatus::Pending);
    assert!(!store.paths().stage_record_path(StageName::Parse).exists());
    assert!(store.read_interactions().expect("interactions").is_empty());
}

#[test]
fn unconfigured_stage_fails_with_a_reason() {
    let dir = TempDir::new().expect("temp dir");
    let (store, lock) = setup(&dir);
    let config = PipelineConfig::default();
    let collaborator = collaborator_for(&config, StageName::Score, dir.path());
    let req = request(&store, StageName::Score, false);
    let record = finished(
        run_stage(&store, &lock, &req, collaborator.as_ref(), RunOptions::default()).expect("run"),
    );
    assert_eq!(record.status, StageStatus::Failed);
    assert!(record
        .error_detail
        .expect("detail")
        .contains("no collaborator configured"));
}

#[test]
fn process_collaborator_follows_the_contract() {
    let dir = TempDir::new().expect("temp dir");
    let (store, lock) = setup(&dir);
    let spec = CollaboratorSpec {
        command: r#"sh -c 'mkdir -p "$CFLOW_CANDIDATE_DIR/parsed" && echo "$CFLOW_STAGE" > "$CFLOW_CANDIDATE_DIR/parsed/text.md" && echo "{}" > "$CFLOW_CANDIDATE_DIR/parsed/fields.json"'"#.into(),
        timeout_seconds: Some(30),
    };
    let parser = ProcessCollaborator::from_spec(&spec, 600, dir.path()).expect("spec");
    let req = request(&store, StageName::Parse, false);
    let record = finished(run_stage(&store, &lock, &req, &parser, RunOptions::default()).expect("run"));
    assert_eq!(record.status, StageStatus::Succeeded, "{:?}", record.error_detail);
    let text = fs::read_to_string(store.paths().resolve("parsed/text.md")).expect("text");
    assert_eq!(text.trim(), "parse");

    let request_file = store.paths().work_dir().join("parse.request.json");
    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(request_file).expect("request")).expect("json");
    assert_eq!(written["candidate_id"], CANDIDATE_ID);
    assert_eq!(written["contract_version"], 1);
}

#[test]
fn process_collaborator_is_killed_at_the_timeout() {
    let dir = TempDir::new().expect("temp dir");
    let (store, lock) = setup(&dir);
    let spec = CollaboratorSpec {
        command: "sh -c 'sleep 30'".into(),
        timeout_seconds: Some(1),
    };
    let slow = ProcessCollaborator::from_spec(&spec, 600, dir.path()).expect("spec");
    let req = request(&store, StageName::Summarize, false);
    let record = finished(run_stage(&store, &lock, &req, &slow, RunOptions::default()).expect("run"));
    assert_eq!(record.status, StageStatus::Failed);
    assert!(record.error_detail.expect("detail").contains("timed out"));
}
