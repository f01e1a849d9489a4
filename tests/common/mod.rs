//! Shared test infrastructure for integration tests.
//!
//! Each test gets a temporary workspace, a job, and small `sh` collaborators
//! that follow the stage contract.
#![allow(dead_code)]

use serde_json::{json, Value};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

pub const JOB_ID: &str = "eng-001";

/// 2026-03-02T09:00:00Z, the mtime origin for staged files.
const BASE_EPOCH_SECS: u64 = 1_772_442_000;

const PREAMBLE: &str = "set -e\nif [ \"$CFLOW_PREVIEW\" = 1 ]; then exit 0; fi\n";

const PARSE: &str = r#"mkdir -p "$CFLOW_CANDIDATE_DIR/parsed"
cat "$CFLOW_CANDIDATE_DIR"/raw/* > "$CFLOW_CANDIDATE_DIR/parsed/text.md"
echo '{}' > "$CFLOW_CANDIDATE_DIR/parsed/fields.json"
"#;

const GATE: &str = r#"case "$CFLOW_CANDIDATE_ID" in
  *bob*) echo '{"verdict":"fail","reasons":["requires relocation"]}' ;;
  *) echo '{"verdict":"pass","reasons":[]}' ;;
esac > "$CFLOW_CANDIDATE_DIR/outputs/gate.json"
"#;

const SCORE: &str = r#"case "$CFLOW_CANDIDATE_ID" in
  *carol*) d=MAYBE ;;
  *dave*) d=PASS ;;
  *) d=STRONG_INTERVIEW ;;
esac
echo "{\"decision\":\"$d\"}" > "$CFLOW_CANDIDATE_DIR/outputs/evaluation.json"
"#;

const SUMMARIZE: &str = r##"echo "# Summary for $CFLOW_CANDIDATE_ID" > "$CFLOW_CANDIDATE_DIR/outputs/summary.md"
"##;

const DRAFT: &str = r#"echo "Thanks for applying." > "$CFLOW_CANDIDATE_DIR/outputs/outreach_$CFLOW_OUTREACH_KIND.md"
"#;

/// A temporary workspace with one initialized job.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a workspace, run `cflow init`, and install the collaborators.
    pub fn setup() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let workspace = Self { dir };
        workspace.cflow_ok(&["init", "--job", JOB_ID, "--role-code", "ENG"]);
        workspace.install_collaborators(&[]);
        workspace
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("ws")
    }

    fn bin_dir(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    /// File the `send` collaborator appends to.
    pub fn sent_log(&self) -> PathBuf {
        self.dir.path().join("sent.log")
    }

    /// Write every collaborator script plus `config.json`; `overrides`
    /// replaces the body of the named scripts.
    pub fn install_collaborators(&self, overrides: &[(&str, &str)]) {
        fs::create_dir_all(self.bin_dir()).expect("bin dir");
        let send = format!(
            "echo \"$CFLOW_CANDIDATE_ID $CFLOW_OUTREACH_KIND\" >> \"{}\"\n",
            self.sent_log().display()
        );
        let defaults = [
            ("parse", PARSE.to_string()),
            ("gate", GATE.to_string()),
            ("score", SCORE.to_string()),
            ("summarize", SUMMARIZE.to_string()),
            ("draft-outreach", DRAFT.to_string()),
            ("send", send),
        ];
        let mut collaborators = serde_json::Map::new();
        for (key, body) in defaults {
            let body = overrides
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, body)| body.to_string())
                .unwrap_or(body);
            let path = self.bin_dir().join(format!("{key}.sh"));
            fs::write(&path, format!("{PREAMBLE}{body}")).expect("write script");
            collaborators.insert(
                key.to_string(),
                json!({ "command": format!("sh {}", path.display()), "timeout_seconds": 30 }),
            );
        }
        let config = json!({
            "schema_version": 1,
            "collaborators": collaborators,
        });
        fs::write(
            self.root().join("config.json"),
            serde_json::to_vec_pretty(&config).expect("serialize config"),
        )
        .expect("write config");
    }

    /// Drop a file into the staging directory with a fixed mtime.
    pub fn stage(&self, name: &str, body: &str, offset_secs: u64) {
        let path = self.root().join("inbox").join(name);
        fs::write(&path, body).expect("write staged file");
        let modified =
            SystemTime::UNIX_EPOCH + Duration::from_secs(BASE_EPOCH_SECS + offset_secs);
        File::options()
            .write(true)
            .open(&path)
            .expect("open staged file")
            .set_modified(modified)
            .expect("set mtime");
    }

    pub fn inbox_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.root().join("inbox"))
            .expect("read inbox")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    pub fn job_dir(&self) -> PathBuf {
        self.root().join("jobs").join(JOB_ID)
    }

    pub fn candidate_dir(&self, candidate_id: &str) -> PathBuf {
        self.job_dir().join("candidates").join(candidate_id)
    }

    pub fn candidate_ids(&self) -> Vec<String> {
        let dir = self.job_dir().join("candidates");
        let mut ids: Vec<String> = fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Candidate whose id contains `name`.
    pub fn candidate_named(&self, name: &str) -> String {
        self.candidate_ids()
            .into_iter()
            .find(|id| id.contains(name))
            .unwrap_or_else(|| panic!("no candidate named {name}"))
    }

    pub fn stage_record(&self, candidate_id: &str, stage: &str) -> Value {
        read_json(
            &self
                .candidate_dir(candidate_id)
                .join("stages")
                .join(format!("{stage}.json")),
        )
    }

    pub fn cflow(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_cflow"))
            .arg("--root")
            .arg(self.root())
            .args(args)
            .env_remove("CFLOW_ROOT")
            .env_remove("RUST_LOG")
            .env("CFLOW_LOG", "warn")
            .output()
            .expect("run cflow")
    }

    /// Run cflow, assert success, and return stdout.
    pub fn cflow_ok(&self, args: &[&str]) -> String {
        let output = self.cflow(args);
        assert!(
            output.status.success(),
            "cflow {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    /// Run cflow with `--json` output and parse it.
    pub fn cflow_json(&self, args: &[&str]) -> Value {
        let stdout = self.cflow_ok(args);
        serde_json::from_str(&stdout).unwrap_or_else(|err| panic!("parse {stdout:?}: {err}"))
    }
}

pub fn read_json(path: &Path) -> Value {
    let text = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("read {}: {err}", path.display()));
    serde_json::from_str(&text).unwrap_or_else(|err| panic!("parse {}: {err}", path.display()))
}
