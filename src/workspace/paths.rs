//! Typed paths into the workspace layout.
//!
//! Centralizing path construction keeps file access consistent across intake,
//! the runner, and the approval queue.
use super::{OutreachKind, StageName};
use std::path::{Path, PathBuf};

/// Paths rooted at the workspace directory.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Return the workspace root used for path derivation.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `config.json` path.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Return the `inbox/` staging directory path.
    pub fn inbox_dir(&self) -> PathBuf {
        self.root.join("inbox")
    }

    /// Return the lock file guarding a clustering pass.
    pub fn intake_lock_path(&self) -> PathBuf {
        self.root.join("intake.lock")
    }

    /// Return the in-flight bundle journal path.
    pub fn intake_journal_path(&self) -> PathBuf {
        self.root.join("intake.journal.json")
    }

    /// Return the `jobs/` directory path.
    pub fn jobs_dir(&self) -> PathBuf {
        self.root.join("jobs")
    }

    /// Return the path helper for one job.
    pub fn job(&self, job_id: &str) -> JobPaths {
        JobPaths {
            workspace_root: self.root.clone(),
            root: self.jobs_dir().join(job_id),
            job_id: job_id.to_string(),
        }
    }
}

/// Paths rooted at `jobs/<job_id>/`.
#[derive(Debug, Clone)]
pub struct JobPaths {
    workspace_root: PathBuf,
    root: PathBuf,
    job_id: String,
}

impl JobPaths {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Return the `job.json` path.
    pub fn job_path(&self) -> PathBuf {
        self.root.join("job.json")
    }

    /// Return the `candidates/` directory path.
    pub fn candidates_dir(&self) -> PathBuf {
        self.root.join("candidates")
    }

    /// Return the path helper for one candidate.
    pub fn candidate(&self, candidate_id: &str) -> CandidatePaths {
        CandidatePaths {
            root: self.candidates_dir().join(candidate_id),
        }
    }

    /// Return the `approvals/` directory path.
    pub fn approvals_dir(&self) -> PathBuf {
        self.root.join("approvals")
    }

    /// Return the `approvals/manifest.json` path.
    pub fn approval_manifest_path(&self) -> PathBuf {
        self.approvals_dir().join("manifest.json")
    }

    /// Return the `approvals/audit.jsonl` path.
    pub fn approval_audit_path(&self) -> PathBuf {
        self.approvals_dir().join("audit.jsonl")
    }

    /// Return the lock file serializing manifest writers.
    pub fn approval_lock_path(&self) -> PathBuf {
        self.approvals_dir().join(".lock")
    }

    /// Return the lock file held for a whole send cycle.
    pub fn approval_send_lock_path(&self) -> PathBuf {
        self.approvals_dir().join("send.lock")
    }

    /// Return the `runs/` directory path.
    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    /// Return the `runs/<run_id>.json` path.
    pub fn run_summary_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir().join(format!("{run_id}.json"))
    }

    /// Return the `runs/history.jsonl` path.
    pub fn run_history_path(&self) -> PathBuf {
        self.runs_dir().join("history.jsonl")
    }
}

/// Paths rooted at one candidate directory.
#[derive(Debug, Clone)]
pub struct CandidatePaths {
    root: PathBuf,
}

impl CandidatePaths {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Return the `candidate.json` path.
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("candidate.json")
    }

    /// Return the `raw/` directory path.
    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    /// Return the `parsed/` directory path.
    pub fn parsed_dir(&self) -> PathBuf {
        self.root.join("parsed")
    }

    /// Return the `outputs/` directory path.
    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }

    /// Return the `stages/` directory path.
    pub fn stages_dir(&self) -> PathBuf {
        self.root.join("stages")
    }

    /// Return the `stages/<stage>.json` path.
    pub fn stage_record_path(&self, stage: StageName) -> PathBuf {
        self.stages_dir().join(format!("{}.json", stage.as_str()))
    }

    /// Return the `work/` directory holding collaborator requests and logs.
    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    /// Return the `interactions.jsonl` path.
    pub fn interactions_path(&self) -> PathBuf {
        self.root.join("interactions.jsonl")
    }

    /// Return the per-candidate advisory lock path.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// Return the `outputs/gate.json` path.
    pub fn gate_verdict_path(&self) -> PathBuf {
        self.outputs_dir().join("gate.json")
    }

    /// Return the `outputs/evaluation.json` path.
    pub fn evaluation_path(&self) -> PathBuf {
        self.outputs_dir().join("evaluation.json")
    }

    /// Return the drafted outreach artifact path for a kind.
    pub fn outreach_path(&self, kind: OutreachKind) -> PathBuf {
        self.root.join(kind.artifact_rel())
    }

    /// Candidate-relative declared outputs for collaborator-backed stages.
    pub fn declared_output_rels(
        &self,
        stage: StageName,
        kind: Option<OutreachKind>,
    ) -> Vec<String> {
        match stage {
            StageName::Intake => Vec::new(),
            StageName::Parse => vec!["parsed/text.md".into(), "parsed/fields.json".into()],
            StageName::Gate => vec!["outputs/gate.json".into()],
            StageName::Score => vec!["outputs/evaluation.json".into()],
            StageName::Summarize => vec!["outputs/summary.md".into()],
            StageName::DraftOutreach => kind.map(|kind| kind.artifact_rel()).into_iter().collect(),
        }
    }

    /// Resolve a candidate-relative path.
    pub fn resolve(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}

/// Convert an absolute path into a root-relative path string.
pub fn rel_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}
