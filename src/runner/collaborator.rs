//! External collaborator processes and the versioned request contract.
use crate::staging::write_json_atomic;
use crate::store::CandidateStore;
use crate::util::tail_file;
use crate::workspace::{
    CollaboratorSpec, OutreachKind, PipelineConfig, StageName, COLLABORATOR_CONTRACT_VERSION,
};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const REQUEST_SCHEMA_VERSION: u32 = 1;
const MAX_DIAGNOSTIC_BYTES: usize = 2000;
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One collaborator invocation, serialized to the request file.
#[derive(Debug, Clone, Serialize)]
pub struct StageRequest {
    pub schema_version: u32,
    pub contract_version: u32,
    pub job_id: String,
    pub candidate_id: String,
    pub stage: StageName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<OutreachKind>,
    pub candidate_dir: PathBuf,
    /// Upstream artifacts: raw files, then earlier stages' outputs.
    pub inputs: Vec<PathBuf>,
    /// Declared outputs the collaborator must write.
    pub outputs: Vec<PathBuf>,
    pub preview: bool,
    /// Candidate-relative form of `outputs`, recorded on success.
    #[serde(skip)]
    pub output_rels: Vec<String>,
    #[serde(skip)]
    pub work_dir: PathBuf,
}

impl StageRequest {
    /// Build the request for `stage` from what is on disk now.
    pub fn build(
        store: &CandidateStore,
        job_id: &str,
        stage: StageName,
        kind: Option<OutreachKind>,
        preview: bool,
    ) -> Result<Self> {
        let paths = store.paths();
        let manifest = store.read_manifest()?;
        let mut inputs: Vec<PathBuf> = manifest
            .raw_files
            .iter()
            .map(|rel| paths.resolve(rel))
            .collect();
        let upstream = StageName::ALL
            .into_iter()
            .filter(|earlier| *earlier > StageName::Intake && *earlier < stage);
        for earlier in upstream {
            inputs.extend(store.list_outputs(earlier)?);
        }
        let output_rels = match stage {
            StageName::Intake => manifest.raw_files.clone(),
            other => paths.declared_output_rels(other, kind),
        };
        Ok(Self {
            schema_version: REQUEST_SCHEMA_VERSION,
            contract_version: COLLABORATOR_CONTRACT_VERSION,
            job_id: job_id.to_string(),
            candidate_id: store.candidate_id().to_string(),
            stage,
            kind,
            candidate_dir: paths.root().to_path_buf(),
            inputs,
            outputs: output_rels.iter().map(|rel| paths.resolve(rel)).collect(),
            preview,
            output_rels,
            work_dir: paths.work_dir(),
        })
    }

    fn log_stem(&self) -> String {
        match self.kind {
            Some(kind) => format!("{}.{}", self.stage, kind),
            None => self.stage.to_string(),
        }
    }
}

/// How a collaborator process ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollaboratorExit {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u128,
    /// Tail of stderr (or stdout when stderr is empty).
    pub diagnostics: String,
}

impl CollaboratorExit {
    pub fn ok(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Performs one stage's content work behind a fixed contract.
pub trait Collaborator {
    /// Run to completion; `Err` only when the collaborator could not be run.
    fn invoke(&self, request: &StageRequest) -> Result<CollaboratorExit>;
}

/// Built-in intake check: intake already moved the files, so the declared
/// outputs (the raw files) only need to be present.
#[derive(Debug, Default)]
pub struct IntakeCheck;

impl Collaborator for IntakeCheck {
    fn invoke(&self, _request: &StageRequest) -> Result<CollaboratorExit> {
        Ok(CollaboratorExit {
            exit_code: Some(0),
            timed_out: false,
            duration_ms: 0,
            diagnostics: String::new(),
        })
    }
}

/// Stand-in for a stage with no usable collaborator; every attempt fails.
#[derive(Debug)]
pub struct Unconfigured {
    reason: String,
}

impl Collaborator for Unconfigured {
    fn invoke(&self, _request: &StageRequest) -> Result<CollaboratorExit> {
        Err(anyhow!("{}", self.reason))
    }
}

/// A collaborator run as a child process with a timeout.
#[derive(Debug, Clone)]
pub struct ProcessCollaborator {
    argv: Vec<String>,
    timeout: Duration,
    workspace_root: PathBuf,
}

impl ProcessCollaborator {
    pub fn from_spec(
        spec: &CollaboratorSpec,
        default_timeout_secs: u64,
        workspace_root: &Path,
    ) -> Result<Self> {
        let argv = shell_words::split(&spec.command)
            .with_context(|| format!("parse collaborator command {:?}", spec.command))?;
        if argv.is_empty() {
            return Err(anyhow!("collaborator command is empty"));
        }
        Ok(Self {
            argv,
            timeout: Duration::from_secs(spec.timeout_seconds.unwrap_or(default_timeout_secs)),
            workspace_root: workspace_root.to_path_buf(),
        })
    }

    /// Spawn with extra args and env, logging stdout/stderr under `log_dir`,
    /// and wait up to the timeout, killing the child if it overruns.
    pub fn run(
        &self,
        args: &[String],
        envs: &[(String, String)],
        log_dir: &Path,
        log_stem: &str,
    ) -> Result<CollaboratorExit> {
        std::fs::create_dir_all(log_dir).with_context(|| format!("create {}", log_dir.display()))?;
        let stdout_path = log_dir.join(format!("{log_stem}.stdout.log"));
        let stderr_path = log_dir.join(format!("{log_stem}.stderr.log"));
        let stdout = File::create(&stdout_path)
            .with_context(|| format!("create {}", stdout_path.display()))?;
        let stderr = File::create(&stderr_path)
            .with_context(|| format!("create {}", stderr_path.display()))?;

        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .args(args)
            .envs(envs.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .current_dir(&self.workspace_root);

        tracing::debug!(program = %self.argv[0], ?args, "spawning collaborator");
        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn collaborator {}", self.argv[0]))?;
        let mut timed_out = false;

        let status = loop {
            if let Some(status) = child.try_wait().context("check collaborator status")? {
                break Some(status);
            }
            if start.elapsed() > self.timeout {
                timed_out = true;
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let mut diagnostics = tail_file(&stderr_path, MAX_DIAGNOSTIC_BYTES);
        if diagnostics.is_empty() {
            diagnostics = tail_file(&stdout_path, MAX_DIAGNOSTIC_BYTES);
        }
        Ok(CollaboratorExit {
            exit_code: status.and_then(|status| status.code()),
            timed_out,
            duration_ms: start.elapsed().as_millis(),
            diagnostics,
        })
    }
}

impl Collaborator for ProcessCollaborator {
    fn invoke(&self, request: &StageRequest) -> Result<CollaboratorExit> {
        // Preview writes nothing into the workspace, not even logs.
        let scratch = if request.preview {
            Some(tempfile::tempdir().context("create preview scratch dir")?)
        } else {
            None
        };
        let work_dir = scratch
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .unwrap_or_else(|| request.work_dir.clone());

        let stem = request.log_stem();
        let request_path = work_dir.join(format!("{stem}.request.json"));
        write_json_atomic(&request_path, request)?;

        let mut args = vec![
            "--job".to_string(),
            request.job_id.clone(),
            "--candidate".to_string(),
            request.candidate_id.clone(),
            "--stage".to_string(),
            request.stage.to_string(),
            "--request".to_string(),
            request_path.display().to_string(),
        ];
        let mut envs = vec![
            (
                "CFLOW_CONTRACT_VERSION".to_string(),
                COLLABORATOR_CONTRACT_VERSION.to_string(),
            ),
            ("CFLOW_JOB_ID".to_string(), request.job_id.clone()),
            ("CFLOW_CANDIDATE_ID".to_string(), request.candidate_id.clone()),
            ("CFLOW_STAGE".to_string(), request.stage.to_string()),
            (
                "CFLOW_CANDIDATE_DIR".to_string(),
                request.candidate_dir.display().to_string(),
            ),
            ("CFLOW_REQUEST".to_string(), request_path.display().to_string()),
            (
                "CFLOW_PREVIEW".to_string(),
                if request.preview { "1" } else { "0" }.to_string(),
            ),
        ];
        if let Some(kind) = request.kind {
            args.extend(["--kind".to_string(), kind.to_string()]);
            envs.push(("CFLOW_OUTREACH_KIND".to_string(), kind.to_string()));
        }
        if request.preview {
            args.push("--dry-run".to_string());
        }
        self.run(&args, &envs, &work_dir, &stem)
    }
}

/// Timeout after which a `running` record is treated as interrupted: the
/// longest timeout any collaborator may legitimately use.
pub fn stale_after(config: &PipelineConfig) -> Duration {
    let longest = config
        .collaborators
        .values()
        .filter_map(|spec| spec.timeout_seconds)
        .fold(config.runner.stage_timeout_seconds, u64::max);
    Duration::from_secs(longest)
}

/// The collaborator for `stage`, or one that fails every attempt with the
/// reason it is unusable.
pub fn collaborator_for(
    config: &PipelineConfig,
    stage: StageName,
    workspace_root: &Path,
) -> Box<dyn Collaborator> {
    let Some(key) = stage.collaborator_key() else {
        return Box::new(IntakeCheck);
    };
    let Some(spec) = config.collaborators.get(key) else {
        return Box::new(Unconfigured {
            reason: format!("no collaborator configured for stage {key}"),
        });
    };
    match ProcessCollaborator::from_spec(spec, config.runner.stage_timeout_seconds, workspace_root) {
        Ok(process) => Box::new(process),
        Err(err) => Box::new(Unconfigured {
            reason: format!("collaborator for stage {key} is unusable: {err:#}"),
        }),
    }
}
