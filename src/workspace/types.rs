//! Shared JSON schema types for workspace artifacts.
//!
//! These types mirror the files on disk; the files are the source of truth and
//! nothing here is cached across invocations.
use super::{
    CANDIDATE_SCHEMA_VERSION, CONFIG_SCHEMA_VERSION, INTERACTION_SCHEMA_VERSION,
    STAGE_RECORD_SCHEMA_VERSION,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Pipeline stages in their fixed prerequisite order.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    Intake,
    Parse,
    Gate,
    Score,
    Summarize,
    DraftOutreach,
}

impl StageName {
    /// Every stage, in pipeline order.
    pub const ALL: [StageName; 6] = [
        StageName::Intake,
        StageName::Parse,
        StageName::Gate,
        StageName::Score,
        StageName::Summarize,
        StageName::DraftOutreach,
    ];

    /// Return the stable string identifier used in JSON artifacts and on the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Intake => "intake",
            StageName::Parse => "parse",
            StageName::Gate => "gate",
            StageName::Score => "score",
            StageName::Summarize => "summarize",
            StageName::DraftOutreach => "draft-outreach",
        }
    }

    /// Stages strictly after this one.
    pub fn downstream(self) -> impl Iterator<Item = StageName> {
        StageName::ALL.into_iter().filter(move |stage| *stage > self)
    }

    /// Name of the collaborator entry in `config.json`; intake is built in.
    pub fn collaborator_key(&self) -> Option<&'static str> {
        match self {
            StageName::Intake => None,
            other => Some(other.as_str()),
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        StageName::ALL
            .into_iter()
            .find(|stage| stage.as_str() == value.trim())
            .ok_or_else(|| anyhow!("unknown stage {value:?}"))
    }
}

/// Progress state of one (candidate, stage) pair.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    /// Return the stable string identifier used in JSON artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of pipeline progress, persisted at `stages/<stage>.json`.
///
/// `error_detail` is present iff `status` is `failed`; the constructors keep
/// that pairing so callers never assemble a record by hand.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StageRecord {
    pub schema_version: u32,
    pub stage_name: StageName,
    pub status: StageStatus,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Set on a failed gate whose verdict was a hard deal-breaker.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub screened_out: bool,
}

impl StageRecord {
    /// Record for a stage that has never been attempted.
    pub fn pending(stage: StageName) -> Self {
        Self {
            schema_version: STAGE_RECORD_SCHEMA_VERSION,
            stage_name: stage,
            status: StageStatus::Pending,
            attempt_count: 0,
            last_run_at: None,
            finished_at: None,
            output_paths: Vec::new(),
            error_detail: None,
            skip_reason: None,
            screened_out: false,
        }
    }

    /// Transition to `running`, counting a new attempt.
    pub fn start_attempt(&self, at: DateTime<Utc>) -> Self {
        Self {
            status: StageStatus::Running,
            attempt_count: self.attempt_count + 1,
            last_run_at: Some(at),
            finished_at: None,
            output_paths: Vec::new(),
            error_detail: None,
            skip_reason: None,
            screened_out: false,
            ..self.clone()
        }
    }

    /// Terminal success with the outputs the stage produced.
    pub fn succeed(&self, at: DateTime<Utc>, output_paths: Vec<String>) -> Self {
        Self {
            status: StageStatus::Succeeded,
            finished_at: Some(at),
            output_paths,
            error_detail: None,
            skip_reason: None,
            screened_out: false,
            ..self.clone()
        }
    }

    /// Terminal failure with a diagnostic.
    pub fn fail(&self, at: DateTime<Utc>, detail: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            finished_at: Some(at),
            error_detail: Some(detail.into()),
            skip_reason: None,
            screened_out: false,
            ..self.clone()
        }
    }

    /// Gate failure caused by a deal-breaker verdict rather than an error.
    pub fn screen_out(&self, at: DateTime<Utc>, detail: impl Into<String>) -> Self {
        Self {
            screened_out: true,
            ..self.fail(at, detail)
        }
    }

    /// Terminal skip, used for short-circuited and not-required stages.
    pub fn skip(&self, at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Skipped,
            finished_at: Some(at),
            output_paths: Vec::new(),
            error_detail: None,
            skip_reason: Some(reason.into()),
            screened_out: false,
            ..self.clone()
        }
    }

    /// Reset to `pending`, keeping the attempt history.
    pub fn reset(&self) -> Self {
        Self {
            status: StageStatus::Pending,
            finished_at: None,
            output_paths: Vec::new(),
            error_detail: None,
            skip_reason: None,
            screened_out: false,
            ..self.clone()
        }
    }

    /// `succeeded` and `skipped` both let later stages proceed.
    pub fn is_resolved(&self) -> bool {
        matches!(self.status, StageStatus::Succeeded | StageStatus::Skipped)
    }
}

/// Kinds of entries in a candidate's interaction log.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Intake,
    StageFinished,
    StageSkipped,
    StageReset,
    Enqueued,
    Approved,
    Rejected,
    Sent,
}

/// One append-only line of `interactions.jsonl`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InteractionEvent {
    pub schema_version: u32,
    pub at: DateTime<Utc>,
    pub kind: InteractionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl InteractionEvent {
    pub fn new(kind: InteractionKind, detail: impl Into<String>) -> Self {
        Self {
            schema_version: INTERACTION_SCHEMA_VERSION,
            at: Utc::now(),
            kind,
            stage: None,
            detail: detail.into(),
            data: None,
        }
    }

    pub fn with_stage(mut self, stage: StageName) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Best-effort applicant metadata inferred at intake; every field is optional.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct InferredMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Write-once manifest at `candidate.json`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CandidateManifest {
    pub schema_version: u32,
    pub candidate_id: String,
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    /// Candidate-relative paths (`raw/<name>`) in intake order.
    pub raw_files: Vec<String>,
    #[serde(default)]
    pub metadata: InferredMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intake_issues: Vec<String>,
}

impl CandidateManifest {
    pub fn new(candidate_id: &str, job_id: &str, raw_files: Vec<String>) -> Self {
        Self {
            schema_version: CANDIDATE_SCHEMA_VERSION,
            candidate_id: candidate_id.to_string(),
            job_id: job_id.to_string(),
            created_at: Utc::now(),
            raw_files,
            metadata: InferredMetadata::default(),
            intake_issues: Vec::new(),
        }
    }
}

/// Job context at `jobs/<job>/job.json`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JobContext {
    pub schema_version: u32,
    pub job_id: String,
    pub role_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Workspace configuration at `config.json`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub schema_version: u32,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Keyed by stage name (`parse`, `gate`, ...) plus `send`.
    #[serde(default)]
    pub collaborators: BTreeMap<String, CollaboratorSpec>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            intake: IntakeConfig::default(),
            runner: RunnerConfig::default(),
            collaborators: BTreeMap::new(),
        }
    }
}

/// Bundle clustering knobs. The window and threshold are empirical.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct IntakeConfig {
    pub proximity_window_seconds: u64,
    pub similarity_threshold: f64,
    pub resume_extensions: Vec<String>,
    pub container_extensions: Vec<String>,
    pub suffix_len: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            proximity_window_seconds: 120,
            similarity_threshold: 0.6,
            resume_extensions: ["pdf", "docx", "doc", "md", "txt", "rtf"]
                .into_iter()
                .map(String::from)
                .collect(),
            container_extensions: ["eml", "msg"].into_iter().map(String::from).collect(),
            suffix_len: 6,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct RunnerConfig {
    pub stage_timeout_seconds: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stage_timeout_seconds: 600,
        }
    }
}

/// External command performing one stage's content work.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CollaboratorSpec {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// Kinds of candidate-facing artifacts that need approval.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OutreachKind {
    ClarificationRequest,
    Decline,
}

impl OutreachKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutreachKind::ClarificationRequest => "clarification-request",
            OutreachKind::Decline => "decline",
        }
    }

    /// Candidate-relative path of the drafted artifact.
    pub fn artifact_rel(&self) -> String {
        format!("outputs/outreach_{}.md", self.as_str())
    }
}

impl fmt::Display for OutreachKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutreachKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "clarification-request" | "clarification" => Ok(OutreachKind::ClarificationRequest),
            "decline" | "rejection" => Ok(OutreachKind::Decline),
            other => Err(anyhow!("unknown outreach kind {other:?}")),
        }
    }
}

/// Decision emitted by the scoring collaborator in `outputs/evaluation.json`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationDecision {
    StrongInterview,
    Interview,
    Maybe,
    Pass,
    BackupList,
}

impl EvaluationDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationDecision::StrongInterview => "STRONG_INTERVIEW",
            EvaluationDecision::Interview => "INTERVIEW",
            EvaluationDecision::Maybe => "MAYBE",
            EvaluationDecision::Pass => "PASS",
            EvaluationDecision::BackupList => "BACKUP_LIST",
        }
    }

    /// Candidate-facing outreach this decision calls for, if any.
    pub fn outreach(&self) -> Option<OutreachKind> {
        match self {
            EvaluationDecision::Maybe => Some(OutreachKind::ClarificationRequest),
            EvaluationDecision::Pass => Some(OutreachKind::Decline),
            _ => None,
        }
    }
}

impl fmt::Display for EvaluationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a queued outbound artifact.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Sent,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Sent => "sent",
        }
    }

    /// Open items block a second enqueue for the same (candidate, kind).
    pub fn is_open(&self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::Approved)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate-facing artifact awaiting (or past) human sign-off.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ApprovalItem {
    pub seq: u64,
    pub candidate_id: String,
    pub job_id: String,
    pub kind: OutreachKind,
    pub artifact_path: String,
    pub status: ApprovalStatus,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ApprovalItem {
    pub fn matches(&self, candidate_id: &str, kind: OutreachKind) -> bool {
        self.candidate_id == candidate_id && self.kind == kind
    }
}

/// The job-level approval manifest.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ApprovalManifest {
    pub schema_version: u32,
    #[serde(default)]
    pub items: Vec<ApprovalItem>,
}
