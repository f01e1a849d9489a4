//! Applicant metadata inference and candidate identifiers.
use super::cluster::{name_tokens, Cluster, StagedFile};
use crate::util::slugify;
use crate::workspace::{read_json, InferredMetadata, JobContext};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;

/// Placeholder name slug when nothing identifies the applicant.
pub const UNKNOWN_NAME: &str = "unknown";

/// Structured metadata dropped beside the application files.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Sidecar {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role_code: Option<String>,
    #[serde(default)]
    pub applied_date: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

pub fn is_sidecar_name(name: &str) -> bool {
    name == "metadata.json" || name.ends_with(".meta.json")
}

pub fn load_sidecar(path: &Path) -> Result<Sidecar> {
    read_json(path)
}

/// Files a sidecar explicitly binds to, by name.
///
/// `files` wins; otherwise a `<stem>.meta.json` binds to staged files sharing
/// the stem. A bare `metadata.json` binds to nothing explicitly.
pub fn declared_members(sidecar_name: &str, sidecar: &Sidecar, staged: &[StagedFile]) -> Vec<String> {
    if !sidecar.files.is_empty() {
        return sidecar.files.clone();
    }
    let Some(stem) = sidecar_name.strip_suffix(".meta.json") else {
        return Vec::new();
    };
    staged
        .iter()
        .filter(|file| file.name != sidecar_name && file.stem() == stem)
        .map(|file| file.name.clone())
        .collect()
}

/// Accept `YYYY-MM-DD`, `YYYY/MM/DD`, or an RFC 3339 timestamp.
pub fn parse_applied_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y/%m/%d"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|at| at.with_timezone(&Utc).date_naive())
        })
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
    })
}

/// First email address embedded in any filename of the cluster.
pub fn email_from_names(cluster: &Cluster) -> Option<String> {
    cluster.files.iter().find_map(|file| {
        let stem = file.stem();
        email_regex()
            .find(&stem)
            .map(|found| found.as_str().to_ascii_lowercase())
    })
}

/// Best-effort applicant name from a resume filename.
pub fn name_from_filename(file: &StagedFile) -> Option<String> {
    let stem = file.stem();
    let without_email = email_regex().replace_all(&stem, " ");
    let tokens = name_tokens(&without_email);
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

/// The file that most likely is the resume: the earliest resume-like,
/// non-container member.
pub fn primary_resume<'a>(
    cluster: &'a Cluster,
    resume_extensions: &[String],
    container_extensions: &[String],
) -> Option<&'a StagedFile> {
    let resume_like = |file: &&StagedFile| resume_extensions.contains(&file.extension());
    cluster
        .files
        .iter()
        .filter(resume_like)
        .find(|file| !container_extensions.contains(&file.extension()))
        .or_else(|| {
            cluster
                .files
                .iter()
                .find(|file| container_extensions.contains(&file.extension()))
        })
}

/// Merge sidecar fields with what the filenames reveal.
///
/// Returns the metadata plus any issues found while reading it.
pub fn infer_metadata(
    cluster: &Cluster,
    sidecar: Option<&Sidecar>,
    primary: Option<&StagedFile>,
) -> (InferredMetadata, Vec<String>) {
    let mut issues = Vec::new();
    let sidecar = sidecar.cloned().unwrap_or_default();
    let applied_date = match sidecar.applied_date.as_deref() {
        Some(raw) => {
            let parsed = parse_applied_date(raw);
            if parsed.is_none() {
                issues.push(format!("unrecognized applied_date {raw:?}"));
            }
            parsed
        }
        None => None,
    };
    let metadata = InferredMetadata {
        name: non_empty(sidecar.name).or_else(|| primary.and_then(name_from_filename)),
        email: non_empty(sidecar.email).or_else(|| email_from_names(cluster)),
        role_code: non_empty(sidecar.role_code),
        applied_date,
        source: non_empty(sidecar.source),
    };
    (metadata, issues)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Random lowercase suffix of `len` characters.
pub fn random_suffix(len: usize) -> String {
    uuid::Uuid::new_v4().simple().to_string().chars().take(len).collect()
}

/// `<roleCode>-<nameSlug>-<yyyymmdd>-<suffix>`; the role code is always the
/// job's, a sidecar `role_code` only stays in the metadata.
pub fn candidate_id(
    job: &JobContext,
    metadata: &InferredMetadata,
    newest_mtime: DateTime<Utc>,
    suffix: &str,
) -> String {
    let role = slugify(&job.role_code, "role");
    let name = slugify(metadata.name.as_deref().unwrap_or(""), UNKNOWN_NAME);
    let date = metadata
        .applied_date
        .unwrap_or_else(|| newest_mtime.date_naive())
        .format("%Y%m%d");
    format!("{role}-{name}-{date}-{suffix}")
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
