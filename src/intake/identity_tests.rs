use super::super::cluster::{Cluster, ClusterOrigin, StagedFile};
use super::{
    candidate_id, declared_members, infer_metadata, is_sidecar_name, name_from_filename,
    parse_applied_date, primary_resume, random_suffix, Sidecar,
};
use crate::workspace::{InferredMetadata, JobContext, JOB_SCHEMA_VERSION};
use chrono::{NaiveDate, TimeZone, Utc};
use std::path::PathBuf;

fn staged(name: &str) -> StagedFile {
    StagedFile {
        path: PathBuf::from("/inbox").join(name),
        name: name.to_string(),
        modified: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("time"),
        size: 10,
    }
}

fn cluster(names: &[&str]) -> Cluster {
    Cluster {
        origin: ClusterOrigin::Proximity,
        files: names.iter().map(|name| staged(name)).collect(),
    }
}

fn job() -> JobContext {
    JobContext {
        schema_version: JOB_SCHEMA_VERSION,
        job_id: "eng-001".into(),
        role_code: "ENG".into(),
        title: None,
        created_at: Utc::now(),
    }
}

fn exts(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn sidecar_names_are_recognized() {
    assert!(is_sidecar_name("metadata.json"));
    assert!(is_sidecar_name("alice.meta.json"));
    assert!(!is_sidecar_name("alice.json"));
}

#[test]
fn stem_sidecar_binds_to_matching_files() {
    let staged = [staged("alice.pdf"), staged("alice.meta.json"), staged("bob.pdf")];
    let members = declared_members("alice.meta.json", &Sidecar::default(), &staged);
    assert_eq!(members, vec!["alice.pdf".to_string()]);

    let explicit = Sidecar {
        files: vec!["bob.pdf".into()],
        ..Sidecar::default()
    };
    assert_eq!(
        declared_members("metadata.json", &explicit, &staged),
        vec!["bob.pdf".to_string()]
    );
    assert!(declared_members("metadata.json", &Sidecar::default(), &staged).is_empty());
}

#[test]
fn applied_dates_accept_both_separators() {
    let expected = NaiveDate::from_ymd_opt(2026, 1, 15);
    assert_eq!(parse_applied_date("2026-01-15"), expected);
    assert_eq!(parse_applied_date("2026/01/15"), expected);
    assert_eq!(parse_applied_date("2026-01-15T10:00:00Z"), expected);
    assert_eq!(parse_applied_date("Jan 15"), None);
}

#[test]
fn filename_inference_fills_name_and_email() {
    let bundle = cluster(&["jane_doe_resume.pdf", "jane.doe@example.com cover.pdf"]);
    let (metadata, issues) = infer_metadata(&bundle, None, bundle.files.first());
    assert!(issues.is_empty());
    assert_eq!(metadata.name.as_deref(), Some("jane doe"));
    assert_eq!(metadata.email.as_deref(), Some("jane.doe@example.com"));
}

#[test]
fn sidecar_fields_win_over_filenames() {
    let bundle = cluster(&["jd_resume.pdf"]);
    let sidecar = Sidecar {
        name: Some("Jane Doe".into()),
        role_code: Some("PM".into()),
        applied_date: Some("2026/02/01".into()),
        ..Sidecar::default()
    };
    let (metadata, _) = infer_metadata(&bundle, Some(&sidecar), bundle.files.first());
    assert_eq!(metadata.name.as_deref(), Some("Jane Doe"));
    assert_eq!(metadata.role_code.as_deref(), Some("PM"));
    assert_eq!(metadata.applied_date, NaiveDate::from_ymd_opt(2026, 2, 1));
}

#[test]
fn bad_applied_date_is_an_issue_not_an_error() {
    let bundle = cluster(&["jd_resume.pdf"]);
    let sidecar = Sidecar {
        applied_date: Some("yesterday".into()),
        ..Sidecar::default()
    };
    let (metadata, issues) = infer_metadata(&bundle, Some(&sidecar), None);
    assert_eq!(metadata.applied_date, None);
    assert_eq!(issues.len(), 1);
}

#[test]
fn generic_filename_yields_no_name() {
    assert_eq!(name_from_filename(&staged("Resume-2026.pdf")), None);
}

#[test]
fn primary_resume_prefers_documents_over_containers() {
    let bundle = cluster(&["note.eml", "cover.png", "cv.pdf"]);
    let resume_exts = exts(&["pdf", "md"]);
    let container_exts = exts(&["eml"]);
    let primary = primary_resume(&bundle, &resume_exts, &container_exts).expect("primary");
    assert_eq!(primary.name, "cv.pdf");

    let mail_only = cluster(&["note.eml"]);
    let primary = primary_resume(&mail_only, &resume_exts, &container_exts).expect("primary");
    assert_eq!(primary.name, "note.eml");
}

#[test]
fn candidate_id_has_role_name_date_and_suffix() {
    let metadata = InferredMetadata {
        name: Some("Alice Smith".into()),
        ..InferredMetadata::default()
    };
    let mtime = Utc.with_ymd_and_hms(2026, 3, 2, 23, 59, 0).single().expect("time");
    assert_eq!(
        candidate_id(&job(), &metadata, mtime, "a1b2c3"),
        "eng-alice-smith-20260302-a1b2c3"
    );

    let anonymous = InferredMetadata {
        applied_date: NaiveDate::from_ymd_opt(2026, 1, 5),
        ..InferredMetadata::default()
    };
    assert_eq!(
        candidate_id(&job(), &anonymous, mtime, "zzzzzz"),
        "eng-unknown-20260105-zzzzzz"
    );
}

#[test]
fn sidecar_role_code_does_not_override_the_job() {
    let metadata = InferredMetadata {
        name: Some("alice".into()),
        role_code: Some("MKT".into()),
        ..InferredMetadata::default()
    };
    let mtime = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).single().expect("time");
    assert_eq!(
        candidate_id(&job(), &metadata, mtime, "abc123"),
        "eng-alice-20261019-abc123"
    );
}

#[test]
fn random_suffix_has_requested_length() {
    let suffix = random_suffix(6);
    assert_eq!(suffix.len(), 6);
    assert!(suffix.chars().all(|ch| ch.is_ascii_alphanumeric() && !ch.is_ascii_uppercase()));
}
