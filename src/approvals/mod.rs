//! Approval Queue: the human checkpoint between "drafted" and "sendable".
//!
//! The manifest is rewritten atomically under `approvals/.lock`. Every
//! mutation appends to `approvals/audit.jsonl` and to the candidate's
//! interaction log. Nothing here moves an item from `pending` to `approved`
//! on its own; only [`ApprovalQueue::approve`] does, and only a caller acting
//! for a human reaches it.
use crate::staging::write_json_atomic;
use crate::store::{lock_blocking, try_lock, FileLock};
use crate::workspace::{
    self, append_jsonl, ApprovalItem, ApprovalManifest, ApprovalStatus, InteractionEvent,
    InteractionKind, JobPaths, OutreachKind, APPROVAL_MANIFEST_SCHEMA_VERSION,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Exclusive hold on the job's send cycle (`approvals/send.lock`).
///
/// Tickets are only issued while one is held, so two overlapping cycles
/// can never both hold a ticket for the same item.
#[derive(Debug)]
pub struct SendCycle {
    _lock: FileLock,
}

/// Proof that an item was `approved` when it was selected.
///
/// Only this module can construct one, and [`ApprovalQueue::mark_sent`]
/// consumes it, so nothing can mark an unapproved item as sent.
#[derive(Debug)]
pub struct SendTicket {
    item: ApprovalItem,
}

impl SendTicket {
    pub fn item(&self) -> &ApprovalItem {
        &self.item
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Added(ApprovalItem),
    /// An open item already covers this (candidate, kind).
    Existing(ApprovalItem),
}

#[derive(Debug, Serialize)]
struct AuditEntry<'a> {
    at: DateTime<Utc>,
    action: &'a str,
    seq: u64,
    candidate_id: &'a str,
    kind: OutreachKind,
    status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

/// Queue over one job's `approvals/` directory.
#[derive(Debug, Clone)]
pub struct ApprovalQueue {
    job: JobPaths,
}

impl ApprovalQueue {
    pub fn new(job: &JobPaths) -> Self {
        Self { job: job.clone() }
    }

    /// Read the manifest; a job with nothing queued has an empty one.
    pub fn load(&self) -> Result<ApprovalManifest> {
        let path = self.job.approval_manifest_path();
        if !path.is_file() {
            return Ok(ApprovalManifest {
                schema_version: APPROVAL_MANIFEST_SCHEMA_VERSION,
                items: Vec::new(),
            });
        }
        let manifest: ApprovalManifest = workspace::read_json(&path)?;
        if manifest.schema_version != APPROVAL_MANIFEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported approval manifest schema_version {}",
                manifest.schema_version
            ));
        }
        Ok(manifest)
    }

    /// All items, oldest first.
    pub fn list(&self) -> Result<Vec<ApprovalItem>> {
        let mut items = self.load()?.items;
        items.sort_by(|a, b| (a.enqueued_at, a.seq).cmp(&(b.enqueued_at, b.seq)));
        Ok(items)
    }

    /// The open (pending or approved) item for a (candidate, kind), if any.
    pub fn find_open(
        &self,
        candidate_id: &str,
        kind: OutreachKind,
    ) -> Result<Option<ApprovalItem>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|item| item.matches(candidate_id, kind) && item.status.is_open()))
    }

    /// Most recent item for a (candidate, kind) regardless of status.
    pub fn latest(&self, candidate_id: &str, kind: OutreachKind) -> Result<Option<ApprovalItem>> {
        Ok(self
            .list()?
            .into_iter()
            .rev()
            .find(|item| item.matches(candidate_id, kind)))
    }

    /// Queue a drafted artifact; a no-op while an open item exists for the pair.
    pub fn enqueue(
        &self,
        candidate_id: &str,
        kind: OutreachKind,
        artifact_path: &str,
    ) -> Result<EnqueueOutcome> {
        self.mutate("enqueue", None, |manifest| {
            if let Some(existing) = manifest
                .items
                .iter()
                .find(|item| item.matches(candidate_id, kind) && item.status.is_open())
            {
                return Ok(Mutation::unchanged(existing.clone()));
            }
            let seq = manifest.items.iter().map(|item| item.seq).max().unwrap_or(0) + 1;
            let item = ApprovalItem {
                seq,
                candidate_id: candidate_id.to_string(),
                job_id: self.job.job_id().to_string(),
                kind,
                artifact_path: artifact_path.to_string(),
                status: ApprovalStatus::Pending,
                enqueued_at: Utc::now(),
                approved_at: None,
                rejected_at: None,
                sent_at: None,
                note: None,
            };
            manifest.items.push(item.clone());
            Ok(Mutation::changed(item))
        })
        .map(|mutation| {
            if mutation.changed {
                EnqueueOutcome::Added(mutation.item)
            } else {
                EnqueueOutcome::Existing(mutation.item)
            }
        })
    }

    /// Oldest pending item: the single item a scheduled review cycle handles.
    pub fn select_next_pending(&self) -> Result<Option<ApprovalItem>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|item| item.status == ApprovalStatus::Pending))
    }

    /// Claim the send cycle; `None` while another cycle holds it.
    pub fn begin_send_cycle(&self) -> Result<Option<SendCycle>> {
        let lock = try_lock(&self.job.approval_send_lock_path())?;
        Ok(lock.map(|lock| SendCycle { _lock: lock }))
    }

    /// Oldest approved item, as a ticket: the single item a send cycle handles.
    pub fn select_next_approved(&self, _cycle: &SendCycle) -> Result<Option<SendTicket>> {
        Ok(self
            .list()?
            .into_iter()
            .find(|item| item.status == ApprovalStatus::Approved)
            .map(|item| SendTicket { item }))
    }

    /// Ticket for a specific approved item; any other status is refused.
    pub fn ticket_for(
        &self,
        _cycle: &SendCycle,
        candidate_id: &str,
        kind: OutreachKind,
    ) -> Result<SendTicket> {
        let item = self.check_transition(candidate_id, kind, ApprovalStatus::Sent)?;
        Ok(SendTicket { item })
    }

    /// Validate that the open item for the pair may move to `to`, without
    /// changing anything. Used directly by dry runs.
    pub fn check_transition(
        &self,
        candidate_id: &str,
        kind: OutreachKind,
        to: ApprovalStatus,
    ) -> Result<ApprovalItem> {
        let item = self
            .find_open(candidate_id, kind)?
            .ok_or_else(|| anyhow!("no open {kind} item for candidate {candidate_id}"))?;
        allowed(&item, to)?;
        Ok(item)
    }

    /// Human sign-off: `pending` to `approved`.
    pub fn approve(&self, candidate_id: &str, kind: OutreachKind) -> Result<ApprovalItem> {
        self.transition(candidate_id, kind, None, ApprovalStatus::Approved, None)
    }

    /// Human "do not send": `pending` or `approved` to `rejected`.
    pub fn reject(
        &self,
        candidate_id: &str,
        kind: OutreachKind,
        note: Option<&str>,
    ) -> Result<ApprovalItem> {
        self.transition(candidate_id, kind, None, ApprovalStatus::Rejected, note)
    }

    /// Record that the ticket's item went out.
    ///
    /// The ticket names one specific item; if that item was rejected after the
    /// ticket was issued, marking it sent fails.
    pub fn mark_sent(&self, ticket: SendTicket) -> Result<ApprovalItem> {
        let SendTicket { item } = ticket;
        self.transition(
            &item.candidate_id,
            item.kind,
            Some(item.seq),
            ApprovalStatus::Sent,
            None,
        )
    }

    fn transition(
        &self,
        candidate_id: &str,
        kind: OutreachKind,
        seq: Option<u64>,
        to: ApprovalStatus,
        note: Option<&str>,
    ) -> Result<ApprovalItem> {
        let action = match to {
            ApprovalStatus::Approved => "approve",
            ApprovalStatus::Rejected => "reject",
            ApprovalStatus::Sent => "mark_sent",
            ApprovalStatus::Pending => return Err(anyhow!("items never return to pending")),
        };
        self.mutate(action, note, |manifest| {
            // Re-check under the lock; the manifest may have moved since selection.
            let item = manifest
                .items
                .iter_mut()
                .find(|item| {
                    item.matches(candidate_id, kind)
                        && item.status.is_open()
                        && (seq.is_none() || seq == Some(item.seq))
                })
                .ok_or_else(|| anyhow!("no open {kind} item for candidate {candidate_id}"))?;
            allowed(item, to)?;
            let now = Utc::now();
            item.status = to;
            match to {
                ApprovalStatus::Approved => item.approved_at = Some(now),
                ApprovalStatus::Rejected => item.rejected_at = Some(now),
                ApprovalStatus::Sent => item.sent_at = Some(now),
                ApprovalStatus::Pending => {}
            }
            if let Some(note) = note {
                item.note = Some(note.to_string());
            }
            Ok(Mutation::changed(item.clone()))
        })
        .map(|mutation| mutation.item)
    }

    fn mutate(
        &self,
        action: &str,
        note: Option<&str>,
        apply: impl FnOnce(&mut ApprovalManifest) -> Result<Mutation>,
    ) -> Result<Mutation> {
        let _lock = lock_blocking(&self.job.approval_lock_path())?;
        let mut manifest = self.load()?;
        let mutation = apply(&mut manifest)?;
        if !mutation.changed {
            return Ok(mutation);
        }
        let item = &mutation.item;
        write_json_atomic(&self.job.approval_manifest_path(), &manifest)?;
        append_jsonl(
            &self.job.approval_audit_path(),
            &AuditEntry {
                at: Utc::now(),
                action,
                seq: item.seq,
                candidate_id: &item.candidate_id,
                kind: item.kind,
                status: item.status,
                note,
            },
        )?;
        let candidate = self.job.candidate(&item.candidate_id);
        if candidate.root().is_dir() {
            let event = InteractionEvent::new(
                interaction_kind(item.status),
                format!("{} {}", item.kind, item.status),
            )
            .with_data(serde_json::json!({
                "seq": item.seq,
                "artifact_path": item.artifact_path,
                "note": note,
            }));
            append_jsonl(&candidate.interactions_path(), &event)?;
        }
        tracing::info!(
            candidate_id = %item.candidate_id,
            kind = %item.kind,
            status = %item.status,
            seq = item.seq,
            "approval queue {action}"
        );
        Ok(mutation)
    }
}

struct Mutation {
    item: ApprovalItem,
    changed: bool,
}

impl Mutation {
    fn changed(item: ApprovalItem) -> Self {
        Self {
            item,
            changed: true,
        }
    }

    fn unchanged(item: ApprovalItem) -> Self {
        Self {
            item,
            changed: false,
        }
    }
}

fn allowed(item: &ApprovalItem, to: ApprovalStatus) -> Result<()> {
    let ok = matches!(
        (item.status, to),
        (ApprovalStatus::Pending, ApprovalStatus::Approved)
            | (ApprovalStatus::Pending, ApprovalStatus::Rejected)
            | (ApprovalStatus::Approved, ApprovalStatus::Rejected)
            | (ApprovalStatus::Approved, ApprovalStatus::Sent)
    );
    if ok {
        Ok(())
    } else {
        Err(anyhow!(
            "{} item for candidate {} is {}; cannot move it to {}",
            item.kind,
            item.candidate_id,
            item.status,
            to
        ))
    }
}

fn interaction_kind(status: ApprovalStatus) -> InteractionKind {
    match status {
        ApprovalStatus::Pending => InteractionKind::Enqueued,
        ApprovalStatus::Approved => InteractionKind::Approved,
        ApprovalStatus::Rejected => InteractionKind::Rejected,
        ApprovalStatus::Sent => InteractionKind::Sent,
    }
}

#[cfg(test)]
#[path = "approvals_tests.rs"]
mod tests;
