use super::{ApprovalQueue, EnqueueOutcome};
use crate::workspace::{
    read_jsonl, ApprovalStatus, InteractionEvent, InteractionKind, OutreachKind, WorkspacePaths,
};
use tempfile::TempDir;

fn queue(dir: &TempDir) -> ApprovalQueue {
    let job = WorkspacePaths::new(dir.path().to_path_buf()).job("eng-001");
    ApprovalQueue::new(&job)
}

const DECLINE: OutreachKind = OutreachKind::Decline;
const CLARIFY: OutreachKind = OutreachKind::ClarificationRequest;

#[test]
fn enqueue_twice_keeps_one_item() {
    let dir = TempDir::new().expect("temp dir");
    let queue = queue(&dir);
    let first = queue.enqueue("alice", DECLINE, "a.md").expect("enqueue");
    let second = queue.enqueue("alice", DECLINE, "a.md").expect("enqueue again");
    assert!(matches!(first, EnqueueOutcome::Added(_)));
    assert!(matches!(second, EnqueueOutcome::Existing(_)));
    assert_eq!(queue.list().expect("list").len(), 1);

    queue.enqueue("alice", CLARIFY, "b.md").expect("other kind");
    assert_eq!(queue.list().expect("list").len(), 2);
}

#[test]
fn approval_also_blocks_duplicates() {
    let dir = TempDir::new().expect("temp dir");
    let queue = queue(&dir);
    queue.enqueue("alice", DECLINE, "a.md").expect("enqueue");
    queue.approve("alice", DECLINE).expect("approve");
    let again = queue.enqueue("alice", DECLINE, "a.md").expect("enqueue");
    assert!(matches!(
        again,
        EnqueueOutcome::Existing(item) if item.status == ApprovalStatus::Approved
    ));
}

#[test]
fn mark_sent_requires_approval() {
    let dir = TempDir::new().expect("temp dir");
    let queue = queue(&dir);
    queue.enqueue("alice", DECLINE, "a.md").expect("enqueue");
    let cycle = queue.begin_send_cycle().expect("lock").expect("cycle");
    assert!(queue.ticket_for(&cycle, "alice", DECLINE).is_err());
    assert!(queue.select_next_approved(&cycle).expect("select").is_none());

    queue.approve("alice", DECLINE).expect("approve");
    let ticket = queue.ticket_for(&cycle, "alice", DECLINE).expect("ticket");
    let sent = queue.mark_sent(ticket).expect("mark sent");
    assert_eq!(sent.status, ApprovalStatus::Sent);
    assert!(sent.approved_at.is_some() && sent.sent_at.is_some());
}

#[test]
fn overlapping_send_cycles_never_share_an_item() {
    let dir = TempDir::new().expect("temp dir");
    let queue = queue(&dir);
    queue.enqueue("alice", DECLINE, "a.md").expect("enqueue");
    queue.approve("alice", DECLINE).expect("approve");

    let first = queue.begin_send_cycle().expect("lock").expect("first cycle");
    let ticket = queue.select_next_approved(&first).expect("select").expect("ticket");
    assert_eq!(ticket.item().seq, 1);
    assert!(queue.begin_send_cycle().expect("lock").is_none());

    queue.mark_sent(ticket).expect("mark sent");
    drop(first);
    let second = queue.begin_send_cycle().expect("lock").expect("second cycle");
    assert!(queue.select_next_approved(&second).expect("select").is_none());
}

#[test]
fn stale_ticket_is_refused_after_rejection() {
    let dir = TempDir::new().expect("temp dir");
    let queue = queue(&dir);
    queue.enqueue("alice", DECLINE, "a.md").expect("enqueue");
    queue.approve("alice", DECLINE).expect("approve");
    let cycle = queue.begin_send_cycle().expect("lock").expect("cycle");
    let ticket = queue.select_next_approved(&cycle).expect("select").expect("ticket");
    queue
        .reject("alice", DECLINE, Some("tone is off"))
        .expect("reject");
    assert!(queue.mark_sent(ticket).is_err());
    let items = queue.list().expect("list");
    assert_eq!(items[0].status, ApprovalStatus::Rejected);
    assert_eq!(items[0].note.as_deref(), Some("tone is off"));
}

#[test]
fn approving_twice_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let queue = queue(&dir);
    queue.enqueue("alice", DECLINE, "a.md").expect("enqueue");
    queue.approve("alice", DECLINE).expect("approve");
    assert!(queue.approve("alice", DECLINE).is_err());
}

#[test]
fn selection_is_oldest_first_and_stable() {
    let dir = TempDir::new().expect("temp dir");
    let queue = queue(&dir);
    queue.enqueue("alice", DECLINE, "a.md").expect("enqueue");
    queue.enqueue("bob", DECLINE, "b.md").expect("enqueue");
    queue.enqueue("carol", CLARIFY, "c.md").expect("enqueue");

    let next = queue.select_next_pending().expect("select").expect("item");
    assert_eq!(next.candidate_id, "alice");
    let again = queue.select_next_pending().expect("select").expect("item");
    assert_eq!(again, next);

    queue.approve("alice", DECLINE).expect("approve");
    let next = queue.select_next_pending().expect("select").expect("item");
    assert_eq!(next.candidate_id, "bob");
}

#[test]
fn closed_pair_can_be_queued_again() {
    let dir = TempDir::new().expect("temp dir");
    let queue = queue(&dir);
    queue.enqueue("alice", DECLINE, "a.md").expect("enqueue");
    queue.reject("alice", DECLINE, None).expect("reject");
    let redraft = queue.enqueue("alice", DECLINE, "a.md").expect("redraft");
    match redraft {
        EnqueueOutcome::Added(item) => assert_eq!(item.seq, 2),
        other => panic!("expected a new item, got {other:?}"),
    }
    let latest = queue.latest("alice", DECLINE).expect("latest").expect("item");
    assert_eq!(latest.status, ApprovalStatus::Pending);
}

#[test]
fn mutations_are_audited() {
    let dir = TempDir::new().expect("temp dir");
    let job = WorkspacePaths::new(dir.path().to_path_buf()).job("eng-001");
    std::fs::create_dir_all(job.candidate("alice").root()).expect("candidate dir");
    let queue = ApprovalQueue::new(&job);
    queue.enqueue("alice", DECLINE, "a.md").expect("enqueue");
    queue.enqueue("alice", DECLINE, "a.md").expect("duplicate");
    queue.approve("alice", DECLINE).expect("approve");

    let audit: Vec<serde_json::Value> = read_jsonl(&job.approval_audit_path()).expect("audit");
    let actions: Vec<&str> = audit
        .iter()
        .filter_map(|entry| entry["action"].as_str())
        .collect();
    assert_eq!(actions, ["enqueue", "approve"]);

    let events: Vec<InteractionEvent> =
        read_jsonl(&job.candidate("alice").interactions_path()).expect("interactions");
    let kinds: Vec<InteractionKind> = events.iter().map(|event| event.kind).collect();
    assert_eq!(kinds, [InteractionKind::Enqueued, InteractionKind::Approved]);
}
