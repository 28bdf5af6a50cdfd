//! Integration tests for stall recovery of jobs whose consumer died.

use std::path::{Path, PathBuf};

use dirq::{Handler, HandlerResult, JobId, Outcome, Queue, Retention};
use tempfile::TempDir;

fn test_queue(retention: Retention) -> (TempDir, Queue) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let queue = Queue::open(tmp.path().join("queue"), retention).expect("failed to open queue");
    (tmp, queue)
}

/// Pid of a child that has exited and been reaped.
fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

/// Simulate a consumer that claimed `id` and then died: move the queued
/// artifact into a slot named for `owner`.
fn stall(queue: &Queue, id: JobId, owner: u32) -> PathBuf {
    let queued = queue.base().join("queued");
    let name = std::fs::read_dir(&queued)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .find(|n| n.contains(&id.to_string()))
        .expect("job is queued");

    let working = match name.split_once(&format!("{id}-")) {
        Some((_, original)) => original.to_string(),
        None => "payload".to_string(),
    };

    let slot = queue.base().join("processing").join(format!("{name}.{owner}"));
    std::fs::create_dir(&slot).unwrap();
    std::fs::rename(queued.join(&name), slot.join(working)).unwrap();
    slot
}

struct Succeeds;

impl Handler for Succeeds {
    fn handle_data(&self, _id: JobId, _payload: &[u8]) -> HandlerResult {
        Ok(Outcome::Success)
    }

    fn handle_file(&self, _id: JobId, _name: &str, _path: &Path) -> HandlerResult {
        Ok(Outcome::Success)
    }
}

#[test]
fn dead_owner_job_moves_to_interrupted() {
    let (_tmp, queue) = test_queue(Retention::ALL);
    let id = queue.submit_data(b"half done").unwrap();
    let slot = stall(&queue, id, dead_pid());
    assert!(queue.is_processing(id).unwrap());

    let report = queue.receive(&Succeeds, true).unwrap();

    assert_eq!(report.recovered, 1);
    assert_eq!(report.claimed, 0);
    assert!(!slot.exists());
    assert!(queue.is_interrupted(id).unwrap());
    assert!(!queue.is_processing(id).unwrap());
    assert_eq!(
        std::fs::read(queue.base().join("interrupted").join(id.to_string())).unwrap(),
        b"half done"
    );
}

#[test]
fn dead_owner_job_disappears_without_interrupted_flag() {
    let (_tmp, queue) = test_queue(Retention::SUCCESS | Retention::FAILED);
    let id = queue.submit_data(b"x").unwrap();
    let slot = stall(&queue, id, dead_pid());

    assert_eq!(queue.recover().unwrap(), 1);

    assert!(!slot.exists());
    assert!(!queue.is_processing(id).unwrap());
    assert!(!queue.is_queued(id).unwrap());
    assert_eq!(std::fs::read_dir(queue.base().join("interrupted")).unwrap().count(), 0);
    assert_eq!(std::fs::read_dir(queue.base().join("tmp")).unwrap().count(), 0);
}

#[test]
fn dead_owner_file_job_is_recovered_under_its_id() {
    let (tmp, queue) = test_queue(Retention::ALL);
    let source = tmp.path().join("scan.png");
    std::fs::write(&source, b"png").unwrap();
    let id = queue.submit_file(&source, true).unwrap();
    stall(&queue, id, dead_pid());

    queue.recover().unwrap();

    assert!(queue.is_interrupted(id).unwrap());
}

#[test]
fn backup_is_recovered_when_working_copy_is_gone() {
    let (tmp, queue) = test_queue(Retention::ALL);
    let source = tmp.path().join("scan.png");
    std::fs::write(&source, b"png").unwrap();
    let id = queue.submit_file(&source, true).unwrap();
    let slot = stall(&queue, id, dead_pid());
    // The consumer had backed up and handed the working copy away.
    std::fs::rename(slot.join("scan.png"), slot.join("scan.png.backup")).unwrap();

    queue.recover().unwrap();

    assert_eq!(
        std::fs::read(queue.base().join("interrupted").join(id.to_string())).unwrap(),
        b"png"
    );
}

#[test]
fn live_owner_slot_is_left_alone() {
    let (_tmp, queue) = test_queue(Retention::ALL);
    let id = queue.submit_data(b"busy").unwrap();
    let slot = stall(&queue, id, std::process::id());

    let report = queue.receive(&Succeeds, true).unwrap();

    assert_eq!(report.recovered, 0);
    assert!(slot.exists());
    assert!(queue.is_processing(id).unwrap());
    assert!(!queue.is_interrupted(id).unwrap());
}

#[test]
fn slot_without_owner_suffix_is_left_alone() {
    let (_tmp, queue) = test_queue(Retention::ALL);
    let odd = queue.base().join("processing").join("raw-something-odd");
    std::fs::create_dir(&odd).unwrap();
    let unparseable = queue.base().join("processing").join("leftover.12ab");
    std::fs::create_dir(&unparseable).unwrap();

    assert_eq!(queue.recover().unwrap(), 0);
    assert!(odd.exists());
    assert!(unparseable.exists());
}

#[test]
fn recovery_runs_before_claiming_new_work() {
    let (_tmp, queue) = test_queue(Retention::ALL);
    let stalled = queue.submit_data(b"old").unwrap();
    stall(&queue, stalled, dead_pid());
    let fresh = queue.submit_data(b"new").unwrap();

    let report = queue.receive(&Succeeds, true).unwrap();

    assert_eq!(report.recovered, 1);
    assert_eq!(report.succeeded, 1);
    assert!(queue.is_interrupted(stalled).unwrap());
    assert!(queue.is_success(fresh).unwrap());
    assert_eq!(queue.counts().unwrap().processing, 0);
}

#[test]
fn slot_left_by_a_dead_recoverer_is_reclaimed_later() {
    let (_tmp, queue) = test_queue(Retention::ALL);
    let id = queue.submit_data(b"twice orphaned").unwrap();
    let slot = stall(&queue, id, dead_pid());
    // A recoverer took the slot over under its own pid and then died.
    let name = slot.file_name().unwrap().to_str().unwrap();
    let queued_name = &name[..name.rfind('.').unwrap()];
    let taken_over = slot.with_file_name(format!("{queued_name}.{}", dead_pid()));
    std::fs::rename(&slot, &taken_over).unwrap();
    assert!(queue.is_processing(id).unwrap());

    let report = queue.receive(&Succeeds, true).unwrap();

    assert_eq!(report.recovered, 1);
    assert!(!taken_over.exists());
    assert!(queue.is_interrupted(id).unwrap());
    assert_eq!(
        std::fs::read(queue.base().join("interrupted").join(id.to_string())).unwrap(),
        b"twice orphaned"
    );
}

#[test]
fn artifact_already_kept_by_a_dead_recoverer_is_not_replaced() {
    let (tmp, queue) = test_queue(Retention::ALL);
    let source = tmp.path().join("scan.png");
    std::fs::write(&source, b"original").unwrap();
    let id = queue.submit_file(&source, true).unwrap();
    let slot = stall(&queue, id, dead_pid());
    // The handler had rewritten its copy; a recoverer moved that copy out and
    // died before removing the slot and its stale backup.
    std::fs::write(slot.join("scan.png.backup"), b"original").unwrap();
    std::fs::write(slot.join("scan.png"), b"rewritten").unwrap();
    let kept = queue.base().join("interrupted").join(id.to_string());
    std::fs::rename(slot.join("scan.png"), &kept).unwrap();

    assert_eq!(queue.recover().unwrap(), 1);

    assert!(!slot.exists());
    assert_eq!(std::fs::read(&kept).unwrap(), b"rewritten");
    assert_eq!(queue.counts().unwrap().processing, 0);
}

#[test]
fn staging_files_of_dead_submitters_are_swept() {
    let (_tmp, queue) = test_queue(Retention::ALL);
    let staging = queue.base().join("tmp");
    let abandoned = staging.join(format!("{}.{}.staged", JobId::generate(), dead_pid()));
    let in_flight = staging.join(format!(
        "{}.{}.staged",
        JobId::generate(),
        std::process::id()
    ));
    let foreign = staging.join("notes.txt");
    for path in [&abandoned, &in_flight, &foreign] {
        std::fs::write(path, b"partial").unwrap();
    }

    assert_eq!(queue.recover().unwrap(), 0);

    assert!(!abandoned.exists());
    assert!(in_flight.exists());
    assert!(foreign.exists());
}
