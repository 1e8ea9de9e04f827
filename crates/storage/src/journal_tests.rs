// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use awe_core::TaskCreateRecord;

fn record(title: &str) -> TaskCreateRecord {
    TaskCreateRecord {
        title: title.to_string(),
        max_rounds: 1,
        ..TaskCreateRecord::default()
    }
}

#[test]
fn mutations_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let repo = JournalRepository::open(dir.path()).unwrap();
        let task = repo.create_task(record("persisted")).unwrap();
        repo.update_task_status(
            task.task_id.as_str(),
            TaskStatus::Running,
            None,
            Some(1),
        )
        .unwrap();
        repo.append_event(task.task_id.as_str(), &Event::RoundStarted { round: 1 })
            .unwrap();
        repo.append_event(
            task.task_id.as_str(),
            &Event::GatePassed {
                round: 1,
                reason: "passed".to_string(),
            },
        )
        .unwrap();
        task.task_id.as_str().to_string()
    };

    let reopened = JournalRepository::open(dir.path()).unwrap();
    let task = reopened.get_task(&id).unwrap().unwrap();
    assert_eq!(task.title, "persisted");
    assert_eq!(task.status, TaskStatus::Running);
    let events = reopened.list_events(&id).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].seq, 1);
    assert_eq!(events[1].seq, 2);
    assert_eq!(events[1].event_type, "gate_passed");
}

#[test]
fn compact_folds_journal_into_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let repo = JournalRepository::open(dir.path()).unwrap();
        let task = repo.create_task(record("compacted")).unwrap();
        for round in 1..=5 {
            repo.append_event(task.task_id.as_str(), &Event::RoundStarted { round })
                .unwrap();
        }
        repo.compact().unwrap();
        // Post-compaction appends land in the fresh journal.
        repo.append_event(task.task_id.as_str(), &Event::RoundStarted { round: 6 })
            .unwrap();
        task.task_id.as_str().to_string()
    };

    assert!(dir.path().join("state.snapshot.zst").is_file());
    let reopened = JournalRepository::open(dir.path()).unwrap();
    let events = reopened.list_events(&id).unwrap();
    assert_eq!(events.len(), 6);
    assert_eq!(events.last().unwrap().seq, 6);
}

#[test]
fn torn_journal_tail_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let repo = JournalRepository::open(dir.path()).unwrap();
        let task = repo.create_task(record("torn")).unwrap();
        repo.append_event(task.task_id.as_str(), &Event::TaskRunning).unwrap();
        task.task_id.as_str().to_string()
    };
    // Simulate a crash mid-write.
    let journal = dir.path().join("journal.jsonl");
    let mut raw = std::fs::read(&journal).unwrap();
    raw.extend_from_slice(b"{\"op\":\"event_appended\",\"event\":{\"truncat");
    std::fs::write(&journal, raw).unwrap();

    let reopened = JournalRepository::open(dir.path()).unwrap();
    assert_eq!(reopened.list_events(&id).unwrap().len(), 1);
}

#[test]
fn cas_mismatch_does_not_touch_journal_state() {
    let dir = tempfile::tempdir().unwrap();
    let repo = JournalRepository::open(dir.path()).unwrap();
    let task = repo.create_task(record("cas")).unwrap();
    let miss = repo
        .update_task_status_if(
            task.task_id.as_str(),
            TaskStatus::Running,
            TaskStatus::Passed,
            Some("passed"),
            None,
            None,
        )
        .unwrap();
    assert!(miss.is_none());
    let row = repo.get_task(task.task_id.as_str()).unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Queued);
}

#[test]
fn delete_tasks_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let repo = JournalRepository::open(dir.path()).unwrap();
        let task = repo.create_task(record("doomed")).unwrap();
        let kept = repo.create_task(record("kept")).unwrap();
        assert_eq!(
            repo.delete_tasks(&[task.task_id.as_str().to_string()]).unwrap(),
            1
        );
        kept.task_id.as_str().to_string()
    };
    let reopened = JournalRepository::open(dir.path()).unwrap();
    assert_eq!(reopened.list_tasks(10).unwrap().len(), 1);
    assert_eq!(reopened.get_task(&id).unwrap().unwrap().title, "kept");
}
