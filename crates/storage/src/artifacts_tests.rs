// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use yare::parameterized;

fn store() -> (tempfile::TempDir, ArtifactStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path()).unwrap();
    (dir, store)
}

#[test]
fn creates_deterministic_layout() {
    let (_dir, store) = store();
    let path = store.create_task_workspace("task-abc").unwrap();
    assert!(path.ends_with("threads/task-abc"));
    assert!(path.join("discussion").is_dir());
    assert!(path.join("artifacts").is_dir());
}

#[parameterized(
    traversal = { "../evil" },
    separator = { "a/b" },
    empty = { "" },
    spaced = { "task 1" },
)]
fn rejects_unsafe_task_ids(task_id: &str) {
    let (_dir, store) = store();
    assert!(store.create_task_workspace(task_id).is_err());
}

#[test]
fn events_jsonl_appends_and_reads_back() {
    let (_dir, store) = store();
    store
        .append_event("task-a", &Event::RoundStarted { round: 1 })
        .unwrap();
    store
        .append_event(
            "task-a",
            &Event::GateFailed {
                round: 1,
                reason: "tests_failed".to_string(),
                stage: None,
            },
        )
        .unwrap();
    let events = store.read_events("task-a").unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1]["type"], "gate_failed");
    assert_eq!(events[1]["reason"], "tests_failed");
}

#[test]
fn state_json_merges_and_is_replaced_atomically() {
    let (_dir, store) = store();
    store
        .update_state("task-a", &json!({"status": "queued", "rounds_completed": 0}))
        .unwrap();
    store.update_state("task-a", &json!({"status": "running"})).unwrap();
    let state = store.read_state("task-a").unwrap();
    assert_eq!(state["status"], "running");
    assert_eq!(state["rounds_completed"], 0);
}

#[test]
fn artifact_json_round_trips_with_sanitized_name() {
    let (_dir, store) = store();
    let path = store
        .write_artifact_json("task-a", "evidence bundle/1", &json!({"ok": true}))
        .unwrap();
    assert!(path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap()
        .ends_with(".json"));
    let value = store.read_artifact_json("task-a", "evidence bundle/1").unwrap();
    assert_eq!(value["ok"], true);
}

#[test]
fn discussion_appends_to_role_round_scoped_file() {
    let (dir, store) = store();
    store
        .append_discussion("task-a", "discussion:codex#author", 1, "first")
        .unwrap();
    store
        .append_discussion("task-a", "discussion:codex#author", 1, "second")
        .unwrap();
    let discussion_dir = dir.path().join("threads/task-a/discussion");
    let files: Vec<_> = std::fs::read_dir(discussion_dir).unwrap().collect();
    assert_eq!(files.len(), 1);
    let body = std::fs::read_to_string(files[0].as_ref().unwrap().path()).unwrap();
    assert!(body.contains("first"));
    assert!(body.contains("second"));
}

#[test]
fn final_report_and_removal() {
    let (_dir, store) = store();
    store
        .write_final_report("task-a", "status=passed\nrounds=1\nreason=passed")
        .unwrap();
    assert!(store
        .read_final_report("task-a")
        .unwrap()
        .starts_with("status=passed"));
    store.remove_task_workspace("task-a");
    assert!(store.read_final_report("task-a").is_none());
    // A second removal is a quiet no-op.
    store.remove_task_workspace("task-a");
}
