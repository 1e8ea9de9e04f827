// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::Utc;

#[test]
fn from_record_initializes_runtime_state() {
    let record = TaskCreateRecord {
        title: "t".to_string(),
        description: "d".to_string(),
        author_participant: "codex#a".to_string(),
        reviewer_participants: vec!["claude#r".to_string()],
        evolution_level: 9,
        self_loop_mode: 4,
        max_rounds: 0,
        ..TaskCreateRecord::default()
    };
    let now = Utc::now();
    let task = Task::from_record(record, TaskId::generate(), now);
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.rounds_completed, 0);
    assert!(!task.cancel_requested);
    assert!(task.last_gate_reason.is_none());
    assert_eq!(task.created_at, now);
    // Out-of-range policy values are clamped, not rejected, here.
    assert_eq!(task.evolution_level, 3);
    assert_eq!(task.self_loop_mode, 1);
    assert_eq!(task.max_rounds, 1);
}

#[test]
fn merge_target_falls_back_to_workspace() {
    let task = Task::builder().workspace_path("/tmp/ws").build();
    assert_eq!(task.merge_target(), PathBuf::from("/tmp/ws"));
    let task = Task::builder()
        .workspace_path("/tmp/ws")
        .merge_target_path("/srv/target")
        .build();
    assert_eq!(task.merge_target(), PathBuf::from("/srv/target"));
}

#[test]
fn task_serde_round_trip() {
    let task = Task::builder().title("round trip").build();
    let json = serde_json::to_string(&task).unwrap();
    let back: Task = serde_json::from_str(&json).unwrap();
    assert_eq!(back.title, "round trip");
    assert_eq!(back.task_id, task.task_id);
    assert_eq!(back.status, TaskStatus::Queued);
}
