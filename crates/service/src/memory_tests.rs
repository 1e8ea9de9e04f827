// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use awe_core::Task;

#[test]
fn outcomes_persist_and_recall_by_keyword_overlap() {
    let root = tempfile::tempdir().unwrap();
    let memory = MemoryService::new(root.path());

    let earlier = Task::builder()
        .title("refactor parser module")
        .description("split the parser into tokenizer and grammar stages")
        .build();
    memory
        .persist_outcome(&earlier, TaskStatus::Passed, "passed")
        .unwrap();

    let similar = Task::builder()
        .title("extend parser grammar")
        .description("the parser grammar misses ranges")
        .build();
    let pack = memory.build_stage_context(&similar, MemoryMode::Basic, &["discussion"], 3);
    let context = pack.contexts.get("discussion").unwrap();
    assert!(context.contains("refactor parser module"));
    assert!(context.contains("passed"));
    assert_eq!(pack.hits["discussion"].len(), 1);
}

#[test]
fn off_mode_recalls_nothing() {
    let root = tempfile::tempdir().unwrap();
    let memory = MemoryService::new(root.path());
    let task = Task::builder().title("anything").build();
    memory
        .persist_outcome(&task, TaskStatus::FailedGate, "tests_failed")
        .unwrap();
    let other = Task::builder().title("anything again").build();
    let pack = memory.build_stage_context(&other, MemoryMode::Off, &["discussion"], 3);
    assert!(pack.contexts.is_empty());
}

#[test]
fn own_task_records_are_excluded_from_recall() {
    let root = tempfile::tempdir().unwrap();
    let memory = MemoryService::new(root.path());
    let task = Task::builder()
        .title("unique snowflake keyword")
        .description("unique snowflake keyword")
        .build();
    memory
        .persist_outcome(&task, TaskStatus::Passed, "passed")
        .unwrap();
    let pack = memory.build_stage_context(&task, MemoryMode::Basic, &["review"], 3);
    assert!(pack.contexts.is_empty());
}

#[test]
fn unrelated_records_do_not_surface() {
    let root = tempfile::tempdir().unwrap();
    let memory = MemoryService::new(root.path());
    let earlier = Task::builder()
        .title("database migration cleanup")
        .description("vacuum analyze schedules")
        .build();
    memory
        .persist_outcome(&earlier, TaskStatus::Passed, "passed")
        .unwrap();
    let unrelated = Task::builder()
        .title("frontend styling tweak")
        .description("adjust button spacing")
        .build();
    let pack = memory.build_stage_context(&unrelated, MemoryMode::Strict, &["discussion"], 3);
    assert!(pack.contexts.is_empty());
}

#[test]
fn corrupt_lines_are_skipped() {
    let root = tempfile::tempdir().unwrap();
    let memory = MemoryService::new(root.path());
    std::fs::create_dir_all(root.path().join("memory")).unwrap();
    std::fs::write(root.path().join("memory/records.jsonl"), "{not json}\n").unwrap();
    let task = Task::builder().title("whatever words here").build();
    let pack = memory.build_stage_context(&task, MemoryMode::Basic, &["discussion"], 3);
    assert!(pack.contexts.is_empty());
}

#[test]
fn preferences_append_jsonl() {
    let root = tempfile::tempdir().unwrap();
    let memory = MemoryService::new(root.path());
    let task = Task::builder().build();
    memory.persist_preferences(&task).unwrap();
    memory.persist_preferences(&task).unwrap();
    let raw = std::fs::read_to_string(root.path().join("memory/preferences.jsonl")).unwrap();
    assert_eq!(raw.lines().count(), 2);
}
