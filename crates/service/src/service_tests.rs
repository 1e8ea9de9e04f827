// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::task_management::CreateTaskInput;
use async_trait::async_trait;
use awe_adapters::{
    AdapterResult, AgentRunner, CommandResult, CommandRunner, RunRequest, StubRunner,
};
use awe_core::TaskStatus;
use awe_storage::{ArtifactStore, InMemoryRepository};
use serial_test::serial;
use std::time::Duration;

const PASS_OUTPUT: &str =
    "Implemented the fix in src/lib.rs\n{\"verdict\":\"NO_BLOCKER\",\"next_action\":\"pass\"}";

struct GreenCommands;

#[async_trait]
impl CommandRunner for GreenCommands {
    async fn run(&self, command: &str, _cwd: &Path, _timeout: Duration) -> CommandResult {
        CommandResult {
            ok: true,
            command: command.to_string(),
            returncode: 0,
            stdout: "ok".to_string(),
            stderr: String::new(),
        }
    }
}

struct Harness {
    service: Arc<OrchestratorService>,
    repository: Arc<InMemoryRepository>,
    runner: Arc<StubRunner>,
    _artifact_dir: tempfile::TempDir,
    workspace_dir: tempfile::TempDir,
}

fn harness(max_concurrent: usize) -> Harness {
    let artifact_dir = tempfile::tempdir().unwrap();
    let workspace_dir = tempfile::tempdir().unwrap();
    std::fs::write(workspace_dir.path().join("code.rs"), "fn seed() {}\n").unwrap();
    let repository = Arc::new(InMemoryRepository::new());
    let artifacts = Arc::new(ArtifactStore::new(artifact_dir.path()).unwrap());
    let runner = Arc::new(StubRunner::new().with_default_output(PASS_OUTPUT));
    let engine = Arc::new(WorkflowEngine::new(runner.clone(), Arc::new(GreenCommands)));
    let service = Arc::new(OrchestratorService::new(
        repository.clone(),
        artifacts,
        engine,
        max_concurrent,
    ));
    Harness {
        service,
        repository,
        runner,
        _artifact_dir: artifact_dir,
        workspace_dir,
    }
}

fn input_for(h: &Harness) -> CreateTaskInput {
    CreateTaskInput {
        title: "fix it".to_string(),
        description: "make the tests green".to_string(),
        author_participant: "codex#author-A".to_string(),
        reviewer_participants: vec!["claude#review-B".to_string()],
        workspace_path: h.workspace_dir.path().to_string_lossy().into_owned(),
        test_command: "cargo test".to_string(),
        lint_command: "cargo clippy".to_string(),
        self_loop_mode: 1,
        ..CreateTaskInput::default()
    }
}

fn event_types(h: &Harness, task_id: &str) -> Vec<String> {
    h.repository
        .list_events(task_id)
        .unwrap()
        .into_iter()
        .map(|event| event.event_type)
        .collect()
}

#[tokio::test]
async fn start_unknown_task_is_not_found() {
    let h = harness(2);
    let error = h.service.start_task("task-ghost").await.unwrap_err();
    assert!(matches!(error, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn happy_path_runs_to_passed_with_evidence_manifest() {
    let h = harness(2);
    let row = h.service.create_task(input_for(&h)).unwrap();
    let id = row.task_id.as_str().to_string();

    let finished = h.service.start_task(&id).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Passed);
    assert_eq!(finished.rounds_completed, 1);
    assert_eq!(finished.last_gate_reason.as_deref(), Some("passed"));

    let kinds = event_types(&h, &id);
    for expected in [
        "preflight_risk_gate",
        "head_sha_captured",
        "proposal_consensus_reached",
        "author_confirmation_required",
        "author_decision",
        "task_started",
        "discussion",
        "implementation",
        "review",
        "verification",
        "precompletion_checklist",
        "evidence_bundle_ready",
        "gate_passed",
        "evidence_manifest_ready",
        "memory_persisted",
    ] {
        assert!(kinds.contains(&expected.to_string()), "missing {expected}");
    }

    let report = h.service.artifacts.read_final_report(&id).unwrap();
    assert!(report.starts_with("status=passed"));
    assert!(h
        .service
        .artifacts
        .read_artifact_json(&id, "evidence_manifest")
        .is_some());
    let state = h.service.artifacts.read_state(&id).unwrap();
    assert_eq!(state["status"], "passed");
}

#[tokio::test]
async fn missing_evidence_downgrades_to_failed_gate() {
    let h = harness(2);
    let no_paths = "all done {\"verdict\":\"NO_BLOCKER\",\"next_action\":\"pass\"}";
    let runner = Arc::new(StubRunner::new().with_default_output(no_paths));
    let engine = Arc::new(WorkflowEngine::new(runner, Arc::new(GreenCommands)));
    let artifacts = Arc::new(ArtifactStore::new(h._artifact_dir.path().join("alt")).unwrap());
    let service = OrchestratorService::new(h.repository.clone(), artifacts, engine, 2);

    let row = service.create_task(input_for(&h)).unwrap();
    let finished = service.start_task(row.task_id.as_str()).await.unwrap();
    assert_eq!(finished.status, TaskStatus::FailedGate);
    assert_eq!(
        finished.last_gate_reason.as_deref(),
        Some("precompletion_evidence_missing")
    );
    // Failed terminals produce a regression case artifact.
    assert!(service
        .artifacts
        .read_artifact_json(row.task_id.as_str(), "regression_case")
        .is_some());
}

#[tokio::test]
async fn concurrency_cap_defers_with_start_deferred_event() {
    let h = harness(1);
    let t1 = h.service.create_task(input_for(&h)).unwrap();
    h.repository
        .update_task_status(t1.task_id.as_str(), TaskStatus::Running, None, None)
        .unwrap();

    let t2 = h.service.create_task(input_for(&h)).unwrap();
    let deferred = h.service.start_task(t2.task_id.as_str()).await.unwrap();
    assert_eq!(deferred.status, TaskStatus::Queued);
    assert_eq!(deferred.last_gate_reason.as_deref(), Some("concurrency_limit"));
    assert!(event_types(&h, t2.task_id.as_str()).contains(&"start_deferred".to_string()));
}

#[tokio::test]
async fn force_fail_after_pass_is_a_no_op() {
    let h = harness(2);
    let row = h.service.create_task(input_for(&h)).unwrap();
    let id = row.task_id.as_str().to_string();
    let finished = h.service.start_task(&id).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Passed);

    let after = h.service.force_fail_task(&id, "operator_panic").unwrap();
    assert_eq!(after.status, TaskStatus::Passed);
    assert!(!event_types(&h, &id).contains(&"force_failed".to_string()));
}

#[tokio::test]
async fn force_fail_preserves_reason_verbatim_and_sets_cancel() {
    let h = harness(2);
    let row = h.service.create_task(input_for(&h)).unwrap();
    let id = row.task_id.as_str().to_string();
    let failed = h
        .service
        .force_fail_task(&id, "watchdog_timeout: stuck for 2h")
        .unwrap();
    assert_eq!(failed.status, TaskStatus::FailedSystem);
    assert_eq!(
        failed.last_gate_reason.as_deref(),
        Some("watchdog_timeout: stuck for 2h")
    );
    assert!(failed.cancel_requested);
    let report = h.service.artifacts.read_final_report(&id).unwrap();
    assert!(report.contains("watchdog_timeout: stuck for 2h"));
}

#[tokio::test]
async fn mark_failed_system_is_noop_on_terminal_states() {
    let h = harness(2);
    let row = h.service.create_task(input_for(&h)).unwrap();
    let id = row.task_id.as_str().to_string();
    h.repository
        .update_task_status(&id, TaskStatus::Passed, Some("passed"), Some(1))
        .unwrap();
    let after = h.service.mark_failed_system(&id, "background_error: x").unwrap();
    assert_eq!(after.status, TaskStatus::Passed);
}

#[tokio::test]
async fn author_decisions_route_waiting_tasks() {
    let h = harness(2);

    // approve -> queued with author_approved and cancel cleared
    let row = h.service.create_task(input_for(&h)).unwrap();
    let id = row.task_id.as_str().to_string();
    h.repository
        .update_task_status(&id, TaskStatus::WaitingManual, Some("author_confirmation_required"), None)
        .unwrap();
    h.repository.set_cancel_requested(&id, true).unwrap();
    let approved = h
        .service
        .submit_author_decision(&id, AuthorDecision::Approve, None)
        .unwrap();
    assert_eq!(approved.status, TaskStatus::Queued);
    assert_eq!(approved.last_gate_reason.as_deref(), Some("author_approved"));
    assert!(!approved.cancel_requested);

    // revise -> queued with feedback event carrying the note
    let row = h.service.create_task(input_for(&h)).unwrap();
    let id = row.task_id.as_str().to_string();
    h.repository
        .update_task_status(&id, TaskStatus::WaitingManual, None, None)
        .unwrap();
    let revised = h
        .service
        .submit_author_decision(&id, AuthorDecision::Revise, Some("narrow the scope"))
        .unwrap();
    assert_eq!(revised.status, TaskStatus::Queued);
    assert_eq!(
        revised.last_gate_reason.as_deref(),
        Some("author_feedback_requested")
    );
    assert!(event_types(&h, &id).contains(&"author_feedback_requested".to_string()));
    assert_eq!(
        h.service.latest_author_feedback_note(&id).as_deref(),
        Some("narrow the scope")
    );

    // reject -> canceled
    let row = h.service.create_task(input_for(&h)).unwrap();
    let id = row.task_id.as_str().to_string();
    h.repository
        .update_task_status(&id, TaskStatus::WaitingManual, None, None)
        .unwrap();
    let rejected = h
        .service
        .submit_author_decision(&id, AuthorDecision::Reject, None)
        .unwrap();
    assert_eq!(rejected.status, TaskStatus::Canceled);
    assert_eq!(rejected.last_gate_reason.as_deref(), Some("author_rejected"));

    // decisions outside waiting_manual are no-ops
    let untouched = h
        .service
        .submit_author_decision(&id, AuthorDecision::Approve, None)
        .unwrap();
    assert_eq!(untouched.status, TaskStatus::Canceled);
}

#[test]
fn author_decision_parsing() {
    assert_eq!(
        AuthorDecision::parse(Some("revise"), None).unwrap(),
        AuthorDecision::Revise
    );
    assert_eq!(
        AuthorDecision::parse(None, Some(true)).unwrap(),
        AuthorDecision::Approve
    );
    assert_eq!(
        AuthorDecision::parse(None, None).unwrap(),
        AuthorDecision::Reject
    );
    assert!(AuthorDecision::parse(Some("maybe"), None).is_err());
}

#[tokio::test]
async fn mutated_workspace_blocks_start_via_resume_guard() {
    let h = harness(2);
    let row = h.service.create_task(input_for(&h)).unwrap();
    // Mutate the workspace between create and start.
    std::fs::write(h.workspace_dir.path().join("sneaky.rs"), "fn x() {}").unwrap();

    let blocked = h.service.start_task(row.task_id.as_str()).await.unwrap();
    assert_eq!(blocked.status, TaskStatus::WaitingManual);
    assert_eq!(
        blocked.last_gate_reason.as_deref(),
        Some("workspace_resume_guard_mismatch")
    );
    assert!(event_types(&h, row.task_id.as_str())
        .contains(&"workspace_resume_guard_blocked".to_string()));
    assert!(h
        .service
        .artifacts
        .read_artifact_json(row.task_id.as_str(), "workspace_resume_guard")
        .is_some());
}

#[tokio::test]
async fn auto_merge_target_without_head_fails_fast() {
    let h = harness(2);
    let target = tempfile::tempdir().unwrap();
    // A .git directory that the git binary cannot resolve a HEAD from.
    std::fs::create_dir_all(target.path().join(".git")).unwrap();
    let mut input = input_for(&h);
    input.auto_merge = true;
    input.merge_target_path = Some(target.path().to_string_lossy().into_owned());
    let row = h.service.create_task(input).unwrap();

    let blocked = h.service.start_task(row.task_id.as_str()).await.unwrap();
    assert_eq!(blocked.status, TaskStatus::FailedGate);
    assert!(blocked
        .last_gate_reason
        .as_deref()
        .unwrap()
        .starts_with("head_sha_missing"));
    assert!(event_types(&h, row.task_id.as_str()).contains(&"head_sha_missing".to_string()));
}

#[tokio::test]
async fn auto_merge_copies_workspace_into_target() {
    let h = harness(2);
    let target = tempfile::tempdir().unwrap();
    let mut input = input_for(&h);
    input.auto_merge = true;
    input.merge_target_path = Some(target.path().to_string_lossy().into_owned());
    let row = h.service.create_task(input).unwrap();

    let finished = h.service.start_task(row.task_id.as_str()).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Passed);
    assert!(target.path().join("code.rs").is_file());
    let kinds = event_types(&h, row.task_id.as_str());
    assert!(kinds.contains(&"promotion_guard_checked".to_string()));
    assert!(kinds.contains(&"auto_merge_completed".to_string()));
}

#[tokio::test]
async fn concurrent_starts_dedupe_to_one_execution() {
    // A runner slow enough for the second start to land mid-flight.
    struct SlowRunner(Arc<StubRunner>);

    #[async_trait]
    impl AgentRunner for SlowRunner {
        async fn run(&self, request: RunRequest) -> AdapterResult {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.0.run(request).await
        }
    }

    let artifact_dir = tempfile::tempdir().unwrap();
    let workspace_dir = tempfile::tempdir().unwrap();
    std::fs::write(workspace_dir.path().join("code.rs"), "fn seed() {}").unwrap();
    let repository = Arc::new(InMemoryRepository::new());
    let artifacts = Arc::new(ArtifactStore::new(artifact_dir.path()).unwrap());
    let stub = Arc::new(StubRunner::new().with_default_output(PASS_OUTPUT));
    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(SlowRunner(stub)),
        Arc::new(GreenCommands),
    ));
    let service = Arc::new(OrchestratorService::new(
        repository.clone(),
        artifacts,
        engine,
        2,
    ));
    let input = CreateTaskInput {
        title: "dedupe".to_string(),
        description: "d".to_string(),
        author_participant: "codex#author-A".to_string(),
        reviewer_participants: vec!["claude#review-B".to_string()],
        workspace_path: workspace_dir.path().to_string_lossy().into_owned(),
        test_command: "cargo test".to_string(),
        lint_command: "cargo clippy".to_string(),
        self_loop_mode: 1,
        ..CreateTaskInput::default()
    };
    let row = service.create_task(input).unwrap();
    let id = row.task_id.as_str().to_string();

    let first = {
        let service = Arc::clone(&service);
        let id = id.clone();
        tokio::spawn(async move { service.start_task(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let service = Arc::clone(&service);
        let id = id.clone();
        tokio::spawn(async move { service.start_task(&id).await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert!(first.status == TaskStatus::Passed || second.status == TaskStatus::Passed);

    let dedup_events = repository
        .list_events(&id)
        .unwrap()
        .into_iter()
        .filter(|event| event.event_type == "start_deduped")
        .count();
    assert_eq!(dedup_events, 1);
    let started_events = repository
        .list_events(&id)
        .unwrap()
        .into_iter()
        .filter(|event| event.event_type == "task_started")
        .count();
    assert_eq!(started_events, 1);
}

#[tokio::test]
async fn promote_selected_round_requires_manual_multi_round_terminal() {
    let h = harness(2);
    let mut input = input_for(&h);
    input.max_rounds = 1;
    let row = h.service.create_task(input).unwrap();
    let error = h
        .service
        .promote_selected_round(row.task_id.as_str(), 1, None)
        .unwrap_err();
    assert_eq!(error.field(), Some("max_rounds"));
}

#[tokio::test]
#[serial]
async fn promote_selected_round_applies_snapshot_to_target() {
    let h = harness(2);
    let mut input = input_for(&h);
    input.max_rounds = 2;
    input.auto_merge = false;
    // Multi-round manual promote forces a sandbox; keep it local.
    let sandbox_base = tempfile::tempdir().unwrap();
    std::env::set_var(crate::sandbox::SANDBOX_BASE_ENV, sandbox_base.path());
    let row = h.service.create_task(input).unwrap();
    std::env::remove_var(crate::sandbox::SANDBOX_BASE_ENV);

    let finished = h.service.start_task(row.task_id.as_str()).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Passed);
    assert!(event_types(&h, row.task_id.as_str())
        .contains(&"round_artifact_ready".to_string()));

    let target = tempfile::tempdir().unwrap();
    let target_text = target.path().to_string_lossy().into_owned();
    let summary = h
        .service
        .promote_selected_round(row.task_id.as_str(), 1, Some(target_text.as_str()))
        .unwrap();
    assert_eq!(summary["round"], 1);
    assert!(target.path().join("code.rs").is_file());
    assert!(event_types(&h, row.task_id.as_str())
        .contains(&"manual_round_promoted".to_string()));
}

#[tokio::test]
async fn evaluate_gate_manual_endpoint_updates_status() {
    let h = harness(2);
    let row = h.service.create_task(input_for(&h)).unwrap();
    let id = row.task_id.as_str().to_string();
    let failed = h
        .service
        .evaluate_gate(&id, true, true, &[awe_core::ReviewVerdict::Blocker])
        .unwrap();
    assert_eq!(failed.status, TaskStatus::FailedGate);
    assert_eq!(failed.last_gate_reason.as_deref(), Some("review_blocker"));
    assert!(event_types(&h, &id).contains(&"manual_gate".to_string()));
}

#[tokio::test]
async fn request_cancel_persists_flag_until_terminal() {
    let h = harness(2);
    let row = h.service.create_task(input_for(&h)).unwrap();
    let id = row.task_id.as_str().to_string();
    let canceled = h.service.request_cancel(&id).unwrap();
    assert!(canceled.cancel_requested);
    assert!(event_types(&h, &id).contains(&"cancel_requested".to_string()));

    // A start observing the flag cancels during consensus.
    let finished = h.service.start_task(&id).await.unwrap();
    assert_eq!(finished.status, TaskStatus::Canceled);
    assert_eq!(finished.last_gate_reason.as_deref(), Some("canceled"));
}

#[tokio::test]
async fn list_events_falls_back_to_artifact_mirror() {
    let h = harness(2);
    h.service
        .artifacts
        .append_event(
            "task-orphan",
            &awe_core::Event::SystemFailure {
                reason: "background_error: orphaned".to_string(),
            },
        )
        .unwrap();
    let events = h.service.list_events("task-orphan").unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "system_failure");
}

#[tokio::test]
async fn delete_tasks_purges_rows_and_artifacts() {
    let h = harness(2);
    let row = h.service.create_task(input_for(&h)).unwrap();
    let id = row.task_id.as_str().to_string();
    assert!(h.service.artifacts.read_state(&id).is_some());
    let deleted = h.service.delete_tasks(&[id.clone()]).unwrap();
    assert_eq!(deleted, 1);
    assert!(h.service.get_task(&id).unwrap().is_none());
    assert!(h.service.artifacts.read_state(&id).is_none());
}

#[tokio::test]
async fn stats_reflect_lifecycle_outcomes() {
    let h = harness(2);
    let row = h.service.create_task(input_for(&h)).unwrap();
    h.service.start_task(row.task_id.as_str()).await.unwrap();
    let stats = h.service.get_stats().unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.by_status.get("passed"), Some(&1));
}

#[tokio::test]
async fn runner_call_sequence_covers_consensus_then_workflow() {
    let h = harness(2);
    let row = h.service.create_task(input_for(&h)).unwrap();
    h.service.start_task(row.task_id.as_str()).await.unwrap();
    let calls = h.runner.calls();
    // precheck review, proposal author, proposal review, then the
    // main loop: discussion, implementation, review.
    assert_eq!(calls.len(), 6);
    assert_eq!(calls[0].0, "claude#review-B");
    assert_eq!(calls[1].0, "codex#author-A");
    assert_eq!(calls[2].0, "claude#review-B");
    assert_eq!(calls[3].0, "codex#author-A");
    assert_eq!(calls[4].0, "codex#author-A");
    assert_eq!(calls[5].0, "claude#review-B");
}
