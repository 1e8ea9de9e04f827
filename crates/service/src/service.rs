// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator service: task lifecycle, concurrency slots, guards,
//! workflow dispatch, and terminal transitions.

use crate::analytics::{compute_stats, StatsView};
use crate::error::ServiceError;
use crate::fusion::{DirFusionManager, FusionManager};
use crate::guards;
use crate::memory::MemoryService;
use crate::rounds;
use awe_adapters::ProviderRegistry;
use awe_core::{
    clip_text, parse_participant_id, Event, EvidenceBundle, ReviewVerdict, Task, TaskStatus,
};
use awe_engine::{
    evaluate_medium_gate, CancelProbe, EventSink, RunConfig, RunStatus, WorkflowEngine,
};
use awe_storage::{ArtifactStore, TaskRepository};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The API-facing task projection. The persisted row is already the
/// shape callers need, so the view is the row.
pub type TaskView = Task;

const RUNNING_SCAN_LIMIT: usize = 10_000;

/// Author decision over a waiting proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorDecision {
    Approve,
    Reject,
    Revise,
}

impl AuthorDecision {
    /// Accept either the structured `decision` string or the legacy
    /// `approve` boolean.
    pub fn parse(decision: Option<&str>, approve: Option<bool>) -> Result<Self, ServiceError> {
        let text = decision.unwrap_or("").trim().to_ascii_lowercase();
        if !text.is_empty() {
            return match text.as_str() {
                "approve" => Ok(Self::Approve),
                "reject" => Ok(Self::Reject),
                "revise" => Ok(Self::Revise),
                other => Err(ServiceError::validation(
                    format!("invalid author decision: {other}"),
                    "decision",
                )),
            };
        }
        Ok(if approve.unwrap_or(false) {
            Self::Approve
        } else {
            Self::Reject
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Revise => "revise",
        }
    }
}

pub struct OrchestratorService {
    pub(crate) repository: Arc<dyn TaskRepository>,
    pub(crate) artifacts: Arc<ArtifactStore>,
    pub(crate) engine: Arc<WorkflowEngine>,
    pub(crate) fusion: Arc<dyn FusionManager>,
    pub(crate) memory: MemoryService,
    pub(crate) registry: ProviderRegistry,
    pub(crate) max_concurrent_running_tasks: usize,
    start_slots: Mutex<HashSet<String>>,
    run_slots: Mutex<HashSet<String>>,
}

impl OrchestratorService {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        artifacts: Arc<ArtifactStore>,
        engine: Arc<WorkflowEngine>,
        max_concurrent_running_tasks: usize,
    ) -> Self {
        let fusion = Arc::new(DirFusionManager::new(artifacts.root().join("snapshots")));
        let memory = MemoryService::new(artifacts.root());
        Self {
            repository,
            artifacts,
            engine,
            fusion,
            memory,
            registry: ProviderRegistry::from_env(),
            max_concurrent_running_tasks,
            start_slots: Mutex::new(HashSet::new()),
            run_slots: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_fusion_manager(mut self, fusion: Arc<dyn FusionManager>) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    // ---- basic reads -------------------------------------------------

    pub fn get_task(&self, task_id: &str) -> Result<Option<TaskView>, ServiceError> {
        Ok(self.repository.get_task(task_id)?)
    }

    pub fn list_tasks(&self, limit: usize) -> Result<Vec<TaskView>, ServiceError> {
        Ok(self.repository.list_tasks(limit)?)
    }

    pub fn get_stats(&self) -> Result<StatsView, ServiceError> {
        Ok(compute_stats(self.repository.as_ref())?)
    }

    /// Events from the repository; falls back to the artifact mirror
    /// when the repository does not know the task.
    pub fn list_events(&self, task_id: &str) -> Result<Vec<Value>, ServiceError> {
        match self.repository.list_events(task_id) {
            Ok(rows) => Ok(rows
                .into_iter()
                .map(|row| serde_json::to_value(row).unwrap_or(Value::Null))
                .collect()),
            Err(awe_storage::StorageError::TaskNotFound(_)) => self
                .artifacts
                .read_events(task_id)
                .ok_or_else(|| ServiceError::NotFound(task_id.to_string())),
            Err(error) => Err(error.into()),
        }
    }

    /// Whole-task purge: rows, events, counters, artifact subtree.
    pub fn delete_tasks(&self, task_ids: &[String]) -> Result<usize, ServiceError> {
        let deleted = self.repository.delete_tasks(task_ids)?;
        for task_id in task_ids {
            self.artifacts.remove_task_workspace(task_id.trim());
        }
        Ok(deleted)
    }

    // ---- shared plumbing ---------------------------------------------

    pub(crate) fn require_task(&self, task_id: &str) -> Result<Task, ServiceError> {
        self.repository
            .get_task(task_id)?
            .ok_or_else(|| ServiceError::NotFound(task_id.to_string()))
    }

    /// Append to the repository (authoritative) and mirror to the
    /// artifact store; mirror failures are logged, never fatal.
    pub(crate) fn record_event(&self, task_id: &str, event: &Event) {
        if let Err(error) = self.repository.append_event(task_id, event) {
            tracing::warn!(task_id, %error, "event append failed");
        }
        if let Err(error) = self.artifacts.append_event(task_id, event) {
            tracing::debug!(task_id, %error, "event mirror append failed");
        }
    }

    pub(crate) fn patch_state(&self, task_id: &str, patch: &Value) {
        if let Err(error) = self.artifacts.update_state(task_id, patch) {
            tracing::debug!(task_id, %error, "state mirror update failed");
        }
    }

    pub(crate) fn write_final_report(&self, task_id: &str, status: TaskStatus, reason: &str) {
        let body = format!("status={status}\nreason={reason}");
        if let Err(error) = self.artifacts.write_final_report(task_id, &body) {
            tracing::debug!(task_id, %error, "final report write failed");
        }
    }

    pub(crate) fn memory_persist_preferences(&self, task: &Task) -> std::io::Result<()> {
        self.memory.persist_preferences(task)
    }

    pub(crate) fn persist_memory_outcome(&self, task: &Task, status: TaskStatus, reason: &str) {
        match self.memory.persist_outcome(task, status, reason) {
            Ok(record) => {
                self.record_event(
                    task.task_id.as_str(),
                    &Event::MemoryPersisted {
                        details: json!({
                            "memory_id": record.memory_id,
                            "status": record.status,
                            "reason": record.reason,
                        }),
                    },
                );
            }
            Err(error) => tracing::warn!(%error, "memory outcome persist failed"),
        }
    }

    pub(crate) fn emit_regression_case(&self, task: &Task, status: TaskStatus, reason: &str) {
        let payload = json!({
            "task_id": task.task_id.as_str(),
            "title": task.title,
            "description": clip_text(&task.description, 400),
            "status": status.to_string(),
            "reason": reason,
            "author_participant": task.author_participant,
            "reviewer_participants": task.reviewer_participants,
            "test_command": task.test_command,
            "lint_command": task.lint_command,
            "rounds_completed": task.rounds_completed,
            "created_at": Utc::now().to_rfc3339(),
        });
        if let Err(error) =
            self.artifacts
                .write_artifact_json(task.task_id.as_str(), "regression_case", &payload)
        {
            tracing::warn!(%error, "regression case write failed");
        }
    }

    fn terminal_failed_gate(
        &self,
        task_id: &str,
        reason: &str,
        rounds: Option<u32>,
    ) -> Result<Task, ServiceError> {
        let updated =
            self.repository
                .update_task_status(task_id, TaskStatus::FailedGate, Some(reason), rounds)?;
        self.patch_state(
            task_id,
            &json!({"status": "failed_gate", "last_gate_reason": reason}),
        );
        self.write_final_report(task_id, TaskStatus::FailedGate, reason);
        self.emit_regression_case(&updated, TaskStatus::FailedGate, reason);
        Ok(updated)
    }

    // ---- concurrency gating ------------------------------------------

    fn try_claim_start_slot(&self, task_id: &str) -> bool {
        let key = task_id.trim();
        if key.is_empty() {
            return false;
        }
        self.start_slots.lock().insert(key.to_string())
    }

    fn release_start_slot(&self, task_id: &str) {
        self.start_slots.lock().remove(task_id.trim());
    }

    fn running_task_ids(&self, exclude_task_id: &str) -> HashSet<String> {
        let rows = self.repository.list_tasks(RUNNING_SCAN_LIMIT).unwrap_or_default();
        rows.into_iter()
            .filter(|row| row.status == TaskStatus::Running)
            .map(|row| row.task_id.as_str().to_string())
            .filter(|id| id != exclude_task_id)
            .collect()
    }

    /// Admit only while running-or-in-flight tasks stay below the cap.
    fn try_claim_running_capacity(&self, task_id: &str) -> (bool, usize) {
        let key = task_id.trim().to_string();
        if key.is_empty() {
            return (false, 0);
        }
        let mut slots = self.run_slots.lock();
        if slots.contains(&key) {
            return (true, 0);
        }
        let mut occupied = self.running_task_ids(&key);
        occupied.extend(slots.iter().filter(|id| **id != key).cloned());
        if self.max_concurrent_running_tasks > 0
            && occupied.len() >= self.max_concurrent_running_tasks
        {
            return (false, occupied.len());
        }
        slots.insert(key);
        (true, occupied.len())
    }

    fn release_running_capacity(&self, task_id: &str) {
        self.run_slots.lock().remove(task_id.trim());
    }

    pub(crate) fn enter_running_state_or_defer(&self, task: &Task) -> Result<Task, ServiceError> {
        let task_id = task.task_id.as_str();
        let (claimed, running_now) = self.try_claim_running_capacity(task_id);
        if !claimed {
            let deferred = self.repository.update_task_status(
                task_id,
                TaskStatus::Queued,
                Some("concurrency_limit"),
                Some(task.rounds_completed),
            )?;
            self.record_event(
                task_id,
                &Event::StartDeferred {
                    reason: "concurrency_limit".to_string(),
                    running_now,
                    limit: self.max_concurrent_running_tasks,
                },
            );
            self.patch_state(
                task_id,
                &json!({"status": "queued", "last_gate_reason": "concurrency_limit"}),
            );
            return Ok(deferred);
        }

        let running = self.repository.update_task_status_if(
            task_id,
            task.status,
            TaskStatus::Running,
            None,
            Some(task.rounds_completed),
            None,
        )?;
        let Some(running) = running else {
            return self.require_task(task_id);
        };
        self.record_event(task_id, &Event::TaskRunning);
        self.patch_state(task_id, &json!({"status": "running"}));
        Ok(running)
    }

    // ---- lifecycle operations ----------------------------------------

    pub fn request_cancel(&self, task_id: &str) -> Result<TaskView, ServiceError> {
        let row = self.repository.set_cancel_requested(task_id, true)?;
        self.record_event(task_id, &Event::CancelRequested { requested: true });
        self.patch_state(task_id, &json!({"cancel_requested": true}));
        Ok(row)
    }

    /// Safe system-failure transition honoring concurrent terminal
    /// transitions.
    pub fn mark_failed_system(&self, task_id: &str, reason: &str) -> Result<TaskView, ServiceError> {
        tracing::warn!(task_id, reason, "mark_failed_system");
        let row = self.require_task(task_id)?;
        let row = match row.status {
            TaskStatus::Running => {
                match self.repository.update_task_status_if(
                    task_id,
                    TaskStatus::Running,
                    TaskStatus::FailedSystem,
                    Some(reason),
                    Some(row.rounds_completed),
                    None,
                )? {
                    Some(updated) => updated,
                    // Lost the CAS race; honour the other transition.
                    None => return self.require_task(task_id),
                }
            }
            TaskStatus::Passed | TaskStatus::Canceled | TaskStatus::FailedSystem => {
                return Ok(row);
            }
            // Queued / waiting_manual / failed_gate are not contested
            // by the workflow loop; unconditional update is safe.
            _ => self.repository.update_task_status(
                task_id,
                TaskStatus::FailedSystem,
                Some(reason),
                None,
            )?,
        };

        self.record_event(
            task_id,
            &Event::SystemFailure {
                reason: reason.to_string(),
            },
        );
        self.patch_state(
            task_id,
            &json!({"status": "failed_system", "last_gate_reason": reason}),
        );
        self.write_final_report(task_id, TaskStatus::FailedSystem, reason);
        Ok(row)
    }

    /// External kill switch. No-op on hard-terminal tasks; otherwise a
    /// CAS from the observed status, losing gracefully to concurrent
    /// transitions.
    pub fn force_fail_task(&self, task_id: &str, reason: &str) -> Result<TaskView, ServiceError> {
        let row = self.require_task(task_id)?;
        if row.status.is_hard_terminal() {
            return Ok(row);
        }
        let updated = self.repository.update_task_status_if(
            task_id,
            row.status,
            TaskStatus::FailedSystem,
            Some(reason),
            Some(row.rounds_completed),
            Some(true),
        )?;
        let Some(updated) = updated else {
            return self.require_task(task_id);
        };
        self.record_event(
            task_id,
            &Event::ForceFailed {
                reason: reason.to_string(),
                cancel_requested: true,
            },
        );
        self.patch_state(
            task_id,
            &json!({
                "status": "failed_system",
                "last_gate_reason": reason,
                "cancel_requested": true,
            }),
        );
        self.write_final_report(task_id, TaskStatus::FailedSystem, reason);
        self.persist_memory_outcome(&updated, TaskStatus::FailedSystem, reason);
        Ok(updated)
    }

    /// Author decision over a waiting_manual checkpoint.
    pub fn submit_author_decision(
        &self,
        task_id: &str,
        decision: AuthorDecision,
        note: Option<&str>,
    ) -> Result<TaskView, ServiceError> {
        let row = self.require_task(task_id)?;
        if row.status.is_hard_terminal() || row.status != TaskStatus::WaitingManual {
            return Ok(row);
        }

        let note_text = note.map(str::trim).filter(|text| !text.is_empty());
        self.record_event(
            task_id,
            &Event::AuthorDecision {
                decision: decision.as_str().to_string(),
                note: note_text.map(str::to_string),
            },
        );

        match decision {
            AuthorDecision::Approve => {
                self.repository.set_cancel_requested(task_id, false)?;
                let updated = self.repository.update_task_status(
                    task_id,
                    TaskStatus::Queued,
                    Some("author_approved"),
                    Some(row.rounds_completed),
                )?;
                self.patch_state(
                    task_id,
                    &json!({
                        "status": "queued",
                        "last_gate_reason": "author_approved",
                        "cancel_requested": false,
                    }),
                );
                Ok(updated)
            }
            AuthorDecision::Revise => {
                self.record_event(
                    task_id,
                    &Event::AuthorFeedbackRequested {
                        decision: "revise".to_string(),
                        note: note_text.map(str::to_string),
                    },
                );
                self.repository.set_cancel_requested(task_id, false)?;
                let updated = self.repository.update_task_status(
                    task_id,
                    TaskStatus::Queued,
                    Some("author_feedback_requested"),
                    Some(row.rounds_completed),
                )?;
                self.patch_state(
                    task_id,
                    &json!({
                        "status": "queued",
                        "last_gate_reason": "author_feedback_requested",
                        "cancel_requested": false,
                    }),
                );
                Ok(updated)
            }
            AuthorDecision::Reject => {
                self.repository.set_cancel_requested(task_id, true)?;
                let updated = self.repository.update_task_status(
                    task_id,
                    TaskStatus::Canceled,
                    Some("author_rejected"),
                    Some(row.rounds_completed),
                )?;
                self.patch_state(
                    task_id,
                    &json!({
                        "status": "canceled",
                        "last_gate_reason": "author_rejected",
                        "cancel_requested": true,
                    }),
                );
                self.write_final_report(task_id, TaskStatus::Canceled, "author_rejected");
                Ok(updated)
            }
        }
    }

    /// Manual gate endpoint: apply the medium gate over supplied
    /// observations.
    pub fn evaluate_gate(
        &self,
        task_id: &str,
        tests_ok: bool,
        lint_ok: bool,
        reviewer_verdicts: &[ReviewVerdict],
    ) -> Result<TaskView, ServiceError> {
        let outcome = evaluate_medium_gate(tests_ok, lint_ok, reviewer_verdicts);
        let status = if outcome.passed {
            TaskStatus::Passed
        } else {
            TaskStatus::FailedGate
        };
        let row =
            self.repository
                .update_task_status(task_id, status, Some(&outcome.reason), None)?;
        self.record_event(
            task_id,
            &Event::ManualGate {
                tests_ok,
                lint_ok,
                reviewer_verdicts: reviewer_verdicts.to_vec(),
                result: outcome.reason,
            },
        );
        Ok(row)
    }

    /// Latest author feedback note from the event log, if any.
    pub(crate) fn latest_author_feedback_note(&self, task_id: &str) -> Option<String> {
        let events = self.repository.list_events(task_id).ok()?;
        for event in events.iter().rev() {
            let payload = &event.payload;
            let note = payload.get("note").and_then(Value::as_str).unwrap_or("").trim();
            if note.is_empty() {
                continue;
            }
            if event.event_type == "author_feedback_requested" {
                return Some(note.to_string());
            }
            if event.event_type == "author_decision"
                && payload.get("decision").and_then(Value::as_str) == Some("revise")
            {
                return Some(note.to_string());
            }
        }
        None
    }

    // ---- start path ---------------------------------------------------

    pub async fn start_task(&self, task_id: &str) -> Result<TaskView, ServiceError> {
        if !self.try_claim_start_slot(task_id) {
            let row = self.require_task(task_id)?;
            self.record_event(
                task_id,
                &Event::StartDeduped {
                    reason: "start_inflight_dedup".to_string(),
                    status: row.status.to_string(),
                },
            );
            return Ok(row);
        }
        let result = self.start_task_impl(task_id).await;
        self.release_running_capacity(task_id);
        self.release_start_slot(task_id);
        result
    }

    async fn start_task_impl(&self, task_id: &str) -> Result<TaskView, ServiceError> {
        let row = self.require_task(task_id)?;

        // Terminal and already-active states are idempotent no-ops.
        if row.status.is_hard_terminal()
            || row.status == TaskStatus::Running
            || row.status == TaskStatus::WaitingManual
        {
            return Ok(row);
        }

        // Resume guard: the workspace must still match its fingerprint.
        let (resume_ok, resume_details) = guards::evaluate_workspace_resume_guard(&row);
        if !resume_ok {
            let reason = "workspace_resume_guard_mismatch";
            let updated = self.repository.update_task_status(
                task_id,
                TaskStatus::WaitingManual,
                Some(reason),
                Some(row.rounds_completed),
            )?;
            self.record_event(
                task_id,
                &Event::WorkspaceResumeGuardBlocked {
                    reason: reason.to_string(),
                    details: resume_details.clone(),
                },
            );
            let _ = self.artifacts.write_artifact_json(
                task_id,
                "workspace_resume_guard",
                &resume_details,
            );
            self.patch_state(
                task_id,
                &json!({
                    "status": "waiting_manual",
                    "last_gate_reason": reason,
                    "workspace_resume_guard_last": resume_details,
                }),
            );
            return Ok(updated);
        }

        // Preflight risk gate.
        let workspace_root = row.workspace_path.clone();
        let preflight = guards::run_preflight_risk_gate(&row, &workspace_root);
        self.record_event(
            task_id,
            &Event::PreflightRiskGate {
                details: preflight.clone(),
            },
        );
        let _ = self
            .artifacts
            .write_artifact_json(task_id, "preflight_risk_gate", &preflight);
        self.patch_state(task_id, &json!({"preflight_risk_gate_last": preflight}));
        if !preflight.get("passed").and_then(Value::as_bool).unwrap_or(false) {
            let reason = preflight
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("preflight_risk_gate_failed")
                .to_string();
            self.record_event(
                task_id,
                &Event::PreflightRiskGateFailed {
                    details: preflight.clone(),
                },
            );
            return self.terminal_failed_gate(task_id, &reason, Some(row.rounds_completed));
        }

        // HEAD-SHA capture for the workspace and (when auto-merging)
        // the merge target.
        let merge_target_root = row.auto_merge.then(|| row.merge_target());
        let merge_target_is_git = merge_target_root
            .as_deref()
            .map(|target| target.join(".git").exists())
            .unwrap_or(false);
        let merge_target_head_before = merge_target_root
            .as_deref()
            .and_then(guards::read_git_head_sha);
        let workspace_head = guards::read_git_head_sha(&workspace_root);
        self.record_event(
            task_id,
            &Event::HeadShaCaptured {
                workspace_head_sha: workspace_head.clone(),
                merge_target_head_sha: merge_target_head_before.clone(),
                merge_target_is_git,
                workspace_path: workspace_root.to_string_lossy().into_owned(),
                merge_target_path: merge_target_root
                    .as_deref()
                    .map(|target| target.to_string_lossy().into_owned()),
            },
        );
        if row.auto_merge && merge_target_is_git && merge_target_head_before.is_none() {
            let reason = "head_sha_missing: merge_target_start_sha_missing";
            self.record_event(
                task_id,
                &Event::HeadShaMissing {
                    reason: reason.to_string(),
                    phase: "start".to_string(),
                    target_path: merge_target_root
                        .as_deref()
                        .map(|target| target.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                },
            );
            return self.terminal_failed_gate(task_id, reason, Some(row.rounds_completed));
        }

        // Memory preload; best-effort.
        let memory_pack = self.memory.build_stage_context(
            &row,
            row.memory_mode,
            &["proposal", "discussion", "implementation", "review"],
            3,
        );
        for (stage, hits) in &memory_pack.hits {
            if hits.is_empty() {
                continue;
            }
            self.record_event(
                task_id,
                &Event::MemoryHit {
                    stage: stage.clone(),
                    memory_mode: row.memory_mode.to_string(),
                    hit_count: hits.len(),
                    details: MemoryService::hits_payload(hits),
                },
            );
        }

        // Proposal consensus precedes the run unless the author
        // already approved.
        let needs_consensus = row.last_gate_reason.as_deref() != Some("author_approved");
        let row = {
            let running = self.enter_running_state_or_defer(&row)?;
            if running.status != TaskStatus::Running {
                return Ok(running);
            }
            if needs_consensus {
                let auto_approve = row.self_loop_mode == 1;
                let prepared = self
                    .prepare_author_confirmation(&running, auto_approve, &memory_pack.contexts)
                    .await?;
                if !auto_approve || prepared.status != TaskStatus::Running {
                    return Ok(prepared);
                }
                self.require_task(task_id)?
            } else {
                running
            }
        };

        tracing::info!(task_id, "task_started");
        let round_artifacts_enabled = row.max_rounds > 1 && !row.auto_merge;
        let rounds_root = self.round_artifacts_root(task_id)?;
        let snapshot_holder: Arc<Mutex<Option<PathBuf>>> = Arc::new(Mutex::new(None));
        if round_artifacts_enabled {
            let baseline = rounds::initialize_round_baseline(&rounds_root, &workspace_root)
                .map_err(awe_storage::StorageError::Io)?;
            *snapshot_holder.lock() = Some(baseline);
        }
        let baseline_manifest = self.fusion.build_manifest(&workspace_root);
        let latest_bundle: Arc<Mutex<Option<EvidenceBundle>>> = Arc::new(Mutex::new(None));

        let sink = self.build_event_sink(
            task_id,
            &workspace_root,
            round_artifacts_enabled,
            rounds_root.clone(),
            Arc::clone(&snapshot_holder),
            Arc::clone(&latest_bundle),
        );
        let cancel_probe: CancelProbe = {
            let repository = Arc::clone(&self.repository);
            let task_key = task_id.to_string();
            Arc::new(move || repository.is_cancel_requested(&task_key).unwrap_or(false))
        };

        let config = self.build_run_config(&row, &memory_pack.contexts);
        let result = self.engine.run(config, sink, cancel_probe).await;

        let mut final_status = match result.status {
            RunStatus::Passed => TaskStatus::Passed,
            RunStatus::Canceled => TaskStatus::Canceled,
            RunStatus::FailedGate => TaskStatus::FailedGate,
        };
        let mut final_reason = result.gate_reason.clone();
        let mut evidence_manifest: Option<Value> = None;

        // Passed runs must be backed by a matching evidence bundle.
        if final_status == TaskStatus::Passed {
            let bundle = latest_bundle.lock().clone();
            let expected_round = result.rounds.max(1);
            let (bundle_ok, bundle_reason) =
                Self::validate_evidence_bundle(bundle.as_ref(), expected_round);
            if !bundle_ok {
                final_status = TaskStatus::FailedGate;
                final_reason = bundle_reason.clone();
                let details = serde_json::to_value(&bundle).unwrap_or(Value::Null);
                self.record_event(
                    task_id,
                    &Event::PrecompletionGuardFailed {
                        reason: bundle_reason,
                        expected_round,
                        details,
                    },
                );
            }
        }
        if final_status == TaskStatus::Passed {
            match self.write_evidence_manifest(
                task_id,
                &row,
                result.rounds,
                &final_reason,
                &preflight,
                latest_bundle.lock().as_ref(),
                workspace_head.as_deref(),
                merge_target_head_before.as_deref(),
            ) {
                Ok(manifest) => {
                    self.record_event(
                        task_id,
                        &Event::EvidenceManifestReady {
                            details: manifest.clone(),
                        },
                    );
                    self.patch_state(task_id, &json!({"evidence_manifest_last": manifest}));
                    evidence_manifest = Some(manifest);
                }
                Err(error) => {
                    final_status = TaskStatus::FailedGate;
                    final_reason = "precompletion_evidence_missing".to_string();
                    self.record_event(
                        task_id,
                        &Event::EvidenceManifestFailed {
                            reason: final_reason.clone(),
                            details: json!({"error": error.to_string()}),
                        },
                    );
                }
            }
        }

        tracing::info!(
            task_id,
            status = %final_status,
            rounds = result.rounds,
            reason = %final_reason,
            "task_finished"
        );

        // Terminal CAS: only write if the task is still running. A
        // concurrent force_fail wins and its state is honored.
        let updated = self.repository.update_task_status_if(
            task_id,
            TaskStatus::Running,
            final_status,
            Some(&final_reason),
            Some(result.rounds),
            Some(false),
        )?;
        let Some(updated) = updated else {
            return self.require_task(task_id);
        };
        let mut state_patch = json!({
            "status": final_status.to_string(),
            "last_gate_reason": final_reason,
            "rounds_completed": result.rounds,
            "cancel_requested": false,
        });
        if let (Some(patch), Some(manifest)) = (state_patch.as_object_mut(), &evidence_manifest) {
            patch.insert("evidence_manifest_last".to_string(), manifest.clone());
        }
        self.patch_state(task_id, &state_patch);
        let report = format!(
            "status={final_status}\nrounds={}\nreason={final_reason}",
            result.rounds
        );
        if let Err(error) = self.artifacts.write_final_report(task_id, &report) {
            tracing::debug!(task_id, %error, "final report write failed");
        }

        // Auto-merge after a passed terminal write.
        if final_status == TaskStatus::Passed && row.auto_merge {
            if let Some(view) = self
                .run_auto_merge(
                    task_id,
                    &updated,
                    &workspace_root,
                    merge_target_is_git,
                    merge_target_head_before.as_deref(),
                    &baseline_manifest,
                    result.rounds,
                )
                .await?
            {
                return Ok(view);
            }
        }

        if matches!(final_status, TaskStatus::FailedGate | TaskStatus::FailedSystem) {
            self.emit_regression_case(&updated, final_status, &final_reason);
        }
        self.persist_memory_outcome(&updated, final_status, &final_reason);
        Ok(updated)
    }

    /// HEAD re-check, promotion guard, fusion, sandbox cleanup.
    /// Returns `Some(view)` when a guard downgraded the task.
    #[allow(clippy::too_many_arguments)]
    async fn run_auto_merge(
        &self,
        task_id: &str,
        row: &Task,
        workspace_root: &Path,
        merge_target_is_git: bool,
        merge_target_head_before: Option<&str>,
        baseline_manifest: &std::collections::BTreeMap<String, String>,
        rounds: u32,
    ) -> Result<Option<TaskView>, ServiceError> {
        let target_root = row.merge_target();
        let current_head = guards::read_git_head_sha(&target_root);

        if merge_target_is_git && current_head.is_none() {
            let reason = "head_sha_missing: merge_target_end_sha_missing";
            self.record_event(
                task_id,
                &Event::HeadShaMissing {
                    reason: reason.to_string(),
                    phase: "end".to_string(),
                    target_path: target_root.to_string_lossy().into_owned(),
                },
            );
            return self
                .terminal_failed_gate(task_id, reason, Some(rounds))
                .map(Some);
        }
        if let (Some(before), Some(current)) = (merge_target_head_before, current_head.as_deref()) {
            if before != current {
                let reason = format!(
                    "head_sha_mismatch: merge_target_head_changed {}->{}",
                    &before[..before.len().min(12)],
                    &current[..current.len().min(12)]
                );
                self.record_event(
                    task_id,
                    &Event::HeadShaMismatch {
                        reason: reason.clone(),
                        before: before.to_string(),
                        current: current.to_string(),
                        target_path: target_root.to_string_lossy().into_owned(),
                    },
                );
                return self
                    .terminal_failed_gate(task_id, &reason, Some(rounds))
                    .map(Some);
            }
        }

        let guard = guards::evaluate_promotion_guard(&target_root);
        self.record_event(
            task_id,
            &Event::PromotionGuardChecked {
                details: guard.clone(),
            },
        );
        self.patch_state(task_id, &json!({"promotion_guard_last": guard}));
        if !guard.get("guard_allowed").and_then(Value::as_bool).unwrap_or(true) {
            let reason = format!(
                "promotion_guard_blocked: {}",
                guard
                    .get("guard_reason")
                    .and_then(Value::as_str)
                    .unwrap_or("blocked")
            );
            self.record_event(
                task_id,
                &Event::PromotionGuardBlocked {
                    reason: reason.clone(),
                    details: guard,
                },
            );
            return self
                .terminal_failed_gate(task_id, &reason, Some(rounds))
                .map(Some);
        }

        match self
            .fusion
            .run(task_id, workspace_root, &target_root, baseline_manifest)
        {
            Ok(summary) => {
                let payload = serde_json::to_value(&summary).unwrap_or(Value::Null);
                self.record_event(
                    task_id,
                    &Event::AutoMergeCompleted {
                        details: payload.clone(),
                    },
                );
                let _ = self
                    .artifacts
                    .write_artifact_json(task_id, "auto_merge_summary", &payload);
                self.patch_state(task_id, &json!({"auto_merge_last": payload}));
            }
            Err(error) => {
                tracing::error!(task_id, %error, "auto merge failed");
                return self
                    .mark_failed_system(task_id, &format!("auto_merge_error: {error}"))
                    .map(Some);
            }
        }

        // The task still succeeds even if sandbox cleanup fails.
        if row.sandbox_mode && row.sandbox_generated && row.sandbox_cleanup_on_pass {
            let project = row
                .project_path
                .canonicalize()
                .unwrap_or_else(|_| row.project_path.clone());
            let sandbox = workspace_root
                .canonicalize()
                .unwrap_or_else(|_| workspace_root.to_path_buf());
            if sandbox != project {
                let removed = std::fs::remove_dir_all(&sandbox);
                let payload = json!({
                    "path": sandbox.to_string_lossy(),
                    "project_path": project.to_string_lossy(),
                    "ok": removed.is_ok(),
                });
                let event = if removed.is_ok() {
                    Event::SandboxCleanupCompleted {
                        details: payload.clone(),
                    }
                } else {
                    Event::SandboxCleanupFailed {
                        details: payload.clone(),
                    }
                };
                self.record_event(task_id, &event);
                self.patch_state(task_id, &json!({"sandbox_cleanup_last": payload}));
            }
        }
        Ok(None)
    }

    // ---- manual round promotion --------------------------------------

    /// Promote one captured round snapshot into a target directory.
    /// Only for terminal multi-round tasks created without auto-merge.
    pub fn promote_selected_round(
        &self,
        task_id: &str,
        round: u32,
        merge_target_path: Option<&str>,
    ) -> Result<Value, ServiceError> {
        let row = self.require_task(task_id)?;
        if row.auto_merge {
            return Err(ServiceError::validation(
                "promote_selected_round is available only when auto_merge is off",
                "auto_merge",
            ));
        }
        if row.max_rounds <= 1 {
            return Err(ServiceError::validation(
                "promote_selected_round is available only when max_rounds > 1",
                "max_rounds",
            ));
        }
        if !row.status.is_terminal() {
            return Err(ServiceError::validation(
                "promote_selected_round requires terminal task status",
                "status",
            ));
        }

        let round = round.max(1);
        let rounds_root = self.round_artifacts_root(task_id)?;
        let source_snapshot = rounds::round_snapshot_dir(&rounds_root, round);
        if !source_snapshot.is_dir() {
            return Err(ServiceError::validation(
                format!("round snapshot not found for round {round}"),
                "round",
            ));
        }
        let baseline_snapshot = rounds::round_snapshot_dir(&rounds_root, 0);
        if !baseline_snapshot.is_dir() {
            return Err(ServiceError::validation(
                "round baseline snapshot missing",
                "round",
            ));
        }

        let target_root = merge_target_path
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(PathBuf::from)
            .or_else(|| row.merge_target_path.clone())
            .unwrap_or_else(|| row.project_path.clone());
        if !target_root.is_dir() {
            return Err(ServiceError::validation(
                "merge_target_path must be an existing directory",
                "merge_target_path",
            ));
        }

        let guard = guards::evaluate_promotion_guard(&target_root);
        self.record_event(
            task_id,
            &Event::PromotionGuardChecked {
                details: guard.clone(),
            },
        );
        self.patch_state(task_id, &json!({"promotion_guard_last": guard}));
        if !guard.get("guard_allowed").and_then(Value::as_bool).unwrap_or(true) {
            return Err(ServiceError::validation_coded(
                format!(
                    "promotion guard blocked: {}",
                    guard
                        .get("guard_reason")
                        .and_then(Value::as_str)
                        .unwrap_or("blocked")
                ),
                "merge_target_path",
                "promotion_guard_blocked",
            ));
        }

        let before_manifest = self.fusion.build_manifest(&baseline_snapshot);
        let summary = self
            .fusion
            .run(
                &format!("{task_id}-round-{round}"),
                &source_snapshot,
                &target_root,
                &before_manifest,
            )
            .map_err(awe_storage::StorageError::Io)?;
        let payload = json!({
            "task_id": task_id,
            "round": round,
            "source_snapshot_path": source_snapshot.to_string_lossy(),
            "target_path": target_root.to_string_lossy(),
            "changed_files": summary.changed_files,
            "copied_files": summary.copied_files,
            "deleted_files": summary.deleted_files,
            "snapshot_path": summary.snapshot_path,
            "changelog_path": summary.changelog_path,
            "merged_at": summary.merged_at,
            "mode": summary.mode,
        });
        self.record_event(
            task_id,
            &Event::ManualRoundPromoted {
                round,
                details: payload.clone(),
            },
        );
        let _ = self.artifacts.write_artifact_json(
            task_id,
            &format!("round-{round}-promote-summary"),
            &payload,
        );
        self.patch_state(
            task_id,
            &json!({"last_promoted_round": round, "last_promote_summary": payload}),
        );
        Ok(payload)
    }

    // ---- helpers ------------------------------------------------------

    fn round_artifacts_root(&self, task_id: &str) -> Result<PathBuf, ServiceError> {
        let task_dir = self.artifacts.create_task_workspace(task_id)?;
        let root = task_dir.join("artifacts").join("rounds");
        std::fs::create_dir_all(&root).map_err(awe_storage::StorageError::Io)?;
        Ok(root)
    }

    pub(crate) fn build_run_config(
        &self,
        row: &Task,
        memory_contexts: &std::collections::BTreeMap<String, String>,
    ) -> RunConfig {
        let author = parse_participant_id(&row.author_participant)
            .unwrap_or_else(|_| awe_core::Participant::new("unknown", "author"));
        let reviewers = row
            .reviewer_participants
            .iter()
            .filter_map(|raw| parse_participant_id(raw).ok())
            .collect();
        let mut config = RunConfig::new(
            row.task_id.as_str(),
            row.title.clone(),
            row.description.clone(),
            author,
            row.workspace_path.clone(),
            row.test_command.clone(),
            row.lint_command.clone(),
        );
        config.reviewers = reviewers;
        config.evolution_level = row.evolution_level;
        config.evolve_until = row.evolve_until.clone();
        config.max_rounds = row.max_rounds;
        config.conversation_language = row.conversation_language;
        config.provider_models = row.provider_models.clone();
        config.provider_model_params = row.provider_model_params.clone();
        config.participant_models = row.participant_models.clone();
        config.participant_model_params = row.participant_model_params.clone();
        config.claude_team_agents = row.claude_team_agents;
        config.codex_multi_agents = row.codex_multi_agents;
        config.claude_team_agents_overrides = row.claude_team_agents_overrides.clone();
        config.codex_multi_agents_overrides = row.codex_multi_agents_overrides.clone();
        config.repair_mode = row.repair_mode;
        config.memory_mode = row.memory_mode;
        config.memory_context = memory_contexts.clone();
        config.phase_timeout_seconds = row.phase_timeout_seconds.clone();
        config.plain_mode = row.plain_mode;
        config.stream_mode = row.stream_mode;
        config.debate_mode = row.debate_mode;
        config
    }

    /// Event sink wiring repository + mirror + discussion markdown +
    /// evidence bundles + round artifacts.
    fn build_event_sink(
        &self,
        task_id: &str,
        workspace_root: &Path,
        round_artifacts_enabled: bool,
        rounds_root: PathBuf,
        snapshot_holder: Arc<Mutex<Option<PathBuf>>>,
        latest_bundle: Arc<Mutex<Option<EvidenceBundle>>>,
    ) -> EventSink {
        let repository = Arc::clone(&self.repository);
        let artifacts = Arc::clone(&self.artifacts);
        let fusion = Arc::clone(&self.fusion);
        let task_key = task_id.to_string();
        let workspace = workspace_root.to_path_buf();

        Arc::new(move |event: Event| {
            if let Err(error) = repository.append_event(&task_key, &event) {
                tracing::warn!(task_id = %task_key, %error, "event append failed");
            }
            if let Err(error) = artifacts.append_event(&task_key, &event) {
                tracing::debug!(task_id = %task_key, %error, "event mirror append failed");
            }

            // Conversation events mirror into discussion markdown.
            let discussion_entry = match &event {
                Event::Discussion { round, participant, output, .. } => {
                    Some(("discussion", *round, participant.clone(), output.clone()))
                }
                Event::Implementation { round, participant, output, .. } => {
                    Some(("implementation", *round, participant.clone(), output.clone()))
                }
                Event::Review { round, participant, output, .. } => {
                    Some(("review", *round, participant.clone(), output.clone()))
                }
                Event::DebateReview { round, participant, output, .. } => {
                    Some(("debate_review", *round, participant.clone(), output.clone()))
                }
                _ => None,
            };
            if let Some((role, round, participant, content)) = discussion_entry {
                if !content.trim().is_empty() {
                    let _ = artifacts.append_discussion(
                        &task_key,
                        &format!("{role}:{participant}"),
                        round.max(1),
                        &content,
                    );
                }
            }

            // Evidence bundle capture from the checklist event.
            if let Event::PrecompletionChecklist {
                round,
                passed,
                reason,
                checks,
                evidence_paths,
            } = &event
            {
                if *round > 0 {
                    let mut bundle = EvidenceBundle {
                        task_id: task_key.clone(),
                        round: *round,
                        passed: *passed,
                        reason: reason.clone(),
                        checks: *checks,
                        evidence_paths: evidence_paths.clone(),
                        workspace_path: workspace.to_string_lossy().into_owned(),
                        generated_at: Utc::now().to_rfc3339(),
                        artifact_path: None,
                    };
                    let payload = serde_json::to_value(&bundle).unwrap_or(Value::Null);
                    match artifacts.write_artifact_json(
                        &task_key,
                        &format!("evidence_bundle_round_{round}"),
                        &payload,
                    ) {
                        Ok(path) => {
                            bundle.artifact_path = Some(path.to_string_lossy().into_owned());
                        }
                        Err(error) => {
                            tracing::warn!(task_id = %task_key, %error, "evidence bundle write failed");
                        }
                    }
                    let ready = Event::EvidenceBundleReady {
                        round: *round,
                        bundle: bundle.clone(),
                    };
                    if let Err(error) = repository.append_event(&task_key, &ready) {
                        tracing::warn!(task_id = %task_key, %error, "evidence event append failed");
                    }
                    let _ = artifacts.append_event(&task_key, &ready);
                    let _ = artifacts.update_state(
                        &task_key,
                        &json!({"evidence_bundle_last": serde_json::to_value(&bundle).unwrap_or(Value::Null)}),
                    );
                    *latest_bundle.lock() = Some(bundle);
                }
            }

            // Round snapshot + diff after each gate decision.
            if round_artifacts_enabled {
                let gate = match &event {
                    Event::GatePassed { round, reason } => Some((*round, "gate_passed", reason.clone())),
                    Event::GateFailed { round, reason, .. } => {
                        Some((*round, "gate_failed", reason.clone()))
                    }
                    _ => None,
                };
                if let Some((round, gate_status, gate_reason)) = gate {
                    if round > 0 {
                        let previous = snapshot_holder.lock().clone();
                        if let Some(previous) = previous {
                            match rounds::capture_round_artifacts(
                                fusion.as_ref(),
                                &rounds_root,
                                round,
                                &previous,
                                &workspace,
                                gate_status,
                                &gate_reason,
                            ) {
                                Ok((payload, next_snapshot)) => {
                                    *snapshot_holder.lock() = Some(next_snapshot);
                                    let ready = Event::RoundArtifactReady {
                                        round,
                                        details: payload,
                                    };
                                    if let Err(error) = repository.append_event(&task_key, &ready) {
                                        tracing::warn!(task_id = %task_key, %error, "round artifact event failed");
                                    }
                                    let _ = artifacts.append_event(&task_key, &ready);
                                }
                                Err(error) => {
                                    let failed = Event::RoundArtifactError {
                                        round,
                                        reason: error.to_string(),
                                    };
                                    if let Err(error) = repository.append_event(&task_key, &failed) {
                                        tracing::warn!(task_id = %task_key, %error, "round artifact error event failed");
                                    }
                                    let _ = artifacts.append_event(&task_key, &failed);
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// A passed run must carry a bundle for its final round, marked
    /// passed, with evidence paths and green checks.
    pub(crate) fn validate_evidence_bundle(
        bundle: Option<&EvidenceBundle>,
        expected_round: u32,
    ) -> (bool, String) {
        let Some(bundle) = bundle else {
            return (false, "precompletion_evidence_missing".to_string());
        };
        if bundle.round != expected_round {
            return (false, "precompletion_evidence_missing".to_string());
        }
        if !bundle.passed {
            let reason = if bundle.reason.trim().is_empty() {
                "precompletion_evidence_missing".to_string()
            } else {
                bundle.reason.clone()
            };
            return (false, reason);
        }
        if bundle.evidence_paths.is_empty() {
            return (false, "precompletion_evidence_missing".to_string());
        }
        if !bundle.checks.tests_ok || !bundle.checks.lint_ok {
            return (false, "precompletion_verification_missing".to_string());
        }
        (true, "passed".to_string())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_evidence_manifest(
        &self,
        task_id: &str,
        row: &Task,
        rounds_completed: u32,
        reason: &str,
        preflight: &Value,
        bundle: Option<&EvidenceBundle>,
        workspace_head_sha: Option<&str>,
        merge_target_head_sha: Option<&str>,
    ) -> Result<Value, ServiceError> {
        let manifest = json!({
            "ok": true,
            "task_id": task_id,
            "status": "passed",
            "reason": reason,
            "rounds_completed": rounds_completed,
            "auto_merge": row.auto_merge,
            "preflight_risk_gate": preflight,
            "evidence_bundle": serde_json::to_value(bundle).unwrap_or(Value::Null),
            "head_snapshot": {
                "workspace_head_sha": workspace_head_sha,
                "merge_target_head_sha": merge_target_head_sha,
            },
            "generated_at": Utc::now().to_rfc3339(),
        });
        self.artifacts
            .write_artifact_json(task_id, "evidence_manifest", &manifest)?;
        Ok(manifest)
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
