// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The persistent task record and its creation input.

use crate::id::TaskId;
use crate::options::{ConversationLanguage, MemoryMode, RepairMode};
use crate::status::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Fingerprint of the workspace captured at creation time, compared by
/// the resume guard before every start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFingerprint {
    pub schema: String,
    pub project_path: String,
    pub workspace_path: String,
    pub sandbox_mode: bool,
    pub sandbox_workspace_path: String,
    pub merge_target_path: String,
    pub project_has_git: bool,
    pub workspace_head_signature: String,
    pub project_head_signature: String,
}

/// Validated input for `TaskRepository::create_task`. The repository
/// fills in identity, status, counters, and timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCreateRecord {
    pub title: String,
    pub description: String,
    pub author_participant: String,
    pub reviewer_participants: Vec<String>,
    pub evolution_level: u8,
    pub evolve_until: Option<String>,
    pub conversation_language: ConversationLanguage,
    pub provider_models: BTreeMap<String, String>,
    pub provider_model_params: BTreeMap<String, String>,
    pub participant_models: BTreeMap<String, String>,
    pub participant_model_params: BTreeMap<String, String>,
    pub claude_team_agents: bool,
    pub codex_multi_agents: bool,
    pub claude_team_agents_overrides: BTreeMap<String, bool>,
    pub codex_multi_agents_overrides: BTreeMap<String, bool>,
    pub repair_mode: RepairMode,
    pub memory_mode: MemoryMode,
    pub phase_timeout_seconds: BTreeMap<String, u64>,
    pub plain_mode: bool,
    pub stream_mode: bool,
    pub debate_mode: bool,
    pub auto_merge: bool,
    pub merge_target_path: Option<PathBuf>,
    pub sandbox_mode: bool,
    pub sandbox_workspace_path: Option<PathBuf>,
    pub sandbox_generated: bool,
    pub sandbox_cleanup_on_pass: bool,
    pub project_path: PathBuf,
    pub self_loop_mode: u8,
    pub workspace_path: PathBuf,
    pub workspace_fingerprint: Option<WorkspaceFingerprint>,
    pub max_rounds: u32,
    pub test_command: String,
    pub lint_command: String,
}

/// A persisted task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub title: String,
    pub description: String,
    pub author_participant: String,
    pub reviewer_participants: Vec<String>,
    pub evolution_level: u8,
    pub evolve_until: Option<String>,
    pub conversation_language: ConversationLanguage,
    pub provider_models: BTreeMap<String, String>,
    pub provider_model_params: BTreeMap<String, String>,
    pub participant_models: BTreeMap<String, String>,
    pub participant_model_params: BTreeMap<String, String>,
    pub claude_team_agents: bool,
    pub codex_multi_agents: bool,
    pub claude_team_agents_overrides: BTreeMap<String, bool>,
    pub codex_multi_agents_overrides: BTreeMap<String, bool>,
    pub repair_mode: RepairMode,
    pub memory_mode: MemoryMode,
    pub phase_timeout_seconds: BTreeMap<String, u64>,
    pub plain_mode: bool,
    pub stream_mode: bool,
    pub debate_mode: bool,
    pub auto_merge: bool,
    pub merge_target_path: Option<PathBuf>,
    pub sandbox_mode: bool,
    pub sandbox_workspace_path: Option<PathBuf>,
    pub sandbox_generated: bool,
    pub sandbox_cleanup_on_pass: bool,
    pub project_path: PathBuf,
    pub self_loop_mode: u8,
    pub workspace_path: PathBuf,
    pub workspace_fingerprint: Option<WorkspaceFingerprint>,
    pub max_rounds: u32,
    pub test_command: String,
    pub lint_command: String,
    pub status: TaskStatus,
    pub last_gate_reason: Option<String>,
    pub rounds_completed: u32,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Materialize a new queued task from a validated creation record.
    pub fn from_record(record: TaskCreateRecord, task_id: TaskId, now: DateTime<Utc>) -> Self {
        Self {
            task_id,
            title: record.title,
            description: record.description,
            author_participant: record.author_participant,
            reviewer_participants: record.reviewer_participants,
            evolution_level: record.evolution_level.min(3),
            evolve_until: record.evolve_until,
            conversation_language: record.conversation_language,
            provider_models: record.provider_models,
            provider_model_params: record.provider_model_params,
            participant_models: record.participant_models,
            participant_model_params: record.participant_model_params,
            claude_team_agents: record.claude_team_agents,
            codex_multi_agents: record.codex_multi_agents,
            claude_team_agents_overrides: record.claude_team_agents_overrides,
            codex_multi_agents_overrides: record.codex_multi_agents_overrides,
            repair_mode: record.repair_mode,
            memory_mode: record.memory_mode,
            phase_timeout_seconds: record.phase_timeout_seconds,
            plain_mode: record.plain_mode,
            stream_mode: record.stream_mode,
            debate_mode: record.debate_mode,
            auto_merge: record.auto_merge,
            merge_target_path: record.merge_target_path,
            sandbox_mode: record.sandbox_mode,
            sandbox_workspace_path: record.sandbox_workspace_path,
            sandbox_generated: record.sandbox_generated,
            sandbox_cleanup_on_pass: record.sandbox_cleanup_on_pass,
            project_path: record.project_path,
            self_loop_mode: record.self_loop_mode.min(1),
            workspace_path: record.workspace_path,
            workspace_fingerprint: record.workspace_fingerprint,
            max_rounds: record.max_rounds.max(1),
            test_command: record.test_command,
            lint_command: record.lint_command,
            status: TaskStatus::Queued,
            last_gate_reason: None,
            rounds_completed: 0,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Directory the auto-merge promotes into: the explicit merge
    /// target when set, otherwise the workspace itself.
    pub fn merge_target(&self) -> PathBuf {
        self.merge_target_path
            .clone()
            .unwrap_or_else(|| self.workspace_path.clone())
    }
}

/// A persisted append-only task event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    /// 1-based, strictly increasing, gap-free per task.
    pub seq: u64,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Test builder over [`TaskCreateRecord`]: workable defaults plus
/// setters for the handful of fields tests actually vary. Everything
/// else is reachable through the record before `build`.
#[cfg(any(test, feature = "test-support"))]
pub struct TaskBuilder {
    record: TaskCreateRecord,
}

#[cfg(any(test, feature = "test-support"))]
impl TaskBuilder {
    pub fn title(mut self, v: impl Into<String>) -> Self {
        self.record.title = v.into();
        self
    }

    pub fn description(mut self, v: impl Into<String>) -> Self {
        self.record.description = v.into();
        self
    }

    pub fn project_path(mut self, v: impl Into<PathBuf>) -> Self {
        self.record.project_path = v.into();
        self
    }

    pub fn workspace_path(mut self, v: impl Into<PathBuf>) -> Self {
        self.record.workspace_path = v.into();
        self
    }

    pub fn merge_target_path(mut self, v: impl Into<PathBuf>) -> Self {
        self.record.merge_target_path = Some(v.into());
        self
    }

    pub fn workspace_fingerprint(mut self, v: WorkspaceFingerprint) -> Self {
        self.record.workspace_fingerprint = Some(v);
        self
    }

    pub fn record(mut self, apply: impl FnOnce(&mut TaskCreateRecord)) -> Self {
        apply(&mut self.record);
        self
    }

    pub fn build(self) -> Task {
        Task::from_record(self.record, TaskId::generate(), Utc::now())
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Task {
    /// Builder seeded with the defaults tests rely on.
    pub fn builder() -> TaskBuilder {
        TaskBuilder {
            record: TaskCreateRecord {
                title: "test task".to_string(),
                description: "do the thing".to_string(),
                author_participant: "codex#author-A".to_string(),
                reviewer_participants: vec!["claude#review-B".to_string()],
                test_command: "cargo test".to_string(),
                lint_command: "cargo clippy".to_string(),
                project_path: PathBuf::from("/tmp/project"),
                workspace_path: PathBuf::from("/tmp/project"),
                plain_mode: true,
                self_loop_mode: 1,
                max_rounds: 1,
                ..TaskCreateRecord::default()
            },
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
