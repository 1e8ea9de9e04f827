// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task creation: strict input validation and sandbox provisioning.

use crate::error::ServiceError;
use crate::sandbox;
use crate::service::OrchestratorService;
use awe_core::{
    clamp_evolution_level, clamp_max_rounds, clamp_self_loop_mode, normalize_agent_overrides,
    normalize_evolve_until, normalize_participant_map, normalize_phase_timeout_seconds,
    normalize_provider_map, parse_participant_id, ConversationLanguage, MemoryMode, OptionError,
    RepairMode, Task, TaskCreateRecord,
};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Raw task-creation request as the API layer hands it over.
#[derive(Debug, Clone)]
pub struct CreateTaskInput {
    pub title: String,
    pub description: String,
    pub author_participant: String,
    pub reviewer_participants: Vec<String>,
    pub evolution_level: i64,
    pub evolve_until: Option<String>,
    pub conversation_language: Option<String>,
    pub provider_models: BTreeMap<String, String>,
    pub provider_model_params: BTreeMap<String, String>,
    pub participant_models: BTreeMap<String, String>,
    pub participant_model_params: BTreeMap<String, String>,
    pub claude_team_agents: bool,
    pub codex_multi_agents: bool,
    pub claude_team_agents_overrides: BTreeMap<String, bool>,
    pub codex_multi_agents_overrides: BTreeMap<String, bool>,
    pub repair_mode: Option<String>,
    pub memory_mode: Option<String>,
    pub phase_timeout_seconds: BTreeMap<String, u64>,
    pub plain_mode: bool,
    pub stream_mode: bool,
    pub debate_mode: bool,
    pub auto_merge: bool,
    pub merge_target_path: Option<String>,
    pub sandbox_mode: bool,
    pub sandbox_workspace_path: Option<String>,
    pub sandbox_cleanup_on_pass: bool,
    pub self_loop_mode: i64,
    pub workspace_path: String,
    pub max_rounds: i64,
    pub test_command: String,
    pub lint_command: String,
}

impl Default for CreateTaskInput {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            author_participant: String::new(),
            reviewer_participants: Vec::new(),
            evolution_level: 0,
            evolve_until: None,
            conversation_language: None,
            provider_models: BTreeMap::new(),
            provider_model_params: BTreeMap::new(),
            participant_models: BTreeMap::new(),
            participant_model_params: BTreeMap::new(),
            claude_team_agents: false,
            codex_multi_agents: false,
            claude_team_agents_overrides: BTreeMap::new(),
            codex_multi_agents_overrides: BTreeMap::new(),
            repair_mode: None,
            memory_mode: None,
            phase_timeout_seconds: BTreeMap::new(),
            plain_mode: true,
            stream_mode: false,
            debate_mode: false,
            auto_merge: false,
            merge_target_path: None,
            sandbox_mode: false,
            sandbox_workspace_path: None,
            sandbox_cleanup_on_pass: false,
            self_loop_mode: 1,
            workspace_path: String::new(),
            max_rounds: 1,
            test_command: String::new(),
            lint_command: String::new(),
        }
    }
}

fn option_error(error: OptionError, fallback_field: &str) -> ServiceError {
    let field = error.key.clone().unwrap_or_else(|| fallback_field.to_string());
    ServiceError::validation(error.message, field)
}

fn normalize_path_text(raw: Option<&str>) -> Option<PathBuf> {
    raw.map(str::trim)
        .filter(|text| !text.is_empty())
        .map(PathBuf::from)
}

impl OrchestratorService {
    /// Validate, provision the sandbox, persist the queued row, and
    /// seed the artifact mirror. Any failure after sandbox creation
    /// removes a generated sandbox.
    pub fn create_task(&self, input: CreateTaskInput) -> Result<Task, ServiceError> {
        let author = parse_participant_id(&input.author_participant)
            .map_err(|error| ServiceError::validation(error.to_string(), "author_participant"))?;
        if !self.registry.is_supported(&author.provider) {
            return Err(ServiceError::validation(
                format!("unknown provider: {}", author.provider),
                "author_participant",
            ));
        }
        if input.reviewer_participants.is_empty() {
            return Err(ServiceError::validation(
                "at least one reviewer participant is required",
                "reviewer_participants",
            ));
        }
        let mut reviewer_participants = Vec::with_capacity(input.reviewer_participants.len());
        for (idx, raw) in input.reviewer_participants.iter().enumerate() {
            let reviewer = parse_participant_id(raw).map_err(|error| {
                ServiceError::validation(error.to_string(), format!("reviewer_participants[{idx}]"))
            })?;
            if !self.registry.is_supported(&reviewer.provider) {
                return Err(ServiceError::validation(
                    format!("unknown provider: {}", reviewer.provider),
                    format!("reviewer_participants[{idx}]"),
                ));
            }
            reviewer_participants.push(reviewer.participant_id());
        }

        let project_root = PathBuf::from(input.workspace_path.trim());
        if !project_root.is_dir() {
            return Err(ServiceError::validation(
                "workspace_path must be an existing directory",
                "workspace_path",
            ));
        }
        let project_root = project_root
            .canonicalize()
            .unwrap_or(project_root);

        let conversation_language =
            ConversationLanguage::normalize(input.conversation_language.as_deref(), true)
                .map_err(|error| option_error(error, "conversation_language"))?;
        let repair_mode = RepairMode::normalize(input.repair_mode.as_deref(), true)
            .map_err(|error| option_error(error, "repair_mode"))?;
        let memory_mode = MemoryMode::normalize(input.memory_mode.as_deref(), true)
            .map_err(|error| option_error(error, "memory_mode"))?;
        let phase_timeout_seconds =
            normalize_phase_timeout_seconds(&input.phase_timeout_seconds, true)
                .map_err(|error| option_error(error, "phase_timeout_seconds"))?;
        let evolve_until = normalize_evolve_until(input.evolve_until.as_deref())
            .map_err(|error| option_error(error, "evolve_until"))?;

        let known_participants: BTreeSet<String> = std::iter::once(author.participant_id())
            .chain(reviewer_participants.iter().cloned())
            .collect();
        let provider_models = normalize_provider_map(&input.provider_models);
        let provider_model_params = normalize_provider_map(&input.provider_model_params);
        let participant_models = normalize_participant_map(
            &input.participant_models,
            &known_participants,
            "participant_models",
            true,
        )
        .map_err(|error| option_error(error, "participant_models"))?;
        let participant_model_params = normalize_participant_map(
            &input.participant_model_params,
            &known_participants,
            "participant_model_params",
            true,
        )
        .map_err(|error| option_error(error, "participant_model_params"))?;
        let claude_team_agents_overrides = normalize_agent_overrides(
            &input.claude_team_agents_overrides,
            &known_participants,
            "claude",
            "claude_team_agents_overrides",
        )
        .map_err(|error| option_error(error, "claude_team_agents_overrides"))?;
        let codex_multi_agents_overrides = normalize_agent_overrides(
            &input.codex_multi_agents_overrides,
            &known_participants,
            "codex",
            "codex_multi_agents_overrides",
        )
        .map_err(|error| option_error(error, "codex_multi_agents_overrides"))?;

        let evolution_level = clamp_evolution_level(input.evolution_level);
        let self_loop_mode = clamp_self_loop_mode(input.self_loop_mode);
        let max_rounds = clamp_max_rounds(input.max_rounds);
        let auto_merge = input.auto_merge;
        let mut sandbox_mode = input.sandbox_mode;
        let mut sandbox_workspace_path = normalize_path_text(input.sandbox_workspace_path.as_deref());

        // Multi-round manual promotion always isolates the workspace.
        if max_rounds > 1 && !auto_merge {
            sandbox_mode = true;
            sandbox_workspace_path = None;
        }

        let mut merge_target_path = normalize_path_text(input.merge_target_path.as_deref());
        if auto_merge && sandbox_mode && merge_target_path.is_none() {
            merge_target_path = Some(project_root.clone());
        }
        if auto_merge {
            if let Some(target) = &merge_target_path {
                if !target.is_dir() {
                    return Err(ServiceError::validation(
                        "merge_target_path must be an existing directory",
                        "merge_target_path",
                    ));
                }
            }
        }

        let mut sandbox_generated = false;
        let mut workspace_root = project_root.clone();
        let mut sandbox_root: Option<PathBuf> = None;

        let outcome = (|| -> Result<Task, ServiceError> {
            if sandbox_mode {
                let path = match &sandbox_workspace_path {
                    Some(path) => path.clone(),
                    None => {
                        sandbox_generated = true;
                        sandbox::default_sandbox_path(&project_root)
                    }
                };
                if path.exists() && !path.is_dir() {
                    return Err(ServiceError::validation(
                        "sandbox_workspace_path must be a directory",
                        "sandbox_workspace_path",
                    ));
                }
                std::fs::create_dir_all(&path).map_err(awe_storage::StorageError::Io)?;
                sandbox::bootstrap_sandbox_workspace(&project_root, &path)
                    .map_err(awe_storage::StorageError::Io)?;
                sandbox_root = Some(path.clone());
                sandbox_workspace_path = Some(path.clone());
                workspace_root = path;
            } else {
                sandbox_workspace_path = None;
            }

            let workspace_fingerprint = sandbox::build_workspace_fingerprint(
                &project_root,
                &workspace_root,
                sandbox_mode,
                sandbox_workspace_path.as_deref(),
                merge_target_path.as_deref(),
            );

            let record = TaskCreateRecord {
                title: input.title.clone(),
                description: input.description.clone(),
                author_participant: author.participant_id(),
                reviewer_participants: reviewer_participants.clone(),
                evolution_level,
                evolve_until: evolve_until.clone(),
                conversation_language,
                provider_models: provider_models.clone(),
                provider_model_params: provider_model_params.clone(),
                participant_models: participant_models.clone(),
                participant_model_params: participant_model_params.clone(),
                claude_team_agents: input.claude_team_agents,
                codex_multi_agents: input.codex_multi_agents,
                claude_team_agents_overrides: claude_team_agents_overrides.clone(),
                codex_multi_agents_overrides: codex_multi_agents_overrides.clone(),
                repair_mode,
                memory_mode,
                phase_timeout_seconds: phase_timeout_seconds.clone(),
                plain_mode: input.plain_mode,
                stream_mode: input.stream_mode,
                debate_mode: input.debate_mode,
                auto_merge,
                merge_target_path: merge_target_path.clone(),
                sandbox_mode,
                sandbox_workspace_path: sandbox_workspace_path.clone(),
                sandbox_generated,
                sandbox_cleanup_on_pass: input.sandbox_cleanup_on_pass,
                project_path: project_root.clone(),
                self_loop_mode,
                workspace_path: workspace_root.clone(),
                workspace_fingerprint: Some(workspace_fingerprint),
                max_rounds,
                test_command: input.test_command.clone(),
                lint_command: input.lint_command.clone(),
            };

            let row = self.repository.create_task(record)?;
            self.artifacts.create_task_workspace(row.task_id.as_str())?;
            self.artifacts.update_state(
                row.task_id.as_str(),
                &json!({
                    "status": row.status.to_string(),
                    "rounds_completed": row.rounds_completed,
                    "cancel_requested": row.cancel_requested,
                    "conversation_language": row.conversation_language.to_string(),
                    "repair_mode": row.repair_mode.to_string(),
                    "memory_mode": row.memory_mode.to_string(),
                    "sandbox_mode": row.sandbox_mode,
                    "sandbox_generated": row.sandbox_generated,
                    "sandbox_cleanup_on_pass": row.sandbox_cleanup_on_pass,
                    "self_loop_mode": row.self_loop_mode,
                    "auto_merge": row.auto_merge,
                    "max_rounds": row.max_rounds,
                    "workspace_fingerprint": row.workspace_fingerprint,
                }),
            )?;
            Ok(row)
        })();

        match outcome {
            Ok(row) => {
                tracing::info!(task_id = %row.task_id, title = %row.title, "task_created");
                if let Err(error) = self.memory_persist_preferences(&row) {
                    tracing::warn!(%error, "memory preference persist failed");
                }
                Ok(row)
            }
            Err(error) => {
                tracing::error!(%error, "create_task failed");
                if sandbox_mode && sandbox_generated {
                    if let Some(path) = &sandbox_root {
                        sandbox::cleanup_generated_sandbox(&project_root, path);
                    }
                }
                Err(error)
            }
        }
    }
}

#[cfg(test)]
#[path = "task_management_tests.rs"]
mod tests;
