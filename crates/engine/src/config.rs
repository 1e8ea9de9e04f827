// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run configuration and result types.

use awe_core::{ConversationLanguage, MemoryMode, Participant, RepairMode};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Everything one workflow run needs; assembled by the orchestrator
/// from the task row.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub task_id: String,
    pub title: String,
    pub description: String,
    pub author: Participant,
    pub reviewers: Vec<Participant>,
    pub evolution_level: u8,
    pub evolve_until: Option<String>,
    pub cwd: PathBuf,
    pub max_rounds: u32,
    pub test_command: String,
    pub lint_command: String,
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
    /// Stage key (`proposal`/`discussion`/`implementation`/`review` or
    /// `all`) to recalled context text.
    pub memory_context: BTreeMap<String, String>,
    pub phase_timeout_seconds: BTreeMap<String, u64>,
    pub plain_mode: bool,
    pub stream_mode: bool,
    pub debate_mode: bool,
}

impl RunConfig {
    pub fn new(
        task_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        author: Participant,
        cwd: impl Into<PathBuf>,
        test_command: impl Into<String>,
        lint_command: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            title: title.into(),
            description: description.into(),
            author,
            reviewers: Vec::new(),
            evolution_level: 0,
            evolve_until: None,
            cwd: cwd.into(),
            max_rounds: 1,
            test_command: test_command.into(),
            lint_command: lint_command.into(),
            conversation_language: ConversationLanguage::En,
            provider_models: BTreeMap::new(),
            provider_model_params: BTreeMap::new(),
            participant_models: BTreeMap::new(),
            participant_model_params: BTreeMap::new(),
            claude_team_agents: false,
            codex_multi_agents: false,
            claude_team_agents_overrides: BTreeMap::new(),
            codex_multi_agents_overrides: BTreeMap::new(),
            repair_mode: RepairMode::Balanced,
            memory_mode: MemoryMode::Basic,
            memory_context: BTreeMap::new(),
            phase_timeout_seconds: BTreeMap::new(),
            plain_mode: true,
            stream_mode: false,
            debate_mode: false,
        }
    }

    /// Recalled context for a stage: the stage-specific entry first,
    /// the `all` entry as fallback. `Off` mode recalls nothing.
    pub fn memory_context_for_stage(&self, stage: &str) -> Option<&str> {
        if self.memory_mode == MemoryMode::Off {
            return None;
        }
        let direct = self
            .memory_context
            .get(stage)
            .map(String::as_str)
            .filter(|text| !text.trim().is_empty());
        direct.or_else(|| {
            self.memory_context
                .get("all")
                .map(String::as_str)
                .filter(|text| !text.trim().is_empty())
        })
    }
}

/// Terminal status of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Passed,
    FailedGate,
    Canceled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::FailedGate => "failed_gate",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one engine run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub status: RunStatus,
    pub rounds: u32,
    pub gate_reason: String,
}

impl RunResult {
    pub fn new(status: RunStatus, rounds: u32, gate_reason: impl Into<String>) -> Self {
        Self {
            status,
            rounds,
            gate_reason: gate_reason.into(),
        }
    }
}
