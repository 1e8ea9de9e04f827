// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-participant runtime profile resolution.

use crate::config::RunConfig;
use awe_core::Participant;

/// Model and feature toggles resolved for one participant invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeProfile {
    pub model: Option<String>,
    pub model_params: Option<String>,
    pub claude_team_agents: bool,
    pub codex_multi_agents: bool,
}

/// Participant-specific settings win over provider-wide settings;
/// per-participant agent-feature overrides win over the global toggle.
pub fn resolve_runtime_profile(config: &RunConfig, participant: &Participant) -> RuntimeProfile {
    let participant_id = participant.participant_id();
    let model = config
        .participant_models
        .get(&participant_id)
        .or_else(|| config.provider_models.get(&participant.provider))
        .cloned();
    let model_params = config
        .participant_model_params
        .get(&participant_id)
        .or_else(|| config.provider_model_params.get(&participant.provider))
        .cloned();
    let claude_team_agents = config
        .claude_team_agents_overrides
        .get(&participant_id)
        .copied()
        .unwrap_or(config.claude_team_agents);
    let codex_multi_agents = config
        .codex_multi_agents_overrides
        .get(&participant_id)
        .copied()
        .unwrap_or(config.codex_multi_agents);
    RuntimeProfile {
        model,
        model_params,
        claude_team_agents,
        codex_multi_agents,
    }
}

#[cfg(test)]
#[path = "profile_tests.rs"]
mod tests;
