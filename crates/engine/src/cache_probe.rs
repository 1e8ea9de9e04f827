// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt-cache probes.
//!
//! Before each agent invocation the engine computes three signatures —
//! model+params, toolset toggles, static prompt prefix — and reports
//! reuse eligibility. A changed signature for the same (participant,
//! stage) pair emits a `prompt_cache_break` with the specific reason.

use awe_core::{text_signature, Event, Participant};
use std::collections::HashMap;

const PREFIX_SIGNATURE_MAX_CHARS: usize = 1800;
const PROMPT_SIGNATURE_MAX_CHARS: usize = 4000;

/// Cache-probe bookkeeping for one engine run.
#[derive(Debug, Default)]
pub struct PromptCacheState {
    model_signatures: HashMap<String, String>,
    toolset_signatures: HashMap<String, String>,
    stage_prefix_signatures: HashMap<String, String>,
}

pub struct CacheProbeInput<'a> {
    pub round: u32,
    pub stage: &'a str,
    pub participant: &'a Participant,
    pub model: Option<&'a str>,
    pub model_params: Option<&'a str>,
    pub claude_team_agents: bool,
    pub codex_multi_agents: bool,
    pub prompt: &'a str,
}

/// The static prefix is everything up to the first `Context:` marker,
/// or the first 1800 chars when the marker is absent.
fn static_prefix(prompt: &str) -> &str {
    let marker = prompt
        .find("\nContext:")
        .or_else(|| prompt.find("Context:"));
    match marker {
        Some(idx) if idx > 0 => &prompt[..idx],
        _ => {
            let end = prompt
                .char_indices()
                .nth(PREFIX_SIGNATURE_MAX_CHARS)
                .map(|(idx, _)| idx)
                .unwrap_or(prompt.len());
            &prompt[..end]
        }
    }
}

impl PromptCacheState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation; returns the probe event plus any break
    /// events for changed signatures.
    pub fn record(&mut self, input: &CacheProbeInput<'_>) -> (Event, Vec<Event>) {
        let participant_key = input.participant.participant_id().to_ascii_lowercase();
        let stage = input.stage.trim().to_ascii_lowercase();
        let stage = if stage.is_empty() { "unknown".to_string() } else { stage };
        let stage_key = format!("{participant_key}|{stage}");

        let model_label = input
            .model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("__provider_default__");
        let model_params_label = input.model_params.map(str::trim).unwrap_or("");

        let prefix_sig = text_signature(static_prefix(input.prompt), PREFIX_SIGNATURE_MAX_CHARS);
        let prompt_sig = text_signature(input.prompt, PROMPT_SIGNATURE_MAX_CHARS);
        let model_sig = text_signature(
            &format!(
                "provider={}|model={model_label}|params={model_params_label}",
                input.participant.provider
            ),
            512,
        );
        let toolset_sig = text_signature(
            &format!(
                "claude_team_agents={}|codex_multi_agents={}",
                u8::from(input.claude_team_agents),
                u8::from(input.codex_multi_agents)
            ),
            128,
        );

        let previous_model = self.model_signatures.get(&participant_key).cloned();
        let previous_toolset = self.toolset_signatures.get(&participant_key).cloned();
        let previous_prefix = self.stage_prefix_signatures.get(&stage_key).cloned();

        let model_reuse_eligible = previous_model.is_some();
        let toolset_reuse_eligible = previous_toolset.is_some();
        let prefix_reuse_eligible = previous_prefix.is_some();
        let model_reused = previous_model.as_deref() == Some(model_sig.as_str());
        let toolset_reused = previous_toolset.as_deref() == Some(toolset_sig.as_str());
        let prefix_reused = previous_prefix.as_deref() == Some(prefix_sig.as_str());

        let probe = Event::PromptCacheProbe {
            round: input.round,
            stage: stage.clone(),
            participant: input.participant.participant_id(),
            provider: input.participant.provider.clone(),
            model: model_label.to_string(),
            model_params: model_params_label.to_string(),
            prompt_chars: input.prompt.chars().count(),
            prefix_signature: prefix_sig.clone(),
            prompt_signature: prompt_sig,
            toolset_signature: toolset_sig.clone(),
            baseline: !prefix_reuse_eligible,
            prefix_reuse_eligible,
            prefix_reused,
            model_reuse_eligible,
            model_reused,
            toolset_reuse_eligible,
            toolset_reused,
        };

        let mut breaks = Vec::new();
        let mut push_break = |reason: &str, previous: &str, current: &str| {
            breaks.push(Event::PromptCacheBreak {
                round: input.round,
                stage: stage.clone(),
                participant: input.participant.participant_id(),
                provider: input.participant.provider.clone(),
                reason: reason.to_string(),
                previous_signature: previous.to_string(),
                current_signature: current.to_string(),
            });
        };
        if model_reuse_eligible && !model_reused {
            push_break(
                "model_changed",
                previous_model.as_deref().unwrap_or(""),
                &model_sig,
            );
        }
        if toolset_reuse_eligible && !toolset_reused {
            push_break(
                "toolset_changed",
                previous_toolset.as_deref().unwrap_or(""),
                &toolset_sig,
            );
        }
        if prefix_reuse_eligible && !prefix_reused {
            push_break(
                "prefix_changed",
                previous_prefix.as_deref().unwrap_or(""),
                &prefix_sig,
            );
        }

        self.model_signatures.insert(participant_key.clone(), model_sig);
        self.toolset_signatures.insert(participant_key, toolset_sig);
        self.stage_prefix_signatures.insert(stage_key, prefix_sig);
        (probe, breaks)
    }
}

#[cfg(test)]
#[path = "cache_probe_tests.rs"]
mod tests;
