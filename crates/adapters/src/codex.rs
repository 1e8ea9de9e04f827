// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Codex-family CLI adapter.

use crate::base::{has_multi_agent_config_token, ProviderAdapter, ProviderSpec};

pub struct CodexAdapter {
    spec: ProviderSpec,
}

impl CodexAdapter {
    pub fn new(spec: ProviderSpec) -> Self {
        Self { spec }
    }

    fn has_multi_agent_flag(argv: &[String]) -> bool {
        argv.windows(2).any(|pair| {
            pair[0] == "-c" && has_multi_agent_config_token(&pair[1])
        }) || argv.iter().any(|arg| {
            arg.strip_prefix("-c")
                .map(has_multi_agent_config_token)
                .unwrap_or(false)
        })
    }
}

impl ProviderAdapter for CodexAdapter {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    fn extend_argv(
        &self,
        mut argv: Vec<String>,
        _claude_team_agents: bool,
        codex_multi_agents: bool,
    ) -> Vec<String> {
        if codex_multi_agents
            && self.spec.capabilities.codex_multi_agents
            && !Self::has_multi_agent_flag(&argv)
        {
            argv.push("-c".to_string());
            argv.push("features.multi_agent=true".to_string());
        }
        argv
    }

    /// Drop exec-session banner noise while preserving content lines
    /// and the trailing structured control object.
    fn normalize_output(&self, raw: &str) -> String {
        let noise_prefixes = [
            "workdir:",
            "model:",
            "provider:",
            "approval:",
            "sandbox:",
            "reasoning effort:",
            "reasoning summaries:",
            "tokens used:",
        ];
        let mut kept = Vec::new();
        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("--------") {
                continue;
            }
            // Timestamped banner lines look like `[2026-01-01T00:00:00] ...`.
            if trimmed.starts_with('[') && trimmed.contains("] ") && !trimmed.ends_with('}') {
                continue;
            }
            let lowered = trimmed.to_ascii_lowercase();
            if noise_prefixes.iter().any(|prefix| lowered.starts_with(prefix)) {
                continue;
            }
            kept.push(line);
        }
        kept.join("\n").trim().to_string()
    }
}

#[cfg(test)]
#[path = "codex_tests.rs"]
mod tests;
