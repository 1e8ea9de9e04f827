// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider adapter contract and shared argv helpers.

use crate::tokenize::split_command;
use serde::{Deserialize, Serialize};

/// Agent features a provider CLI declares support for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterCapabilities {
    pub claude_team_agents: bool,
    pub codex_multi_agents: bool,
}

/// Registered description of a provider CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSpec {
    /// Base command line, e.g. `claude -p --output-format text`.
    pub command: String,
    /// Flag used to select a model, e.g. `-m` or `--model`.
    pub model_flag: String,
    /// Flag used to pass the prompt as an argument instead of stdin.
    /// Empty means the prompt is written to stdin.
    pub prompt_flag: String,
    pub capabilities: AdapterCapabilities,
}

/// Shapes invocations of one provider CLI. The three operations are
/// pure: no I/O, no process state.
pub trait ProviderAdapter: Send + Sync {
    fn spec(&self) -> &ProviderSpec;

    /// Provider-specific argv adjustments applied after the common
    /// model/model-params handling.
    fn extend_argv(
        &self,
        argv: Vec<String>,
        claude_team_agents: bool,
        codex_multi_agents: bool,
    ) -> Vec<String> {
        let _ = (claude_team_agents, codex_multi_agents);
        argv
    }

    /// Provider-specific output cleanup. Default keeps the text as-is.
    fn normalize_output(&self, raw: &str) -> String {
        raw.trim().to_string()
    }

    /// Build the full argv from the base command plus overrides.
    fn build_argv(
        &self,
        model: Option<&str>,
        model_params: Option<&str>,
        claude_team_agents: bool,
        codex_multi_agents: bool,
    ) -> Vec<String> {
        let spec = self.spec();
        let mut argv = split_command(&spec.command).unwrap_or_default();
        if let Some(model) = model.map(str::trim).filter(|m| !m.is_empty()) {
            if !has_model_flag(&argv) && !spec.model_flag.is_empty() {
                argv.push(spec.model_flag.clone());
                argv.push(model.to_string());
            }
        }
        if let Some(params) = model_params {
            argv.extend(split_extra_args(params));
        }
        self.extend_argv(argv, claude_team_agents, codex_multi_agents)
    }

    /// Final argv and stdin payload for one invocation.
    fn prepare_runtime_invocation(&self, argv: &[String], prompt: &str) -> (Vec<String>, String) {
        let spec = self.spec();
        if spec.prompt_flag.is_empty() {
            return (argv.to_vec(), prompt.to_string());
        }
        let mut full = argv.to_vec();
        if !has_prompt_flag(&full) {
            full.push(spec.prompt_flag.clone());
            full.push(prompt.to_string());
            return (full, String::new());
        }
        (full, prompt.to_string())
    }
}

/// Split an extra-args string into argv tokens; malformed quoting
/// degrades to whitespace splitting rather than dropping the input.
pub fn split_extra_args(raw: &str) -> Vec<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Vec::new();
    }
    split_command(text).unwrap_or_else(|_| text.split_whitespace().map(str::to_string).collect())
}

pub fn has_model_flag(argv: &[String]) -> bool {
    argv.iter()
        .any(|arg| arg == "-m" || arg == "--model" || arg.starts_with("--model="))
}

pub fn has_prompt_flag(argv: &[String]) -> bool {
    argv.iter()
        .any(|arg| arg == "-p" || arg == "--prompt" || arg.starts_with("--prompt="))
}

pub fn has_agents_flag(argv: &[String]) -> bool {
    argv.iter()
        .any(|arg| arg == "--agents" || arg.starts_with("--agents="))
}

/// True when a `-c` config value enables the codex multi-agent feature.
pub fn has_multi_agent_config_token(value: &str) -> bool {
    value.replace(' ', "").starts_with("features.multi_agent=")
}

/// Drop duplicate approval-mode flags, keeping the first occurrence.
/// `--approval-mode <value>`, `--approval-mode=<value>`, `--yolo`, and
/// `-y` all compete for the same setting.
pub fn normalize_approval_flags(argv: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(argv.len());
    let mut seen = false;
    let mut skip_value = false;
    for arg in argv {
        if skip_value {
            skip_value = false;
            if !seen {
                out.push(arg);
                seen = true;
            }
            continue;
        }
        let is_approval =
            arg == "--yolo" || arg == "-y" || arg == "--approval-mode" || arg.starts_with("--approval-mode=");
        if is_approval {
            if arg == "--approval-mode" {
                if seen {
                    skip_value = true;
                    continue;
                }
                out.push(arg);
                skip_value = true;
                continue;
            }
            if seen {
                continue;
            }
            out.push(arg);
            seen = true;
            continue;
        }
        out.push(arg);
    }
    out
}

#[cfg(test)]
#[path = "base_tests.rs"]
mod tests;
