// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::base::AdapterCapabilities;

fn capable_spec() -> ProviderSpec {
    ProviderSpec {
        command: "claude -p".to_string(),
        model_flag: "--model".to_string(),
        prompt_flag: String::new(),
        capabilities: AdapterCapabilities {
            claude_team_agents: true,
            codex_multi_agents: false,
        },
    }
}

#[test]
fn injects_agents_flag_when_toggled_and_capable() {
    let adapter = ClaudeAdapter::new(capable_spec());
    let argv = adapter.build_argv(None, None, true, false);
    assert_eq!(argv, vec!["claude", "-p", "--agents", "{}"]);
}

#[test]
fn skips_agents_flag_without_capability() {
    let mut spec = capable_spec();
    spec.capabilities.claude_team_agents = false;
    let adapter = ClaudeAdapter::new(spec);
    let argv = adapter.build_argv(None, None, true, false);
    assert_eq!(argv, vec!["claude", "-p"]);
}

#[test]
fn skips_agents_flag_when_already_present() {
    let mut spec = capable_spec();
    spec.command = "claude -p --agents {\"a\":1}".to_string();
    let adapter = ClaudeAdapter::new(spec);
    let argv = adapter.build_argv(None, None, true, false);
    assert_eq!(argv.iter().filter(|arg| *arg == "--agents").count(), 1);
}

#[test]
fn toggle_off_leaves_argv_alone() {
    let adapter = ClaudeAdapter::new(capable_spec());
    let argv = adapter.build_argv(Some("claude-opus-4-6"), None, false, false);
    assert_eq!(argv, vec!["claude", "-p", "--model", "claude-opus-4-6"]);
}
