// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::base::{AdapterCapabilities, ProviderSpec};

fn capable_spec() -> ProviderSpec {
    ProviderSpec {
        command: "codex exec".to_string(),
        model_flag: "-m".to_string(),
        prompt_flag: String::new(),
        capabilities: AdapterCapabilities {
            claude_team_agents: false,
            codex_multi_agents: true,
        },
    }
}

#[test]
fn injects_multi_agent_config_when_toggled() {
    let adapter = CodexAdapter::new(capable_spec());
    let argv = adapter.build_argv(None, None, false, true);
    assert_eq!(
        argv,
        vec!["codex", "exec", "-c", "features.multi_agent=true"]
    );
}

#[test]
fn skips_when_config_token_already_present() {
    let mut spec = capable_spec();
    spec.command = "codex exec -c features.multi_agent=true".to_string();
    let adapter = CodexAdapter::new(spec);
    let argv = adapter.build_argv(None, None, false, true);
    assert_eq!(
        argv.iter()
            .filter(|arg| arg.contains("features.multi_agent"))
            .count(),
        1
    );
}

#[test]
fn skips_without_capability() {
    let mut spec = capable_spec();
    spec.capabilities.codex_multi_agents = false;
    let adapter = CodexAdapter::new(spec);
    let argv = adapter.build_argv(None, None, false, true);
    assert_eq!(argv, vec!["codex", "exec"]);
}

#[test]
fn normalize_output_drops_banner_noise() {
    let adapter = CodexAdapter::new(capable_spec());
    let raw = "--------\n\
               workdir: /tmp/ws\n\
               model: gpt-5-codex\n\
               provider: openai\n\
               [2026-01-01T00:00:00] thinking\n\
               Changed src/lib.rs to fix the bug.\n\
               tokens used: 4242\n\
               {\"verdict\":\"NO_BLOCKER\",\"next_action\":\"pass\"}";
    let clean = adapter.normalize_output(raw);
    assert!(clean.contains("Changed src/lib.rs"));
    assert!(clean.contains("\"verdict\":\"NO_BLOCKER\""));
    assert!(!clean.contains("workdir:"));
    assert!(!clean.contains("tokens used"));
}
