// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;
use std::collections::BTreeMap;

#[test]
fn builtins_cover_known_providers() {
    let registry = ProviderRegistry::builtin();
    for provider in ["claude", "codex", "gemini"] {
        assert!(registry.is_supported(provider), "missing {provider}");
    }
    assert!(!registry.is_supported("mystery"));
    assert!(registry
        .get("claude")
        .is_some_and(|spec| spec.capabilities.claude_team_agents));
    assert!(registry
        .get("codex")
        .is_some_and(|spec| spec.capabilities.codex_multi_agents));
}

#[test]
fn lookup_is_case_insensitive() {
    let registry = ProviderRegistry::builtin();
    assert!(registry.is_supported(" Claude "));
}

#[test]
#[serial]
fn env_json_registers_extra_providers() {
    std::env::set_var(
        PROVIDER_ADAPTERS_ENV,
        r#"{"mycli": {"command": "mycli run"}, "bad": {"command": ""}}"#,
    );
    let registry = ProviderRegistry::from_env();
    std::env::remove_var(PROVIDER_ADAPTERS_ENV);

    let spec = registry.get("mycli").cloned().unwrap();
    assert_eq!(spec.command, "mycli run");
    assert_eq!(spec.model_flag, "-m");
    assert!(!registry.is_supported("bad"));
}

#[test]
#[serial]
fn unparseable_env_json_is_ignored() {
    std::env::set_var(PROVIDER_ADAPTERS_ENV, "{nope");
    let registry = ProviderRegistry::from_env();
    std::env::remove_var(PROVIDER_ADAPTERS_ENV);
    assert!(registry.is_supported("claude"));
}

#[test]
fn command_overrides_replace_or_register() {
    let mut registry = ProviderRegistry::builtin();
    let mut overrides = BTreeMap::new();
    overrides.insert("claude".to_string(), "claude-next -p".to_string());
    overrides.insert("Custom".to_string(), "custom run".to_string());
    overrides.insert("".to_string(), "ignored".to_string());
    registry.apply_command_overrides(&overrides);

    assert_eq!(registry.get("claude").unwrap().command, "claude-next -p");
    // Built-in capabilities survive a command override.
    assert!(registry.get("claude").unwrap().capabilities.claude_team_agents);
    let custom = registry.get("custom").unwrap();
    assert_eq!(custom.command, "custom run");
    assert_eq!(custom.model_flag, "-m");
}

#[test]
fn adapter_family_selection_falls_back_to_generic() {
    let registry = ProviderRegistry::builtin();
    let spec = registry.get("claude").cloned().unwrap();
    let adapter = create_adapter("claude", spec.clone());
    assert_eq!(adapter.spec().command, spec.command);
    let generic = create_adapter("somecli", ProviderSpec::default());
    assert_eq!(generic.spec().command, "");
}
