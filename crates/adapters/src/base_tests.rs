// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::generic::GenericAdapter;

fn spec(command: &str) -> ProviderSpec {
    ProviderSpec {
        command: command.to_string(),
        model_flag: "-m".to_string(),
        prompt_flag: String::new(),
        capabilities: AdapterCapabilities::default(),
    }
}

#[test]
fn build_argv_appends_model_when_absent() {
    let adapter = GenericAdapter::new(spec("mycli run"));
    let argv = adapter.build_argv(Some("model-x"), None, false, false);
    assert_eq!(argv, vec!["mycli", "run", "-m", "model-x"]);
}

#[test]
fn build_argv_respects_existing_model_flag() {
    let adapter = GenericAdapter::new(spec("mycli run --model preset"));
    let argv = adapter.build_argv(Some("model-x"), None, false, false);
    assert_eq!(argv, vec!["mycli", "run", "--model", "preset"]);
}

#[test]
fn build_argv_splits_model_params() {
    let adapter = GenericAdapter::new(spec("mycli"));
    let argv = adapter.build_argv(None, Some("--temp 0.2 --top-p '0 9'"), false, false);
    assert_eq!(argv, vec!["mycli", "--temp", "0.2", "--top-p", "0 9"]);
}

#[test]
fn prepare_runtime_invocation_defaults_to_stdin() {
    let adapter = GenericAdapter::new(spec("mycli"));
    let argv = adapter.build_argv(None, None, false, false);
    let (runtime, stdin) = adapter.prepare_runtime_invocation(&argv, "do the thing");
    assert_eq!(runtime, vec!["mycli"]);
    assert_eq!(stdin, "do the thing");
}

#[test]
fn prepare_runtime_invocation_uses_prompt_flag_when_configured() {
    let mut with_flag = spec("mycli");
    with_flag.prompt_flag = "-p".to_string();
    let adapter = GenericAdapter::new(with_flag);
    let argv = adapter.build_argv(None, None, false, false);
    let (runtime, stdin) = adapter.prepare_runtime_invocation(&argv, "prompt text");
    assert_eq!(runtime, vec!["mycli", "-p", "prompt text"]);
    assert!(stdin.is_empty());
}

#[test]
fn split_extra_args_degrades_on_bad_quoting() {
    assert_eq!(split_extra_args("--a 'b"), vec!["--a", "'b"]);
    assert!(split_extra_args("  ").is_empty());
}

#[test]
fn flag_detectors() {
    let argv: Vec<String> = ["x", "--model=foo"].map(String::from).to_vec();
    assert!(has_model_flag(&argv));
    let argv: Vec<String> = ["x", "-p"].map(String::from).to_vec();
    assert!(has_prompt_flag(&argv));
    let argv: Vec<String> = ["x", "--agents", "{}"].map(String::from).to_vec();
    assert!(has_agents_flag(&argv));
    assert!(has_multi_agent_config_token("features.multi_agent=true"));
    assert!(!has_multi_agent_config_token("sandbox=full"));
}

#[test]
fn approval_flags_keep_first_occurrence() {
    let argv: Vec<String> = ["gemini", "--approval-mode", "yolo", "--yolo", "-y"]
        .map(String::from)
        .to_vec();
    assert_eq!(
        normalize_approval_flags(argv),
        vec!["gemini", "--approval-mode", "yolo"]
    );

    let argv: Vec<String> = ["gemini", "--yolo", "--approval-mode", "auto"]
        .map(String::from)
        .to_vec();
    assert_eq!(normalize_approval_flags(argv), vec!["gemini", "--yolo"]);
}
