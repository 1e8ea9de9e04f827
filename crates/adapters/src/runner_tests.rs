// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use awe_core::Participant;
use parking_lot::Mutex as PlMutex;
use std::collections::BTreeMap;

fn runner_with_command(provider: &str, command: &str) -> ParticipantRunner {
    let mut overrides = BTreeMap::new();
    overrides.insert(provider.to_string(), command.to_string());
    ParticipantRunner::new(crate::registry::ProviderRegistry::builtin())
        .with_command_overrides(&overrides)
}

fn request(provider: &str, cwd: &std::path::Path) -> RunRequest {
    let mut request = RunRequest::new(Participant::new(provider, "tester"), "do it", cwd);
    request.timeout = std::time::Duration::from_secs(5);
    request
}

#[cfg(unix)]
fn write_script(dir: &std::path::Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn dry_run_returns_canned_pass() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ParticipantRunner::new(crate::registry::ProviderRegistry::builtin())
        .with_dry_run(true);
    let result = runner.run(request("codex", dir.path())).await;
    assert_eq!(result.verdict, awe_core::ReviewVerdict::NoBlocker);
    assert_eq!(result.returncode, 0);
    assert!(result.output.contains("dry-run participant=codex#tester"));
}

#[tokio::test]
async fn unregistered_provider_is_command_not_configured() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ParticipantRunner::new(crate::registry::ProviderRegistry::builtin());
    let result = runner.run(request("ghost", dir.path())).await;
    assert_eq!(
        result.runtime_error_reason().as_deref(),
        Some("command_not_configured")
    );
    assert!(result.output.contains("provider=ghost"));
}

#[tokio::test]
async fn missing_binary_is_command_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let runner = runner_with_command("mycli", "definitely-not-a-real-binary-abc123");
    let result = runner.run(request("mycli", dir.path())).await;
    assert_eq!(
        result.runtime_error_reason().as_deref(),
        Some("command_not_found")
    );
    assert_eq!(result.verdict, awe_core::ReviewVerdict::Unknown);
    assert_eq!(result.next_action, awe_core::NextAction::Stop);
}

#[cfg(unix)]
#[tokio::test]
async fn success_parses_control_object_from_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "agent.sh",
        "echo 'All good.'\necho '{\"verdict\":\"NO_BLOCKER\",\"next_action\":\"pass\"}'",
    );
    let runner = runner_with_command("mycli", &format!("sh {script}"));
    let result = runner.run(request("mycli", dir.path())).await;
    assert_eq!(result.returncode, 0);
    assert_eq!(result.verdict, awe_core::ReviewVerdict::NoBlocker);
    assert_eq!(result.next_action, awe_core::NextAction::Pass);
    assert!(result.output.contains("All good."));
}

#[cfg(unix)]
#[tokio::test]
async fn stdin_carries_the_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "echoer.sh", "cat");
    let runner = runner_with_command("mycli", &format!("sh {script}"));
    let mut req = request("mycli", dir.path());
    req.prompt = "prompt-payload-42".to_string();
    let result = runner.run(req).await;
    assert!(result.output.contains("prompt-payload-42"));
}

#[cfg(unix)]
#[tokio::test]
async fn provider_limit_detected_regardless_of_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "limited.sh", "echo 'You hit your limit for today'");
    let runner = runner_with_command("mycli", &format!("sh {script}"));
    let result = runner.run(request("mycli", dir.path())).await;
    assert_eq!(
        result.runtime_error_reason().as_deref(),
        Some("provider_limit")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn nonzero_exit_is_command_failed_with_stderr_attached() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "broken.sh", "echo boom >&2\nexit 3");
    let runner = runner_with_command("mycli", &format!("sh {script}"));
    let result = runner.run(request("mycli", dir.path())).await;
    assert_eq!(
        result.runtime_error_reason().as_deref(),
        Some("command_failed")
    );
    assert!(result.output.contains("returncode=3"));
}

#[cfg(unix)]
#[tokio::test]
async fn timeout_budget_is_shared_across_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "slow.sh", "sleep 30");
    let runner =
        runner_with_command("mycli", &format!("sh {script}")).with_timeout_retries(1);
    let mut req = request("mycli", dir.path());
    req.timeout = std::time::Duration::from_millis(400);
    let started = std::time::Instant::now();
    let result = runner.run(req).await;
    let elapsed = started.elapsed();
    assert_eq!(
        result.runtime_error_reason().as_deref(),
        Some("command_timeout")
    );
    assert!(result.output.contains("attempts=2"));
    // Budget plus bounded backoff, nowhere near 2x30s.
    assert!(elapsed < std::time::Duration::from_secs(5), "took {elapsed:?}");
}

#[cfg(unix)]
#[tokio::test]
async fn stream_callback_receives_both_pipes() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "streamy.sh",
        "echo out-line-1\necho err-line-1 >&2\necho out-line-2",
    );
    let runner = runner_with_command("mycli", &format!("sh {script}"));
    let seen: std::sync::Arc<PlMutex<Vec<(String, String)>>> =
        std::sync::Arc::new(PlMutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    let mut req = request("mycli", dir.path());
    req.on_stream = Some(std::sync::Arc::new(move |stream: &str, chunk: &str| {
        sink.lock().push((stream.to_string(), chunk.to_string()));
    }));
    let result = runner.run(req).await;
    assert_eq!(result.returncode, 0);
    let seen = seen.lock();
    assert!(seen.iter().any(|(s, c)| s == "stdout" && c.contains("out-line-1")));
    assert!(seen.iter().any(|(s, c)| s == "stderr" && c.contains("err-line-1")));
}

#[test]
fn clip_prompt_appends_marker() {
    let long = "y".repeat(2000);
    let clipped = ParticipantRunner::clip_prompt_for_retry(&long);
    assert!(clipped.contains("[retry prompt clipped: 800 chars removed]"));
    assert_eq!(ParticipantRunner::clip_prompt_for_retry("short"), "short");
}

#[test]
fn attempt_timeout_splits_remaining_budget() {
    use std::time::Duration;
    let t = ParticipantRunner::compute_attempt_timeout(Duration::from_secs(10), 2);
    assert_eq!(t, Duration::from_secs(5));
    // Tiny remaining budget still gets the floor, capped at remaining.
    let t = ParticipantRunner::compute_attempt_timeout(Duration::from_millis(20), 3);
    assert_eq!(t, Duration::from_millis(20));
    let t = ParticipantRunner::compute_attempt_timeout(Duration::ZERO, 1);
    assert!(t.is_zero());
}

#[test]
fn runtime_error_reason_maps_markers() {
    assert_eq!(
        runtime_error_reason("provider_limit provider=codex command=codex exec", 2).as_deref(),
        Some("provider_limit")
    );
    assert_eq!(
        runtime_error_reason("fine output", 1).as_deref(),
        Some("command_failed")
    );
    assert_eq!(runtime_error_reason("fine output", 0), None);
}

#[cfg(unix)]
#[test]
fn child_env_prepends_workspace_src() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    let env = ParticipantRunner::build_child_env(dir.path());
    let pythonpath = env
        .iter()
        .find(|(key, _)| key == "PYTHONPATH")
        .map(|(_, value)| value.clone())
        .unwrap();
    assert!(pythonpath.starts_with(&dir.path().join("src").to_string_lossy().into_owned()));
    assert!(!env.iter().any(|(key, _)| key == "PYTEST_CURRENT_TEST"));
}

#[test]
fn child_env_without_src_leaves_pythonpath_alone() {
    let dir = tempfile::tempdir().unwrap();
    let env = ParticipantRunner::build_child_env(dir.path());
    let parent = std::env::var("PYTHONPATH").unwrap_or_default();
    let child = env
        .iter()
        .find(|(key, _)| key == "PYTHONPATH")
        .map(|(_, value)| value.clone())
        .unwrap_or_default();
    assert_eq!(child, parent);
}
