// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Start-time and promotion-time guards.

use crate::sandbox::{build_workspace_fingerprint, is_sandbox_ignored};
use awe_core::Task;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Command;

/// Comma-separated branch allowlist for promotion; empty allows any.
pub const PROMOTION_BRANCHES_ENV: &str = "AWE_PROMOTION_BRANCHES";

fn run_git(root: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// HEAD SHA of a git checkout; `None` when the path is not a git repo
/// or HEAD is unreadable.
pub fn read_git_head_sha(root: &Path) -> Option<String> {
    if !root.join(".git").exists() {
        return None;
    }
    run_git(root, &["rev-parse", "HEAD"])
}

/// Resume guard: recompute the workspace fingerprint and compare it to
/// the one captured at creation. Returns `(ok, details)`.
pub fn evaluate_workspace_resume_guard(task: &Task) -> (bool, Value) {
    let Some(expected) = &task.workspace_fingerprint else {
        return (
            true,
            json!({"ok": true, "reason": "workspace_resume_guard_unavailable"}),
        );
    };

    let actual = build_workspace_fingerprint(
        &task.project_path,
        &task.workspace_path,
        task.sandbox_mode,
        task.sandbox_workspace_path.as_deref(),
        task.merge_target_path.as_deref(),
    );

    let mut mismatches = Vec::new();
    let pairs = [
        ("schema", &expected.schema, &actual.schema),
        ("project_path", &expected.project_path, &actual.project_path),
        (
            "workspace_path",
            &expected.workspace_path,
            &actual.workspace_path,
        ),
        (
            "sandbox_workspace_path",
            &expected.sandbox_workspace_path,
            &actual.sandbox_workspace_path,
        ),
        (
            "merge_target_path",
            &expected.merge_target_path,
            &actual.merge_target_path,
        ),
        (
            "workspace_head_signature",
            &expected.workspace_head_signature,
            &actual.workspace_head_signature,
        ),
        (
            "project_head_signature",
            &expected.project_head_signature,
            &actual.project_head_signature,
        ),
    ];
    for (field, want, got) in pairs {
        if want != got {
            mismatches.push(field.to_string());
        }
    }
    if expected.sandbox_mode != actual.sandbox_mode {
        mismatches.push("sandbox_mode".to_string());
    }
    if expected.project_has_git != actual.project_has_git {
        mismatches.push("project_has_git".to_string());
    }
    if !task.workspace_path.is_dir() {
        mismatches.push("workspace_exists".to_string());
    }
    mismatches.sort();
    mismatches.dedup();

    let ok = mismatches.is_empty();
    let reason = if ok {
        "workspace_resume_guard_passed"
    } else {
        "workspace_resume_guard_mismatch"
    };
    (
        ok,
        json!({
            "ok": ok,
            "reason": reason,
            "mismatch_fields": mismatches,
            "expected": expected,
            "actual": actual,
        }),
    )
}

fn risk_policy_candidates(project_root: &Path) -> Vec<std::path::PathBuf> {
    vec![
        project_root.join(".awe").join("risk-policy.json"),
        project_root.join("risk-policy.json"),
    ]
}

fn load_risk_policy(project_root: &Path) -> Option<Value> {
    for candidate in risk_policy_candidates(project_root) {
        if let Ok(raw) = std::fs::read(&candidate) {
            match serde_json::from_slice::<Value>(&raw) {
                Ok(policy) => return Some(policy),
                Err(error) => {
                    tracing::warn!(%error, "unreadable risk policy file");
                }
            }
        }
    }
    None
}

fn workspace_profile(workspace_root: &Path) -> Value {
    let mut file_count = 0usize;
    let mut has_tests = false;
    if let Ok(entries) = std::fs::read_dir(workspace_root) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_sandbox_ignored(&name) {
                continue;
            }
            file_count += 1;
            if name == "tests" || name == "test" {
                has_tests = true;
            }
        }
    }
    json!({
        "file_count": file_count,
        "has_tests_dir": has_tests,
        "has_git": workspace_root.join(".git").exists(),
    })
}

fn resolve_risk_tier(policy: &Value, profile: &Value) -> String {
    let default_tier = policy
        .get("default_tier")
        .and_then(Value::as_str)
        .unwrap_or("low")
        .to_string();
    let high_watermark = policy
        .get("high_tier_min_entries")
        .and_then(Value::as_u64)
        .unwrap_or(u64::MAX);
    let entries = profile.get("file_count").and_then(Value::as_u64).unwrap_or(0);
    if entries >= high_watermark {
        "high".to_string()
    } else {
        default_tier
    }
}

/// Preflight risk gate: resolve the tier from the workspace profile
/// and check the policy's required checks for it. A project without a
/// policy file passes by default.
pub fn run_preflight_risk_gate(task: &Task, workspace_root: &Path) -> Value {
    let profile = workspace_profile(workspace_root);
    let Some(policy) = load_risk_policy(&task.project_path) else {
        return json!({
            "passed": true,
            "reason": "risk_policy_missing",
            "tier": "low",
            "profile": profile,
            "required_checks": [],
            "failed_checks": [],
        });
    };

    let tier = resolve_risk_tier(&policy, &profile);
    let required: Vec<String> = policy
        .get("required_checks")
        .and_then(|checks| checks.get(&tier))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut failed = Vec::new();
    for check in &required {
        let ok = match check.as_str() {
            "tests_configured" => !task.test_command.trim().is_empty(),
            "lint_configured" => !task.lint_command.trim().is_empty(),
            "sandbox_required" => task.sandbox_mode,
            "reviewers_required" => !task.reviewer_participants.is_empty(),
            other => {
                tracing::warn!(check = other, "unknown risk-policy check treated as failed");
                false
            }
        };
        if !ok {
            failed.push(check.clone());
        }
    }

    let passed = failed.is_empty();
    json!({
        "passed": passed,
        "reason": if passed { "passed".to_string() } else {
            format!("preflight_risk_gate_failed: missing={}", failed.join(","))
        },
        "tier": tier,
        "profile": profile,
        "required_checks": required,
        "failed_checks": failed,
    })
}

/// Promotion guard over the merge target: branch allowlist plus
/// worktree cleanliness. Non-git targets are always allowed.
pub fn evaluate_promotion_guard(target_root: &Path) -> Value {
    if !target_root.join(".git").exists() {
        return json!({
            "guard_allowed": true,
            "guard_reason": "target_not_git",
            "branch": Value::Null,
            "worktree_clean": Value::Null,
        });
    }

    let branch = run_git(target_root, &["rev-parse", "--abbrev-ref", "HEAD"]);
    let status = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(target_root)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .output()
        .ok();
    let worktree_clean = status
        .as_ref()
        .map(|output| output.status.success() && output.stdout.is_empty())
        .unwrap_or(false);

    let allowlist: Vec<String> = std::env::var(PROMOTION_BRANCHES_ENV)
        .unwrap_or_default()
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();
    let branch_allowed = allowlist.is_empty()
        || branch
            .as_deref()
            .map(|current| allowlist.iter().any(|allowed| allowed == current))
            .unwrap_or(false);

    let (allowed, reason) = if !branch_allowed {
        (false, "branch_not_allowed")
    } else if !worktree_clean {
        (false, "worktree_dirty")
    } else {
        (true, "passed")
    };
    json!({
        "guard_allowed": allowed,
        "guard_reason": reason,
        "branch": branch,
        "worktree_clean": worktree_clean,
        "branch_allowlist": allowlist,
    })
}

#[cfg(test)]
#[path = "guards_tests.rs"]
mod tests;
