// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-completion checklist and evidence-path extraction.

use awe_core::ChecklistChecks;
use awe_adapters::CommandResult;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const EVIDENCE_MAX_ITEMS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreCompletionChecklistResult {
    pub passed: bool,
    pub reason: String,
    pub checks: ChecklistChecks,
    pub evidence_paths: Vec<String>,
}

/// Inputs the checklist evaluates over.
pub struct ChecklistInput<'a> {
    pub test_command: &'a str,
    pub lint_command: &'a str,
    pub implementation_output: &'a str,
    pub review_outputs: &'a [String],
    pub test_result: &'a CommandResult,
    pub lint_result: &'a CommandResult,
    pub cwd: &'a Path,
}

/// Evaluate the structured checks. Reason priority: commands missing →
/// verification missing → tests → lint → evidence → passed.
pub fn run_pre_completion_checklist(input: &ChecklistInput<'_>) -> PreCompletionChecklistResult {
    let test_command_configured = !input.test_command.trim().is_empty();
    let lint_command_configured = !input.lint_command.trim().is_empty();
    let verification_executed = true;
    let tests_ok = input.test_result.ok;
    let lint_ok = input.lint_result.ok;

    let evidence_source = [
        input.implementation_output,
        &input.review_outputs.join("\n"),
        &input.test_result.stdout,
        &input.test_result.stderr,
        &input.lint_result.stdout,
        &input.lint_result.stderr,
    ]
    .join("\n");
    let evidence_paths = extract_evidence_paths(&evidence_source, input.cwd, EVIDENCE_MAX_ITEMS);
    let evidence_paths_present = !evidence_paths.is_empty();

    let checks = ChecklistChecks {
        test_command_configured,
        lint_command_configured,
        verification_executed,
        tests_ok,
        lint_ok,
        evidence_paths_present,
    };

    let reason = if !test_command_configured || !lint_command_configured {
        "precompletion_commands_missing"
    } else if !verification_executed {
        "precompletion_verification_missing"
    } else if !tests_ok {
        "tests_failed"
    } else if !lint_ok {
        "lint_failed"
    } else if !evidence_paths_present {
        "precompletion_evidence_missing"
    } else {
        "passed"
    };

    PreCompletionChecklistResult {
        passed: reason == "passed",
        reason: reason.to_string(),
        checks,
        evidence_paths,
    }
}

// Conservative filename shape: optional drive letter, then path-ish
// characters ending in a short extension.
#[allow(clippy::unwrap_used)]
fn evidence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:[A-Za-z]:[\\/])?[A-Za-z0-9._\\/-]+\.[A-Za-z0-9]{1,8}").unwrap()
    })
}

/// Pull repo-relative file paths out of free text. Absolute paths
/// inside the workspace are normalized to workspace-relative; URLs and
/// fragments shorter than 5 chars are excluded; order-preserving
/// dedupe capped at `max_items`.
pub fn extract_evidence_paths(text: &str, cwd: &Path, max_items: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for found in evidence_regex().find_iter(text) {
        let candidate = found
            .as_str()
            .trim()
            .trim_matches(|c: char| ".,;:()[]{}<>\"'".contains(c));
        if candidate.is_empty() || candidate.len() < 5 {
            continue;
        }
        let lowered = candidate.to_ascii_lowercase();
        if lowered.starts_with("http://") || lowered.starts_with("https://") {
            continue;
        }
        let mut normalized = candidate.replace('\\', "/");
        let path = PathBuf::from(candidate);
        if path.is_absolute() {
            if let Ok(relative) = path.strip_prefix(cwd) {
                normalized = relative.to_string_lossy().replace('\\', "/");
            } else {
                normalized = path.to_string_lossy().replace('\\', "/");
            }
        }
        if let Some(stripped) = normalized.strip_prefix("./") {
            normalized = stripped.to_string();
        }
        if !seen.insert(normalized.clone()) {
            continue;
        }
        out.push(normalized);
        if out.len() >= max_items {
            break;
        }
    }
    out
}

#[cfg(test)]
#[path = "checklist_tests.rs"]
mod tests;
