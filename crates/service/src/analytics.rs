// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Derived counters over tasks and events. Read-only.

use awe_storage::TaskRepository;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const LIST_SCAN_LIMIT: usize = 10_000;

#[allow(clippy::unwrap_used)]
fn provider_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"provider=([a-zA-Z0-9_-]+)").unwrap())
}

/// Stable analytics bucket for a terminal reason; `None` for benign
/// outcomes.
pub fn reason_bucket(reason: Option<&str>) -> Option<&'static str> {
    let text = reason.unwrap_or("").trim().to_ascii_lowercase();
    if text.is_empty() || text == "passed" || text == "canceled" {
        return None;
    }
    const BUCKETS: [&str; 16] = [
        "watchdog_timeout",
        "provider_limit",
        "command_timeout",
        "command_not_found",
        "review_blocker",
        "review_unknown",
        "tests_failed",
        "lint_failed",
        "precompletion_evidence_missing",
        "precompletion_commands_missing",
        "preflight_risk_gate_failed",
        "head_sha_mismatch",
        "loop_no_progress",
        "concurrency_limit",
        "author_confirmation_required",
        "workspace_resume_guard_mismatch",
    ];
    for bucket in BUCKETS {
        if text.contains(bucket) {
            return Some(bucket);
        }
    }
    if text.contains("author_rejected") {
        return Some("author_rejected");
    }
    if text.contains("workflow_error") {
        return Some("workflow_error_other");
    }
    Some("other")
}

/// Provider key named in a runtime-error reason, if any.
pub fn provider_from_reason(reason: &str) -> Option<String> {
    provider_regex()
        .captures(reason)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsView {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub terminal_reason_buckets: BTreeMap<String, usize>,
    pub provider_limited: BTreeMap<String, usize>,
    pub rounds_histogram: BTreeMap<u32, usize>,
}

/// Compute derived counters from current task rows.
pub fn compute_stats(repository: &dyn TaskRepository) -> Result<StatsView, awe_storage::StorageError> {
    let rows = repository.list_tasks(LIST_SCAN_LIMIT)?;
    let mut stats = StatsView {
        total: rows.len(),
        ..StatsView::default()
    };
    for row in &rows {
        *stats.by_status.entry(row.status.to_string()).or_default() += 1;
        if row.status.is_terminal() {
            if let Some(bucket) = reason_bucket(row.last_gate_reason.as_deref()) {
                *stats
                    .terminal_reason_buckets
                    .entry(bucket.to_string())
                    .or_default() += 1;
            }
            *stats.rounds_histogram.entry(row.rounds_completed).or_default() += 1;
        }
        if let Some(reason) = &row.last_gate_reason {
            if reason.contains("provider_limit") {
                if let Some(provider) = provider_from_reason(reason) {
                    *stats.provider_limited.entry(provider).or_default() += 1;
                }
            }
        }
    }
    Ok(stats)
}

#[cfg(test)]
#[path = "analytics_tests.rs"]
mod tests;
