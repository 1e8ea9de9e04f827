// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proposal-consensus structured-issue contract.
//!
//! Reviewers raising a BLOCKER or UNKNOWN verdict must produce at
//! least one structured issue; authors must answer every required
//! issue, and a `reject` answer must carry reason, alternative plan,
//! validation commands, and evidence paths.

use awe_adapters::extract_control_object;
use awe_core::{clip_text, IssueResponse, ReviewVerdict, ReviewerIssue};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

const SUMMARY_MAX_CHARS: usize = 220;
const SEVERITY_MAX_CHARS: usize = 32;
const PATH_MAX_CHARS: usize = 180;
const REASON_MAX_CHARS: usize = 280;
const MAX_EVIDENCE_ITEMS: usize = 10;
const MAX_COMMAND_ITEMS: usize = 6;

#[allow(clippy::unwrap_used)]
fn issue_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bISSUE[-_ ]?([0-9]{1,4})\b").unwrap())
}

/// Normalize any issue-id spelling to `ISSUE-NNN` (3-digit padding);
/// unrecognizable input falls back to the positional index.
pub fn normalize_issue_id(raw: &str, fallback_index: usize) -> String {
    if let Some(captures) = issue_id_regex().captures(raw) {
        if let Some(number) = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
            return format!("ISSUE-{number:03}");
        }
    }
    format!("ISSUE-{fallback_index:03}")
}

fn coerce_text(value: Option<&Value>, max_chars: usize) -> String {
    let text = value.and_then(Value::as_str).unwrap_or("").trim();
    clip_text(text, max_chars)
}

fn coerce_string_list(value: Option<&Value>, max_items: usize, max_chars: usize) -> Vec<String> {
    let raw_items: Vec<String> = match value {
        Some(Value::String(text)) => vec![text.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for raw in raw_items {
        let text = clip_text(raw.trim(), max_chars);
        if text.is_empty() || !seen.insert(text.to_ascii_lowercase()) {
            continue;
        }
        out.push(text);
        if out.len() >= max_items {
            break;
        }
    }
    out
}

fn runtime_error_hint(output: &str) -> bool {
    let lowered = output.trim().to_ascii_lowercase();
    lowered.starts_with("[proposal_precheck_review_error]")
        || lowered.starts_with("[proposal_review_error]")
        || lowered.contains("provider_limit provider=")
        || lowered.contains("command_timeout provider=")
        || lowered.contains("command_not_found provider=")
        || lowered.contains("command_failed provider=")
        || lowered.contains("command_not_configured provider=")
}

/// Parse structured issues out of a reviewer's output: the `issues`
/// array of the control object, with a line-scan fallback when a
/// blocking verdict mentions an explicit issue id in prose.
pub fn parse_reviewer_issues(output: &str, verdict: ReviewVerdict) -> Vec<ReviewerIssue> {
    let blocking = matches!(verdict, ReviewVerdict::Blocker | ReviewVerdict::Unknown);
    let object = extract_control_object(output);
    let mut parsed = Vec::new();
    if let Some(issues) = object
        .as_ref()
        .and_then(|object| object.get("issues"))
        .and_then(Value::as_array)
    {
        for (idx, item) in issues.iter().enumerate() {
            let Some(map) = item.as_object() else { continue };
            let summary = coerce_text(
                map.get("summary")
                    .or_else(|| map.get("issue"))
                    .or_else(|| map.get("title")),
                SUMMARY_MAX_CHARS,
            );
            if summary.is_empty() {
                continue;
            }
            let raw_id = map.get("issue_id").and_then(Value::as_str).unwrap_or("");
            let severity = {
                let text = coerce_text(map.get("severity"), SEVERITY_MAX_CHARS).to_ascii_lowercase();
                if text.is_empty() {
                    verdict.as_str().to_string()
                } else {
                    text
                }
            };
            parsed.push(ReviewerIssue {
                issue_id: normalize_issue_id(raw_id, idx + 1),
                summary,
                severity,
                required_action: coerce_text(
                    map.get("required_action").or_else(|| map.get("next")),
                    SUMMARY_MAX_CHARS,
                ),
                evidence_paths: coerce_string_list(
                    map.get("evidence_paths"),
                    8,
                    PATH_MAX_CHARS,
                ),
                required_response: map
                    .get("required_response")
                    .and_then(Value::as_bool)
                    .unwrap_or(blocking),
            });
        }
    }

    // Fallback: a blocking verdict with an explicit ISSUE-NNN in prose
    // but no structured array still yields one issue.
    if parsed.is_empty() && blocking && !runtime_error_hint(output) {
        if let Some(captures) = issue_id_regex().captures(output) {
            if let Some(number) = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                let summary = object
                    .as_ref()
                    .and_then(|object| object.get("issue"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|text| !text.is_empty())
                    .map(|text| clip_text(text, SUMMARY_MAX_CHARS))
                    .unwrap_or_else(|| clip_text(output.trim(), SUMMARY_MAX_CHARS));
                if !summary.is_empty() {
                    parsed.push(ReviewerIssue {
                        issue_id: format!("ISSUE-{number:03}"),
                        summary,
                        severity: verdict.as_str().to_string(),
                        required_action: String::new(),
                        evidence_paths: Vec::new(),
                        required_response: true,
                    });
                }
            }
        }
    }

    // Dedupe by normalized id, first occurrence wins.
    let mut seen = BTreeSet::new();
    parsed
        .into_iter()
        .enumerate()
        .filter_map(|(idx, mut issue)| {
            issue.issue_id = normalize_issue_id(&issue.issue_id, idx + 1);
            seen.insert(issue.issue_id.clone()).then_some(issue)
        })
        .collect()
}

/// One reviewer's contribution to a consensus pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReviewerPassItem {
    pub participant: String,
    pub provider: String,
    pub verdict: ReviewVerdict,
    pub output: String,
    pub issues: Vec<ReviewerIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewerContractCheck {
    pub ok: bool,
    pub required_issue_ids: Vec<String>,
    pub missing_issue_participants: Vec<String>,
}

/// A blocking verdict with zero parsed issues violates the contract.
pub fn validate_reviewer_issue_contract(items: &[ReviewerPassItem]) -> ReviewerContractCheck {
    let mut missing = BTreeSet::new();
    let mut required = BTreeSet::new();
    for item in items {
        let blocking = matches!(item.verdict, ReviewVerdict::Blocker | ReviewVerdict::Unknown);
        if blocking && item.issues.is_empty() {
            let name = if item.participant.trim().is_empty() {
                "unknown".to_string()
            } else {
                item.participant.clone()
            };
            missing.insert(name);
        }
        for issue in &item.issues {
            if issue.required_response {
                required.insert(issue.issue_id.clone());
            }
        }
    }
    ReviewerContractCheck {
        ok: missing.is_empty(),
        required_issue_ids: required.into_iter().collect(),
        missing_issue_participants: missing.into_iter().collect(),
    }
}

/// Every issue id any reviewer marked response-required, sorted.
pub fn extract_required_issue_ids(items: &[ReviewerPassItem]) -> Vec<String> {
    let mut ids = BTreeSet::new();
    for item in items {
        for issue in &item.issues {
            if issue.required_response {
                ids.insert(issue.issue_id.clone());
            }
        }
    }
    ids.into_iter().collect()
}

/// Parse the author's `issue_responses`, with a plain-text line
/// fallback (`ISSUE-001: accept ...`).
pub fn parse_author_issue_responses(output: &str) -> BTreeMap<String, IssueResponse> {
    let mut items: Vec<Value> = extract_control_object(output)
        .and_then(|object| object.get("issue_responses").cloned())
        .and_then(|raw| raw.as_array().cloned())
        .unwrap_or_default()
        .into_iter()
        .filter(|item| item.is_object())
        .collect();

    if items.is_empty() {
        for line in output.lines() {
            let line = line.trim();
            let Some(captures) = issue_id_regex().captures(line) else {
                continue;
            };
            let Some(number) = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) else {
                continue;
            };
            let lowered = line.to_ascii_lowercase();
            let status = if lowered.contains(" reject") || lowered.ends_with("reject") {
                "reject"
            } else if lowered.contains(" defer") || lowered.ends_with("defer") {
                "defer"
            } else {
                "accept"
            };
            items.push(serde_json::json!({
                "issue_id": format!("ISSUE-{number:03}"),
                "status": status,
            }));
        }
    }

    let mut responses = BTreeMap::new();
    for (idx, item) in items.iter().enumerate() {
        let Some(map) = item.as_object() else { continue };
        let issue_id = normalize_issue_id(
            map.get("issue_id").and_then(Value::as_str).unwrap_or(""),
            idx + 1,
        );
        let status = {
            let text = coerce_text(map.get("status"), 24).to_ascii_lowercase();
            match text.as_str() {
                "reject" | "defer" => text,
                _ => "accept".to_string(),
            }
        };
        responses.insert(
            issue_id.clone(),
            IssueResponse {
                issue_id,
                status,
                reason: coerce_text(map.get("reason"), REASON_MAX_CHARS),
                alternative_plan: coerce_text(map.get("alternative_plan"), REASON_MAX_CHARS),
                validation_commands: coerce_string_list(
                    map.get("validation_commands"),
                    MAX_COMMAND_ITEMS,
                    PATH_MAX_CHARS,
                ),
                evidence_paths: coerce_string_list(
                    map.get("evidence_paths"),
                    MAX_EVIDENCE_ITEMS,
                    PATH_MAX_CHARS,
                ),
            },
        );
    }
    responses
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorIssueValidation {
    pub ok: bool,
    pub discussion_complete: bool,
    pub required_issue_ids: Vec<String>,
    pub missing_issue_ids: Vec<String>,
    pub unresolved_issue_ids: Vec<String>,
    pub invalid_reject_issue_ids: Vec<String>,
}

/// Validate the author's responses against the required set.
/// `reject` needs all four of reason, alternative plan, validation
/// commands, and evidence paths to count as valid.
pub fn validate_author_issue_responses(
    required_issue_ids: &[String],
    responses: &BTreeMap<String, IssueResponse>,
) -> AuthorIssueValidation {
    let required: BTreeSet<String> = required_issue_ids
        .iter()
        .enumerate()
        .map(|(idx, raw)| normalize_issue_id(raw, idx + 1))
        .collect();

    let mut missing = Vec::new();
    let mut unresolved = BTreeSet::new();
    let mut invalid_reject = BTreeSet::new();
    for issue_id in &required {
        let Some(response) = responses.get(issue_id) else {
            missing.push(issue_id.clone());
            continue;
        };
        match response.status.as_str() {
            "reject" => {
                unresolved.insert(issue_id.clone());
                let complete = !response.reason.trim().is_empty()
                    && !response.alternative_plan.trim().is_empty()
                    && !response.validation_commands.is_empty()
                    && !response.evidence_paths.is_empty();
                if !complete {
                    invalid_reject.insert(issue_id.clone());
                }
            }
            "defer" => {
                unresolved.insert(issue_id.clone());
            }
            _ => {}
        }
    }

    let ok = missing.is_empty() && invalid_reject.is_empty();
    AuthorIssueValidation {
        ok,
        discussion_complete: ok && unresolved.is_empty(),
        required_issue_ids: required.into_iter().collect(),
        missing_issue_ids: missing,
        unresolved_issue_ids: unresolved.into_iter().collect(),
        invalid_reject_issue_ids: invalid_reject.into_iter().collect(),
    }
}

#[cfg(test)]
#[path = "contract_tests.rs"]
mod tests;
