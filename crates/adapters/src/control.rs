// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured agent-output contract parsing.
//!
//! Agents answer with a single JSON control object, optionally inside
//! a fenced block: `{"verdict":"NO_BLOCKER","next_action":"pass",…}`.
//! Legacy `VERDICT:` / `NEXT_ACTION:` control lines are honored only
//! when the `AWE_CONTROL_SCHEMA_COMPAT` env flag is set.

use awe_core::{NextAction, ReviewVerdict};
use serde_json::Value;

/// Env flag enabling legacy control-line parsing.
pub const CONTROL_SCHEMA_COMPAT_ENV: &str = "AWE_CONTROL_SCHEMA_COMPAT";

pub(crate) fn compat_enabled_from_env() -> bool {
    matches!(
        std::env::var(CONTROL_SCHEMA_COMPAT_ENV)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn fenced_json_candidates(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let body_start = after.find('\n').map(|idx| idx + 1).unwrap_or(0);
        let body = &after[body_start..];
        let Some(close) = body.find("```") else { break };
        let candidate = body[..close].trim();
        if candidate.starts_with('{') && candidate.ends_with('}') {
            out.push(candidate.to_string());
        }
        rest = &body[close + 3..];
    }
    out
}

/// Extract the first parseable JSON control object from agent output.
///
/// Candidates, in order: the whole trimmed output, each fenced JSON
/// block, then any single line shaped like `{...}`.
pub fn extract_control_object(output: &str) -> Option<Value> {
    let text = output.trim();
    if text.is_empty() {
        return None;
    }
    let mut candidates: Vec<String> = vec![text.to_string()];
    candidates.extend(fenced_json_candidates(text));
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('{') && line.ends_with('}') {
            candidates.push(line.to_string());
        }
    }
    for candidate in candidates {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&candidate) {
            return Some(Value::Object(map));
        }
    }
    None
}

fn legacy_line_value(output: &str, key: &str) -> Option<String> {
    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix(key) {
            let value = rest.trim_start_matches(':').trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Parse the reviewer verdict from agent output. Absent or
/// unrecognized verdicts resolve to `Unknown`.
pub fn parse_verdict(output: &str, legacy_compat: bool) -> ReviewVerdict {
    if let Some(object) = extract_control_object(output) {
        if let Some(raw) = object.get("verdict").and_then(Value::as_str) {
            return ReviewVerdict::from_wire(raw);
        }
    }
    if legacy_compat {
        if let Some(raw) = legacy_line_value(output, "VERDICT") {
            return ReviewVerdict::from_wire(&raw);
        }
    }
    ReviewVerdict::Unknown
}

/// Parse the requested next action. Absent values resolve to `Pass`.
pub fn parse_next_action(output: &str, legacy_compat: bool) -> NextAction {
    if let Some(object) = extract_control_object(output) {
        if let Some(raw) = object.get("next_action").and_then(Value::as_str) {
            return NextAction::from_wire(raw);
        }
    }
    if legacy_compat {
        if let Some(raw) = legacy_line_value(output, "NEXT_ACTION") {
            return NextAction::from_wire(&raw);
        }
    }
    NextAction::Pass
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
