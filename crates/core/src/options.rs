// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution-policy options: closed enums and input normalizers.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Recognized phase-timeout keys, in protocol order.
pub const PHASE_KEYS: [&str; 5] = [
    "proposal",
    "discussion",
    "implementation",
    "review",
    "command",
];

/// Minimum accepted per-phase timeout.
pub const MIN_PHASE_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct OptionError {
    pub message: String,
    /// Sub-field the error points at, e.g. `phase_timeout_seconds[bogus]`.
    pub key: Option<String>,
}

impl OptionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            key: None,
        }
    }

    fn keyed(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Language the conversation prompts are rendered in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationLanguage {
    #[default]
    En,
    Zh,
}

impl ConversationLanguage {
    pub fn normalize(raw: Option<&str>, strict: bool) -> Result<Self, OptionError> {
        let text = raw.unwrap_or("").trim().to_ascii_lowercase();
        match text.as_str() {
            "" | "en" => Ok(Self::En),
            "zh" => Ok(Self::Zh),
            other if strict => Err(OptionError::new(format!(
                "conversation_language must be en or zh, got {other}"
            ))),
            _ => Ok(Self::En),
        }
    }
}

impl ConversationLanguage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Zh => "zh",
        }
    }
}

impl std::fmt::Display for ConversationLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How aggressively the author may restructure code while repairing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairMode {
    Minimal,
    #[default]
    Balanced,
    Structural,
}

impl RepairMode {
    pub fn normalize(raw: Option<&str>, strict: bool) -> Result<Self, OptionError> {
        let text = raw.unwrap_or("").trim().to_ascii_lowercase();
        match text.as_str() {
            "minimal" => Ok(Self::Minimal),
            "" | "balanced" => Ok(Self::Balanced),
            "structural" => Ok(Self::Structural),
            other if strict => Err(OptionError::new(format!(
                "repair_mode must be minimal, balanced, or structural, got {other}"
            ))),
            _ => Ok(Self::Balanced),
        }
    }
}

impl RepairMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Balanced => "balanced",
            Self::Structural => "structural",
        }
    }
}

impl std::fmt::Display for RepairMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether recalled memory is injected into stage prompts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    Off,
    #[default]
    Basic,
    Strict,
}

impl MemoryMode {
    pub fn normalize(raw: Option<&str>, strict: bool) -> Result<Self, OptionError> {
        let text = raw.unwrap_or("").trim().to_ascii_lowercase();
        match text.as_str() {
            "off" => Ok(Self::Off),
            "" | "basic" => Ok(Self::Basic),
            "strict" => Ok(Self::Strict),
            other if strict => Err(OptionError::new(format!(
                "memory_mode must be off, basic, or strict, got {other}"
            ))),
            _ => Ok(Self::Basic),
        }
    }
}

impl MemoryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Basic => "basic",
            Self::Strict => "strict",
        }
    }
}

impl std::fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn clamp_evolution_level(raw: i64) -> u8 {
    raw.clamp(0, 3) as u8
}

pub fn clamp_self_loop_mode(raw: i64) -> u8 {
    raw.clamp(0, 1) as u8
}

pub fn clamp_max_rounds(raw: i64) -> u32 {
    raw.clamp(1, 20) as u32
}

/// Validate and canonicalize an optional evolve-until deadline.
///
/// Accepts RFC 3339 or a naive `YYYY-MM-DDTHH:MM[:SS]` form interpreted
/// as UTC; returns the RFC 3339 rendering.
pub fn normalize_evolve_until(raw: Option<&str>) -> Result<Option<String>, OptionError> {
    let text = match raw {
        Some(t) if !t.trim().is_empty() => t.trim(),
        _ => return Ok(None),
    };
    match parse_deadline(Some(text)) {
        Some(parsed) => Ok(Some(parsed.to_rfc3339())),
        None => Err(OptionError::new(format!(
            "evolve_until must be an ISO-8601 datetime, got {text:?}"
        ))),
    }
}

/// Parse a deadline string into UTC. Returns `None` when absent or
/// unparseable (callers that must reject invalid input use
/// [`normalize_evolve_until`]).
pub fn parse_deadline(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let text = raw?.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Normalize a provider-keyed map: lowercase keys, trim values, drop
/// entries with an empty key or value.
pub fn normalize_provider_map(raw: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        let provider = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if !provider.is_empty() && !value.is_empty() {
            out.insert(provider, value.to_string());
        }
    }
    out
}

/// Normalize a participant-keyed map against the known participant set.
///
/// Strict mode rejects unknown participants with the offending key;
/// lenient mode drops them.
pub fn normalize_participant_map(
    raw: &BTreeMap<String, String>,
    known_participants: &std::collections::BTreeSet<String>,
    field: &str,
    strict: bool,
) -> Result<BTreeMap<String, String>, OptionError> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        let participant = key.trim();
        let value = value.trim();
        if participant.is_empty() || value.is_empty() {
            continue;
        }
        if !known_participants.contains(participant) {
            if strict {
                return Err(OptionError::keyed(
                    format!("{field}[{participant}] does not name a task participant"),
                    format!("{field}[{participant}]"),
                ));
            }
            continue;
        }
        out.insert(participant.to_string(), value.to_string());
    }
    Ok(out)
}

/// Normalize per-participant agent-feature overrides. Every key must be
/// a known participant on the required provider.
pub fn normalize_agent_overrides(
    raw: &BTreeMap<String, bool>,
    known_participants: &std::collections::BTreeSet<String>,
    required_provider: &str,
    field: &str,
) -> Result<BTreeMap<String, bool>, OptionError> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        let participant = key.trim();
        if participant.is_empty() {
            continue;
        }
        if !known_participants.contains(participant) {
            return Err(OptionError::keyed(
                format!("{field}[{participant}] does not name a task participant"),
                format!("{field}[{participant}]"),
            ));
        }
        let provider = participant.split('#').next().unwrap_or("");
        if provider != required_provider {
            return Err(OptionError::keyed(
                format!("{field}[{participant}] requires a {required_provider} participant"),
                format!("{field}[{participant}]"),
            ));
        }
        out.insert(participant.to_string(), *value);
    }
    Ok(out)
}

/// Normalize a phase-timeout map. Strict mode rejects unknown keys and
/// sub-minimum values; lenient mode drops unknown keys and raises
/// sub-minimum values to the floor.
pub fn normalize_phase_timeout_seconds(
    raw: &BTreeMap<String, u64>,
    strict: bool,
) -> Result<BTreeMap<String, u64>, OptionError> {
    let mut out = BTreeMap::new();
    for (key, value) in raw {
        let phase = key.trim().to_ascii_lowercase();
        if !PHASE_KEYS.contains(&phase.as_str()) {
            if strict {
                return Err(OptionError::keyed(
                    format!("phase_timeout_seconds[{phase}] is not a recognized phase"),
                    format!("phase_timeout_seconds[{phase}]"),
                ));
            }
            continue;
        }
        if *value < MIN_PHASE_TIMEOUT_SECONDS {
            if strict {
                return Err(OptionError::keyed(
                    format!(
                        "phase_timeout_seconds[{phase}] must be >= {MIN_PHASE_TIMEOUT_SECONDS}"
                    ),
                    format!("phase_timeout_seconds[{phase}]"),
                ));
            }
            out.insert(phase, MIN_PHASE_TIMEOUT_SECONDS);
            continue;
        }
        out.insert(phase, *value);
    }
    Ok(out)
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
