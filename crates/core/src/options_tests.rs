// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::BTreeSet;
use yare::parameterized;

fn known() -> BTreeSet<String> {
    ["codex#author-A", "claude#review-B"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[test]
fn language_defaults_to_en() {
    assert_eq!(
        ConversationLanguage::normalize(None, false).unwrap(),
        ConversationLanguage::En
    );
    assert_eq!(
        ConversationLanguage::normalize(Some("ZH"), true).unwrap(),
        ConversationLanguage::Zh
    );
}

#[test]
fn strict_language_rejects_unknown() {
    assert!(ConversationLanguage::normalize(Some("fr"), true).is_err());
    assert_eq!(
        ConversationLanguage::normalize(Some("fr"), false).unwrap(),
        ConversationLanguage::En
    );
}

#[parameterized(
    minimal = { "minimal", RepairMode::Minimal },
    balanced = { "balanced", RepairMode::Balanced },
    structural = { "Structural", RepairMode::Structural },
    empty = { "", RepairMode::Balanced },
)]
fn repair_mode_normalizes(raw: &str, expected: RepairMode) {
    assert_eq!(RepairMode::normalize(Some(raw), false).unwrap(), expected);
}

#[test]
fn strict_repair_mode_rejects_unknown() {
    assert!(RepairMode::normalize(Some("yolo"), true).is_err());
}

#[test]
fn memory_mode_normalizes() {
    assert_eq!(MemoryMode::normalize(Some("off"), true).unwrap(), MemoryMode::Off);
    assert_eq!(MemoryMode::normalize(None, true).unwrap(), MemoryMode::Basic);
    assert!(MemoryMode::normalize(Some("max"), true).is_err());
}

#[test]
fn clamps() {
    assert_eq!(clamp_evolution_level(-1), 0);
    assert_eq!(clamp_evolution_level(9), 3);
    assert_eq!(clamp_self_loop_mode(5), 1);
    assert_eq!(clamp_max_rounds(0), 1);
    assert_eq!(clamp_max_rounds(99), 20);
}

#[test]
fn evolve_until_accepts_rfc3339_and_naive() {
    let canonical = normalize_evolve_until(Some("2026-03-01T10:00:00Z")).unwrap();
    assert!(canonical.unwrap().starts_with("2026-03-01T10:00:00"));
    assert!(normalize_evolve_until(Some("2026-03-01T10:00")).unwrap().is_some());
    assert!(normalize_evolve_until(Some("  ")).unwrap().is_none());
    assert!(normalize_evolve_until(Some("not a date")).is_err());
}

#[test]
fn parse_deadline_returns_utc() {
    let parsed = parse_deadline(Some("2026-03-01T10:00:00+02:00")).unwrap();
    assert_eq!(parsed.to_rfc3339(), "2026-03-01T08:00:00+00:00");
    assert!(parse_deadline(Some("")).is_none());
}

#[test]
fn provider_map_lowercases_and_drops_empty() {
    let mut raw = BTreeMap::new();
    raw.insert("Codex".to_string(), " gpt-5-codex ".to_string());
    raw.insert("".to_string(), "x".to_string());
    raw.insert("claude".to_string(), "  ".to_string());
    let out = normalize_provider_map(&raw);
    assert_eq!(out.len(), 1);
    assert_eq!(out.get("codex").map(String::as_str), Some("gpt-5-codex"));
}

#[test]
fn participant_map_rejects_unknown_in_strict_mode() {
    let mut raw = BTreeMap::new();
    raw.insert("gemini#ghost".to_string(), "model-x".to_string());
    let err =
        normalize_participant_map(&raw, &known(), "participant_models", true).unwrap_err();
    assert_eq!(
        err.key.as_deref(),
        Some("participant_models[gemini#ghost]")
    );
    let ok = normalize_participant_map(&raw, &known(), "participant_models", false).unwrap();
    assert!(ok.is_empty());
}

#[test]
fn agent_overrides_require_matching_provider() {
    let mut raw = BTreeMap::new();
    raw.insert("codex#author-A".to_string(), true);
    let err = normalize_agent_overrides(&raw, &known(), "claude", "claude_team_agents_overrides")
        .unwrap_err();
    assert!(err.message.contains("requires a claude participant"));

    let ok = normalize_agent_overrides(&raw, &known(), "codex", "codex_multi_agents_overrides")
        .unwrap();
    assert_eq!(ok.get("codex#author-A"), Some(&true));
}

#[test]
fn phase_timeouts_strict_rejects_unknown_key_and_low_value() {
    let mut raw = BTreeMap::new();
    raw.insert("bogus".to_string(), 30u64);
    let err = normalize_phase_timeout_seconds(&raw, true).unwrap_err();
    assert_eq!(err.key.as_deref(), Some("phase_timeout_seconds[bogus]"));

    let mut raw = BTreeMap::new();
    raw.insert("review".to_string(), 5u64);
    assert!(normalize_phase_timeout_seconds(&raw, true).is_err());
    let lenient = normalize_phase_timeout_seconds(&raw, false).unwrap();
    assert_eq!(lenient.get("review"), Some(&MIN_PHASE_TIMEOUT_SECONDS));
}
