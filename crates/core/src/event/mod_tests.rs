// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn events_serialize_with_snake_case_type_tag() {
    let event = Event::GateFailed {
        round: 2,
        reason: "review_blocker".to_string(),
        stage: None,
    };
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "gate_failed");
    assert_eq!(value["round"], 2);
    assert!(value.get("stage").is_none());
    assert_eq!(event.kind(), "gate_failed");
}

#[test]
fn kind_matches_tag_for_proposal_events() {
    let event = Event::ProposalConsensusRetry {
        round: 1,
        attempt: 3,
        verdicts: VerdictCounts {
            no_blocker: 1,
            blocker: 1,
            unknown: 0,
        },
    };
    assert_eq!(event.kind(), "proposal_consensus_retry");
    assert_eq!(event.round(), Some(1));
}

#[test]
fn round_is_absent_for_unscoped_events() {
    let event = Event::SystemFailure {
        reason: "workflow_error: boom".to_string(),
    };
    assert_eq!(event.round(), None);
}

#[test]
fn output_accessor_covers_conversation_events() {
    let event = Event::Implementation {
        round: 1,
        participant: "codex#a".to_string(),
        provider: "codex".to_string(),
        output: "changed src/lib.rs".to_string(),
        duration_seconds: 0.5,
    };
    assert_eq!(event.output(), Some("changed src/lib.rs"));
    let event = Event::TaskRunning;
    assert_eq!(event.output(), None);
}

#[test]
fn event_round_trips_through_json() {
    let event = Event::PrecompletionChecklist {
        round: 1,
        passed: true,
        reason: "passed".to_string(),
        checks: ChecklistChecks {
            test_command_configured: true,
            lint_command_configured: true,
            verification_executed: true,
            tests_ok: true,
            lint_ok: true,
            evidence_paths_present: true,
        },
        evidence_paths: vec!["src/lib.rs".to_string()],
    };
    let json = serde_json::to_string(&event).unwrap();
    let back: Event = serde_json::from_str(&json).unwrap();
    assert_eq!(back, event);
}

#[test]
fn unknown_fields_are_tolerated_on_deserialize() {
    let raw = r#"{"type":"cancel_requested","requested":true,"extra":"ignored"}"#;
    let event: Event = serde_json::from_str(raw).unwrap();
    assert_eq!(event, Event::CancelRequested { requested: true });
}
