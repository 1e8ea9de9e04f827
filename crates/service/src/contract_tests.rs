// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use awe_core::ReviewVerdict;
use yare::parameterized;

#[parameterized(
    canonical = { "ISSUE-001", "ISSUE-001" },
    underscore = { "issue_2", "ISSUE-002" },
    spaced = { "Issue 37", "ISSUE-037" },
    embedded = { "see ISSUE-4 above", "ISSUE-004" },
    garbage = { "not an id", "ISSUE-009" },
)]
fn issue_ids_normalize_to_three_digits(raw: &str, expected: &str) {
    assert_eq!(normalize_issue_id(raw, 9), expected);
}

#[test]
fn parses_structured_issues_from_control_object() {
    let output = r#"{"verdict":"BLOCKER","next_action":"retry","issues":[
        {"issue_id":"ISSUE-1","summary":"No tests for the parser","severity":"blocker",
         "required_action":"add tests","evidence_paths":["src/parser.rs"]},
        {"summary":"Missing error handling"}
    ]}"#;
    let issues = parse_reviewer_issues(output, ReviewVerdict::Blocker);
    assert_eq!(issues.len(), 2);
    assert_eq!(issues[0].issue_id, "ISSUE-001");
    assert_eq!(issues[0].evidence_paths, vec!["src/parser.rs"]);
    assert!(issues[0].required_response);
    assert_eq!(issues[1].issue_id, "ISSUE-002");
    assert_eq!(issues[1].severity, "blocker");
}

#[test]
fn blocking_verdict_with_prose_issue_id_falls_back() {
    let output = "This cannot ship. ISSUE-7: the migration is irreversible.\n\
                  {\"verdict\":\"BLOCKER\",\"next_action\":\"stop\"}";
    let issues = parse_reviewer_issues(output, ReviewVerdict::Blocker);
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].issue_id, "ISSUE-007");
    assert!(issues[0].required_response);
}

#[test]
fn runtime_error_output_yields_no_fallback_issue() {
    let output = "[proposal_review_error] command_timeout provider=claude";
    let issues = parse_reviewer_issues(output, ReviewVerdict::Unknown);
    assert!(issues.is_empty());
}

#[test]
fn no_blocker_without_issues_is_fine() {
    let output = r#"{"verdict":"NO_BLOCKER","next_action":"pass"}"#;
    assert!(parse_reviewer_issues(output, ReviewVerdict::NoBlocker).is_empty());
}

#[test]
fn duplicate_issue_ids_are_deduped() {
    let output = r#"{"verdict":"BLOCKER","issues":[
        {"issue_id":"ISSUE-1","summary":"first"},
        {"issue_id":"ISSUE-001","summary":"same id again"}
    ]}"#;
    let issues = parse_reviewer_issues(output, ReviewVerdict::Blocker);
    assert_eq!(issues.len(), 1);
}

fn pass_item(verdict: ReviewVerdict, output: &str) -> ReviewerPassItem {
    ReviewerPassItem {
        participant: "claude#review-B".to_string(),
        provider: "claude".to_string(),
        verdict,
        output: output.to_string(),
        issues: parse_reviewer_issues(output, verdict),
    }
}

#[test]
fn contract_flags_blocker_without_issues() {
    let items = vec![pass_item(
        ReviewVerdict::Blocker,
        r#"{"verdict":"BLOCKER","next_action":"stop"}"#,
    )];
    let check = validate_reviewer_issue_contract(&items);
    assert!(!check.ok);
    assert_eq!(check.missing_issue_participants, vec!["claude#review-B"]);
}

#[test]
fn contract_collects_required_ids() {
    let items = vec![pass_item(
        ReviewVerdict::Blocker,
        r#"{"verdict":"BLOCKER","issues":[
            {"issue_id":"ISSUE-2","summary":"b"},
            {"issue_id":"ISSUE-1","summary":"a"}
        ]}"#,
    )];
    let check = validate_reviewer_issue_contract(&items);
    assert!(check.ok);
    assert_eq!(check.required_issue_ids, vec!["ISSUE-001", "ISSUE-002"]);
    assert_eq!(
        extract_required_issue_ids(&items),
        vec!["ISSUE-001", "ISSUE-002"]
    );
}

#[test]
fn author_responses_parse_from_json_and_lines() {
    let output = r#"{"issue_responses":[
        {"issue_id":"ISSUE-1","status":"accept"},
        {"issue_id":"ISSUE-2","status":"reject","reason":"wrong diagnosis",
         "alternative_plan":"fix the cache instead",
         "validation_commands":["cargo test"],
         "evidence_paths":["src/cache.rs"]}
    ]}"#;
    let responses = parse_author_issue_responses(output);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses["ISSUE-001"].status, "accept");
    assert_eq!(responses["ISSUE-002"].status, "reject");

    let line_fallback = parse_author_issue_responses("ISSUE-003: defer until next sprint");
    assert_eq!(line_fallback["ISSUE-003"].status, "defer");
}

#[test]
fn reject_requires_all_four_fields() {
    let required = vec!["ISSUE-001".to_string()];
    let incomplete = parse_author_issue_responses(
        r#"{"issue_responses":[{"issue_id":"ISSUE-1","status":"reject","reason":"nope"}]}"#,
    );
    let validation = validate_author_issue_responses(&required, &incomplete);
    assert!(!validation.ok);
    assert_eq!(validation.invalid_reject_issue_ids, vec!["ISSUE-001"]);

    let complete = parse_author_issue_responses(
        r#"{"issue_responses":[{"issue_id":"ISSUE-1","status":"reject","reason":"nope",
            "alternative_plan":"other approach","validation_commands":["cargo test"],
            "evidence_paths":["src/a.rs"]}]}"#,
    );
    let validation = validate_author_issue_responses(&required, &complete);
    assert!(validation.ok);
    // A reject is valid but leaves the issue unresolved.
    assert!(!validation.discussion_complete);
    assert_eq!(validation.unresolved_issue_ids, vec!["ISSUE-001"]);
}

#[test]
fn missing_response_is_reported() {
    let required = vec!["ISSUE-001".to_string(), "ISSUE-002".to_string()];
    let responses = parse_author_issue_responses(
        r#"{"issue_responses":[{"issue_id":"ISSUE-1","status":"accept"}]}"#,
    );
    let validation = validate_author_issue_responses(&required, &responses);
    assert!(!validation.ok);
    assert_eq!(validation.missing_issue_ids, vec!["ISSUE-002"]);
}

#[test]
fn all_accepts_complete_the_discussion() {
    let required = vec!["ISSUE-001".to_string()];
    let responses = parse_author_issue_responses(
        r#"{"issue_responses":[{"issue_id":"ISSUE-1","status":"accept"}]}"#,
    );
    let validation = validate_author_issue_responses(&required, &responses);
    assert!(validation.ok);
    assert!(validation.discussion_complete);
}
