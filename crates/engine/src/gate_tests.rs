// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use awe_core::ReviewVerdict::{Blocker, NoBlocker, Unknown};
use yare::parameterized;

#[parameterized(
    all_green = { true, true, &[NoBlocker, NoBlocker], true, "passed" },
    no_reviewers = { true, true, &[], true, "passed" },
    tests_fail_first = { false, false, &[Blocker], false, "tests_failed" },
    lint_fails_second = { true, false, &[Blocker], false, "lint_failed" },
    blocker_beats_unknown = { true, true, &[Unknown, Blocker], false, "review_blocker" },
    unknown_last = { true, true, &[NoBlocker, Unknown], false, "review_unknown" },
)]
fn gate_reason_priority(
    tests_ok: bool,
    lint_ok: bool,
    verdicts: &[awe_core::ReviewVerdict],
    passed: bool,
    reason: &str,
) {
    let outcome = evaluate_medium_gate(tests_ok, lint_ok, verdicts);
    assert_eq!(outcome.passed, passed);
    assert_eq!(outcome.reason, reason);
}
