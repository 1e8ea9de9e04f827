// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    upper = { "NO_BLOCKER", ReviewVerdict::NoBlocker },
    lower = { "no_blocker", ReviewVerdict::NoBlocker },
    dashed = { "no-blocker", ReviewVerdict::NoBlocker },
    blocker = { "BLOCKER", ReviewVerdict::Blocker },
    unknown = { "UNKNOWN", ReviewVerdict::Unknown },
    garbage = { "maybe?", ReviewVerdict::Unknown },
    empty = { "", ReviewVerdict::Unknown },
)]
fn verdict_from_wire(raw: &str, expected: ReviewVerdict) {
    assert_eq!(ReviewVerdict::from_wire(raw), expected);
}

#[parameterized(
    pass = { "pass", NextAction::Pass },
    retry = { "retry", NextAction::Retry },
    stop = { "STOP", NextAction::Stop },
    garbage = { "whatever", NextAction::Pass },
)]
fn next_action_from_wire(raw: &str, expected: NextAction) {
    assert_eq!(NextAction::from_wire(raw), expected);
}

#[test]
fn verdict_display_is_snake_case() {
    assert_eq!(ReviewVerdict::NoBlocker.to_string(), "no_blocker");
    assert_eq!(ReviewVerdict::NoBlocker.as_str(), "no_blocker");
}
