// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    queued = { TaskStatus::Queued, "queued" },
    running = { TaskStatus::Running, "running" },
    waiting = { TaskStatus::WaitingManual, "waiting_manual" },
    passed = { TaskStatus::Passed, "passed" },
    failed_gate = { TaskStatus::FailedGate, "failed_gate" },
    failed_system = { TaskStatus::FailedSystem, "failed_system" },
    canceled = { TaskStatus::Canceled, "canceled" },
)]
fn display_round_trips_through_from_str(status: TaskStatus, text: &str) {
    assert_eq!(status.to_string(), text);
    assert_eq!(text.parse::<TaskStatus>().unwrap(), status);
}

#[test]
fn terminal_classification() {
    assert!(TaskStatus::Passed.is_hard_terminal());
    assert!(TaskStatus::Canceled.is_hard_terminal());
    assert!(!TaskStatus::FailedSystem.is_hard_terminal());
    assert!(TaskStatus::FailedSystem.is_terminal());
    assert!(TaskStatus::FailedGate.is_terminal());
    assert!(!TaskStatus::WaitingManual.is_terminal());
    assert!(!TaskStatus::Running.is_terminal());
}

#[test]
fn serde_uses_snake_case_tags() {
    let json = serde_json::to_string(&TaskStatus::WaitingManual).unwrap();
    assert_eq!(json, "\"waiting_manual\"");
}

#[test]
fn from_str_rejects_unknown() {
    assert!("bogus".parse::<TaskStatus>().is_err());
}
