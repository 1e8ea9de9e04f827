// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn validation_carries_field_and_stable_code() {
    let error = ServiceError::validation("bad reviewer", "reviewer_participants[1]");
    assert_eq!(error.code(), "validation_error");
    assert_eq!(error.field(), Some("reviewer_participants[1]"));
    assert_eq!(error.to_string(), "bad reviewer");
}

#[test]
fn coded_validation_overrides_code() {
    let error =
        ServiceError::validation_coded("blocked", "merge_target_path", "promotion_guard_blocked");
    assert_eq!(error.code(), "promotion_guard_blocked");
}

#[test]
fn not_found_has_no_field() {
    let error = ServiceError::NotFound("task-x".to_string());
    assert_eq!(error.code(), "task_not_found");
    assert!(error.field().is_none());
}
