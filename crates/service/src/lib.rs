// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! awe-service: the orchestrator.
//!
//! Owns the task lifecycle end to end: creation and validation,
//! sandbox bootstrap, guards, the proposal-consensus checkpoint,
//! concurrency gating, workflow dispatch, terminal transitions, and
//! auto-merge promotion. The only component that mutates the
//! repository outside test helpers.

mod analytics;
mod consensus;
mod contract;
mod error;
mod fusion;
mod guards;
mod memory;
mod rounds;
mod sandbox;
mod service;
mod task_management;

pub use analytics::StatsView;
pub use contract::{
    parse_author_issue_responses, parse_reviewer_issues, validate_author_issue_responses,
    validate_reviewer_issue_contract, AuthorIssueValidation, ReviewerContractCheck,
    ReviewerPassItem,
};
pub use error::ServiceError;
pub use fusion::{DirFusionManager, FusionManager, FusionSummary};
pub use service::{AuthorDecision, OrchestratorService, TaskView};
pub use task_management::CreateTaskInput;

pub use consensus::{PROPOSAL_REPEAT_ROUNDS_LIMIT, PROPOSAL_STALL_RETRY_LIMIT};
