// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types emitted by the workflow engine and orchestrator.
//!
//! Serializes with `{"type": "event_name", ...fields}` format. The
//! repository persists each event as `(type, payload)` where the
//! payload is the full serialized object; the artifact mirror appends
//! the same object to `events.jsonl`.

use crate::id::TaskId;
use crate::verdict::ReviewVerdict;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Pre-completion checklist outcome flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistChecks {
    pub test_command_configured: bool,
    pub lint_command_configured: bool,
    pub verification_executed: bool,
    pub tests_ok: bool,
    pub lint_ok: bool,
    pub evidence_paths_present: bool,
}

/// Loop-progress repeat counters attached to `strategy_shifted`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSignals {
    pub gate_reason: String,
    pub gate_repeat: u32,
    pub implementation_repeat: u32,
    pub review_repeat: u32,
    pub verification_repeat: u32,
}

/// Verdict tally over a reviewer pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub no_blocker: usize,
    pub blocker: usize,
    pub unknown: usize,
}

/// A structured issue a reviewer raised during proposal consensus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewerIssue {
    pub issue_id: String,
    pub summary: String,
    pub severity: String,
    #[serde(default)]
    pub required_action: String,
    #[serde(default)]
    pub evidence_paths: Vec<String>,
    pub required_response: bool,
}

/// The author's response to a required issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueResponse {
    pub issue_id: String,
    /// `accept`, `reject`, or `defer`.
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub alternative_plan: String,
    #[serde(default)]
    pub validation_commands: Vec<String>,
    #[serde(default)]
    pub evidence_paths: Vec<String>,
}

/// Evidence bundle captured from the most recent pre-completion
/// checklist; validated by the service before a task may pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub task_id: String,
    pub round: u32,
    pub passed: bool,
    pub reason: String,
    pub checks: ChecklistChecks,
    pub evidence_paths: Vec<String>,
    pub workspace_path: String,
    pub generated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
}

/// Events that record workflow and lifecycle facts for a task.
///
/// Variant names map 1:1 onto the persisted snake_case type tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // -- lifecycle --
    TaskStarted {
        task_id: TaskId,
    },
    TaskRunning,
    RoundStarted {
        round: u32,
    },
    Canceled {
        round: u32,
    },
    DeadlineReached {
        round: u32,
        deadline: String,
    },

    // -- debate precheck --
    DebateStarted {
        round: u32,
        mode: String,
        reviewer_count: usize,
    },
    DebateReviewStarted {
        round: u32,
        participant: String,
        provider: String,
        timeout_seconds: u64,
    },
    DebateReview {
        round: u32,
        participant: String,
        provider: String,
        output: String,
        usable: bool,
    },
    DebateReviewError {
        round: u32,
        participant: String,
        provider: String,
        output: String,
    },
    DebateCompleted {
        round: u32,
        reviewers_total: usize,
        reviewers_usable: usize,
    },

    // -- main stages --
    DiscussionStarted {
        round: u32,
        participant: String,
        provider: String,
        timeout_seconds: u64,
    },
    Discussion {
        round: u32,
        participant: String,
        provider: String,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
    },
    ImplementationStarted {
        round: u32,
        participant: String,
        provider: String,
        timeout_seconds: u64,
    },
    Implementation {
        round: u32,
        participant: String,
        provider: String,
        output: String,
        duration_seconds: f64,
    },
    ReviewStarted {
        round: u32,
        participant: String,
        timeout_seconds: u64,
    },
    Review {
        round: u32,
        participant: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        verdict: ReviewVerdict,
        output: String,
        duration_seconds: f64,
    },
    ReviewError {
        round: u32,
        participant: String,
        reason: String,
    },
    VerificationStarted {
        round: u32,
        test_command: String,
        lint_command: String,
        timeout_seconds: u64,
    },
    Verification {
        round: u32,
        tests_ok: bool,
        lint_ok: bool,
        test_stdout: String,
        lint_stdout: String,
    },
    PrecompletionChecklist {
        round: u32,
        passed: bool,
        reason: String,
        checks: ChecklistChecks,
        evidence_paths: Vec<String>,
    },
    ArchitectureAudit {
        round: u32,
        enabled: bool,
        passed: bool,
        mode: String,
        severity: String,
        reason: String,
        violations: Vec<String>,
        scanned_files: usize,
    },
    GatePassed {
        round: u32,
        reason: String,
    },
    GateFailed {
        round: u32,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },
    StrategyShifted {
        round: u32,
        hint: String,
        signals: LoopSignals,
        shift_count: u32,
    },

    // -- prompt-cache probes --
    PromptCacheProbe {
        round: u32,
        stage: String,
        participant: String,
        provider: String,
        model: String,
        model_params: String,
        prompt_chars: usize,
        prefix_signature: String,
        prompt_signature: String,
        toolset_signature: String,
        baseline: bool,
        prefix_reuse_eligible: bool,
        prefix_reused: bool,
        model_reuse_eligible: bool,
        model_reused: bool,
        toolset_reuse_eligible: bool,
        toolset_reused: bool,
    },
    PromptCacheBreak {
        round: u32,
        stage: String,
        participant: String,
        provider: String,
        reason: String,
        previous_signature: String,
        current_signature: String,
    },

    // -- streaming --
    ParticipantStream {
        round: u32,
        stage: String,
        participant: String,
        provider: String,
        stream: String,
        chunk: String,
    },

    // -- evidence and round artifacts --
    EvidenceBundleReady {
        round: u32,
        bundle: EvidenceBundle,
    },
    RoundArtifactReady {
        round: u32,
        details: Value,
    },
    RoundArtifactError {
        round: u32,
        reason: String,
    },
    PrecompletionGuardFailed {
        reason: String,
        expected_round: u32,
        details: Value,
    },
    EvidenceManifestReady {
        details: Value,
    },
    EvidenceManifestFailed {
        reason: String,
        details: Value,
    },

    // -- guards --
    PreflightRiskGate {
        details: Value,
    },
    PreflightRiskGateFailed {
        details: Value,
    },
    WorkspaceResumeGuardBlocked {
        reason: String,
        details: Value,
    },
    HeadShaCaptured {
        workspace_head_sha: Option<String>,
        merge_target_head_sha: Option<String>,
        merge_target_is_git: bool,
        workspace_path: String,
        merge_target_path: Option<String>,
    },
    HeadShaMissing {
        reason: String,
        phase: String,
        target_path: String,
    },
    HeadShaMismatch {
        reason: String,
        before: String,
        current: String,
        target_path: String,
    },
    PromotionGuardChecked {
        details: Value,
    },
    PromotionGuardBlocked {
        reason: String,
        details: Value,
    },

    // -- merge and promotion --
    AutoMergeCompleted {
        details: Value,
    },
    ManualRoundPromoted {
        round: u32,
        details: Value,
    },
    ManualGate {
        tests_ok: bool,
        lint_ok: bool,
        reviewer_verdicts: Vec<ReviewVerdict>,
        result: String,
    },
    SandboxCleanupCompleted {
        details: Value,
    },
    SandboxCleanupFailed {
        details: Value,
    },

    // -- memory --
    MemoryHit {
        stage: String,
        memory_mode: String,
        hit_count: usize,
        details: Value,
    },
    MemoryPersisted {
        details: Value,
    },

    // -- service lifecycle --
    StartDeduped {
        reason: String,
        status: String,
    },
    StartDeferred {
        reason: String,
        running_now: usize,
        limit: usize,
    },
    AuthorConfirmationRequired {
        details: Value,
    },
    AuthorDecision {
        decision: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    AuthorFeedbackRequested {
        decision: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    CancelRequested {
        requested: bool,
    },
    SystemFailure {
        reason: String,
    },
    ForceFailed {
        reason: String,
        cancel_requested: bool,
    },

    // -- proposal consensus --
    ProposalPrecheckReviewStarted {
        round: u32,
        participant: String,
        provider: String,
        timeout_seconds: u64,
    },
    ProposalPrecheckReviewError {
        round: u32,
        participant: String,
        provider: String,
        reason: String,
    },
    ProposalReviewStarted {
        round: u32,
        participant: String,
        provider: String,
        timeout_seconds: u64,
    },
    ProposalReviewError {
        round: u32,
        participant: String,
        provider: String,
        reason: String,
    },
    ProposalReview {
        round: u32,
        stage: String,
        participant: String,
        provider: String,
        verdict: ReviewVerdict,
        output: String,
        issues: Vec<ReviewerIssue>,
        issue_contract_ok: bool,
    },
    ProposalDiscussionStarted {
        round: u32,
        participant: String,
        provider: String,
        timeout_seconds: u64,
        attempt: u32,
    },
    ProposalDiscussionError {
        round: u32,
        attempt: u32,
        participant: String,
        provider: String,
        reason: String,
    },
    ProposalDiscussionIncomplete {
        round: u32,
        attempt: u32,
        required_issue_ids: Vec<String>,
        missing_issue_ids: Vec<String>,
        invalid_reject_issue_ids: Vec<String>,
    },
    ProposalReviewContractViolation {
        round: u32,
        attempt: u32,
        stage: String,
        missing_issue_participants: Vec<String>,
    },
    ProposalReviewPartial {
        round: u32,
        attempt: u32,
        reviewers_total: usize,
        reviewers_usable: usize,
    },
    ProposalReviewUnavailable {
        round: u32,
        attempt: u32,
        reviewers_total: usize,
        reviewers_usable: usize,
    },
    ProposalPrecheckUnavailable {
        round: u32,
        attempt: u32,
        reviewers_total: usize,
        reviewers_usable: usize,
    },
    ProposalConsensusRetry {
        round: u32,
        attempt: u32,
        verdicts: VerdictCounts,
    },
    ProposalConsensusReached {
        round: u32,
        attempt: u32,
        verdicts: VerdictCounts,
        consensus_rounds: u32,
        target_rounds: u32,
    },
    ProposalConsensusStalled {
        reason: String,
        details: Value,
    },
    ProposalCanceled {
        round: u32,
        attempt: u32,
    },
    ProposalDeadlineReached {
        round: u32,
        attempt: u32,
        deadline: String,
    },
}

impl Event {
    /// The stable snake_case type tag this event serializes under.
    pub fn kind(&self) -> String {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("event")
                .to_string(),
            _ => "event".to_string(),
        }
    }

    /// Round number, when this event is scoped to one.
    pub fn round(&self) -> Option<u32> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.get("round").and_then(Value::as_u64).map(|v| v as u32),
            _ => None,
        }
    }

    /// Free-text output carried by conversation-style events, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Event::Discussion { output, .. }
            | Event::Implementation { output, .. }
            | Event::Review { output, .. }
            | Event::DebateReview { output, .. }
            | Event::ProposalReview { output, .. } => Some(output),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
