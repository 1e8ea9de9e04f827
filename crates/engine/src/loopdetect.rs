// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loop-progress tracking across failed rounds.
//!
//! Four truncated-hash signatures are tracked per task: the gate
//! reason, the implementation output, the concatenated review outputs,
//! and the verification outcome. Any signature repeating 3 times
//! triggers a strategy shift; 5 cumulative shifts terminate the task
//! with `loop_no_progress`.

use awe_core::{text_signature, LoopSignals};

const REPEAT_THRESHOLD: u32 = 3;
const MAX_STRATEGY_SHIFTS: u32 = 5;
const SIGNATURE_MAX_CHARS: usize = 4000;

#[derive(Debug, Default, Clone)]
pub struct LoopTracker {
    last_gate_reason: String,
    gate_repeat: u32,
    last_impl_sig: String,
    impl_repeat: u32,
    last_review_sig: String,
    review_repeat: u32,
    last_verify_sig: String,
    verify_repeat: u32,
    shift_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopAssessment {
    pub triggered: bool,
    pub hint: String,
    pub signals: LoopSignals,
    pub shift_count: u32,
    pub terminal_reason: Option<String>,
}

impl LoopTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assess(
        &mut self,
        gate_reason: &str,
        implementation_output: &str,
        review_outputs: &[String],
        tests_ok: bool,
        lint_ok: bool,
    ) -> LoopAssessment {
        let reason = gate_reason.trim().to_ascii_lowercase();
        let impl_sig = text_signature(implementation_output, SIGNATURE_MAX_CHARS);
        let review_sig = text_signature(&review_outputs.join("\n"), SIGNATURE_MAX_CHARS);
        let verify_sig = text_signature(
            &format!("tests_ok={tests_ok} lint_ok={lint_ok} reason={reason}"),
            SIGNATURE_MAX_CHARS,
        );

        if !reason.is_empty() && reason == self.last_gate_reason {
            self.gate_repeat += 1;
        } else {
            self.gate_repeat = u32::from(!reason.is_empty());
            self.last_gate_reason = reason.clone();
        }
        if !impl_sig.is_empty() && impl_sig == self.last_impl_sig {
            self.impl_repeat += 1;
        } else {
            self.impl_repeat = u32::from(!impl_sig.is_empty());
            self.last_impl_sig = impl_sig;
        }
        if !review_sig.is_empty() && review_sig == self.last_review_sig {
            self.review_repeat += 1;
        } else {
            self.review_repeat = u32::from(!review_sig.is_empty());
            self.last_review_sig = review_sig;
        }
        if !verify_sig.is_empty() && verify_sig == self.last_verify_sig {
            self.verify_repeat += 1;
        } else {
            self.verify_repeat = u32::from(!verify_sig.is_empty());
            self.last_verify_sig = verify_sig;
        }

        let triggered = self.gate_repeat >= REPEAT_THRESHOLD
            || self.impl_repeat >= REPEAT_THRESHOLD
            || self.review_repeat >= REPEAT_THRESHOLD
            || self.verify_repeat >= REPEAT_THRESHOLD;
        if triggered {
            self.shift_count += 1;
        }

        let terminal_reason = (triggered && self.shift_count >= MAX_STRATEGY_SHIFTS)
            .then(|| "loop_no_progress".to_string());
        let hint = if triggered {
            strategy_hint_from_reason(
                &reason,
                self.gate_repeat,
                self.impl_repeat,
                self.review_repeat,
                self.verify_repeat,
            )
        } else {
            String::new()
        };

        LoopAssessment {
            triggered,
            hint,
            signals: LoopSignals {
                gate_reason: reason,
                gate_repeat: self.gate_repeat,
                implementation_repeat: self.impl_repeat,
                review_repeat: self.review_repeat,
                verification_repeat: self.verify_repeat,
            },
            shift_count: self.shift_count,
            terminal_reason,
        }
    }
}

/// Reason-specific guidance injected into the next round's prompts.
pub fn strategy_hint_from_reason(
    gate_reason: &str,
    gate_repeat: u32,
    impl_repeat: u32,
    review_repeat: u32,
    verify_repeat: u32,
) -> String {
    match gate_reason {
        "precompletion_evidence_missing" => {
            "Current summaries lack concrete file evidence. Next round must include explicit \
             repo-relative paths for changed files, failed checks, and reviewer findings."
                .to_string()
        }
        "tests_failed" | "lint_failed" => {
            "Verification is repeating failures. Switch to test-first micro-fix: isolate one \
             failing area, change minimal files, rerun verification, then continue."
                .to_string()
        }
        "command_timeout" | "command_not_found" | "command_not_configured" | "command_failed" => {
            "Agent runtime failed before producing reliable output. Fix CLI command/runtime \
             configuration first, then rerun with a minimal reproducible scope."
                .to_string()
        }
        "review_blocker" | "review_unknown" => {
            "Reviewer concern persists. Limit scope to reviewer blockers only, address each \
             blocker with evidence, and avoid unrelated edits."
                .to_string()
        }
        "architecture_threshold_exceeded" => {
            "Architecture audit failed on oversized files. Prioritize splitting large files by \
             responsibility, add targeted tests around moved logic, then rerun verification."
                .to_string()
        }
        "architecture_threshold_warning" => {
            "Architecture audit reports warning-level debt. Keep current fix scoped, then \
             schedule a follow-up split plan with concrete module boundaries and validation."
                .to_string()
        }
        _ => format!(
            "Loop detected (gate_repeat={gate_repeat}, impl_repeat={impl_repeat}, \
             review_repeat={review_repeat}, verify_repeat={verify_repeat}). Narrow scope, \
             change approach, and provide concrete evidence paths."
        ),
    }
}

#[cfg(test)]
#[path = "loopdetect_tests.rs"]
mod tests;
