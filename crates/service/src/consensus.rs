// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proposal consensus: the pre-execution checkpoint.
//!
//! Reviewer precheck → author proposal with issue responses →
//! reviewer verdicts → consensus. Contract violations and unresolved
//! verdicts retry within the round until the retry limit, then the
//! task parks in `waiting_manual` with a `pending_proposal` artifact.

use crate::contract::{
    extract_required_issue_ids, parse_author_issue_responses, parse_reviewer_issues,
    validate_author_issue_responses, validate_reviewer_issue_contract, ReviewerPassItem,
};
use crate::error::ServiceError;
use crate::service::OrchestratorService;
use awe_core::{
    clip_text, parse_deadline, text_signature, Event, Participant, ReviewVerdict, Task,
    TaskStatus, VerdictCounts,
};
use awe_engine::{prompts, resolve_runtime_profile, RunConfig, WorkflowEngine};
use awe_adapters::RunRequest;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// In-round retries before declaring a stall.
pub const PROPOSAL_STALL_RETRY_LIMIT: u32 = 10;
/// Consecutive identical consensus rounds before a cross-round stall.
pub const PROPOSAL_REPEAT_ROUNDS_LIMIT: u32 = 4;
/// Consensus completes once per task start.
const PROPOSAL_TARGET_ROUNDS: u32 = 1;

fn is_actionable_proposal_review_text(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.starts_with("[proposal_precheck_review_error]")
        || trimmed.starts_with("[proposal_review_error]")
    {
        return false;
    }
    awe_adapters::runtime_error_reason(trimmed, 0).is_none()
}

fn verdict_counts(items: &[&ReviewerPassItem]) -> VerdictCounts {
    let mut counts = VerdictCounts::default();
    for item in items {
        match item.verdict {
            ReviewVerdict::NoBlocker => counts.no_blocker += 1,
            ReviewVerdict::Blocker => counts.blocker += 1,
            ReviewVerdict::Unknown => counts.unknown += 1,
        }
    }
    counts
}

fn consensus_reached(items: &[&ReviewerPassItem]) -> bool {
    !items.is_empty()
        && items
            .iter()
            .all(|item| item.verdict == ReviewVerdict::NoBlocker)
}

fn usable_count(items: &[ReviewerPassItem]) -> usize {
    items
        .iter()
        .filter(|item| is_actionable_proposal_review_text(&item.output))
        .count()
}

/// Hash over sorted issue identities plus the proposal text, used for
/// the cross-round stall detector.
fn round_signature(items: &[&ReviewerPassItem], proposal_text: &str) -> String {
    let mut ids: Vec<&str> = items
        .iter()
        .flat_map(|item| item.issues.iter().map(|issue| issue.issue_id.as_str()))
        .collect();
    ids.sort_unstable();
    ids.dedup();
    text_signature(&format!("{}\n{proposal_text}", ids.join(",")), 4000)
}

fn reviews_payload(items: &[ReviewerPassItem]) -> Value {
    serde_json::to_value(items).unwrap_or(Value::Null)
}

impl OrchestratorService {
    fn proposal_review_timeout(&self, config: &RunConfig) -> Duration {
        config
            .phase_timeout_seconds
            .get("review")
            .map(|seconds| Duration::from_secs((*seconds).max(10)))
            .unwrap_or_else(|| WorkflowEngine::review_timeout(self.engine.participant_timeout()))
    }

    fn proposal_timeout(&self, config: &RunConfig) -> Duration {
        config
            .phase_timeout_seconds
            .get("proposal")
            .map(|seconds| Duration::from_secs((*seconds).max(10)))
            .unwrap_or_else(|| self.engine.participant_timeout())
    }

    async fn run_consensus_participant(
        &self,
        config: &RunConfig,
        participant: &Participant,
        prompt: String,
        timeout: Duration,
    ) -> awe_adapters::AdapterResult {
        let profile = resolve_runtime_profile(config, participant);
        let mut request = RunRequest::new(participant.clone(), prompt, config.cwd.clone());
        request.timeout = timeout;
        request.model = profile.model;
        request.model_params = profile.model_params;
        request.claude_team_agents = profile.claude_team_agents;
        request.codex_multi_agents = profile.codex_multi_agents;
        self.engine.runner().run(request).await
    }

    /// One reviewer pass over `source_text`. Returns the per-reviewer
    /// payloads and the context merged with every review.
    async fn run_proposal_reviewer_pass(
        &self,
        task_id: &str,
        config: &RunConfig,
        source_text: &str,
        round: u32,
        stage: &str,
        environment: &str,
    ) -> (Vec<ReviewerPassItem>, String) {
        let precheck = stage == "proposal_precheck_review";
        let timeout = self.proposal_review_timeout(config);
        let mut merged_context = source_text.trim().to_string();
        let mut items = Vec::with_capacity(config.reviewers.len());

        for reviewer in &config.reviewers {
            let started = if precheck {
                Event::ProposalPrecheckReviewStarted {
                    round,
                    participant: reviewer.participant_id(),
                    provider: reviewer.provider.clone(),
                    timeout_seconds: timeout.as_secs(),
                }
            } else {
                Event::ProposalReviewStarted {
                    round,
                    participant: reviewer.participant_id(),
                    provider: reviewer.provider.clone(),
                    timeout_seconds: timeout.as_secs(),
                }
            };
            self.record_event(task_id, &started);

            let prompt = prompts::proposal_review_prompt(
                config,
                stage,
                &merged_context,
                environment,
                config.memory_context_for_stage("proposal"),
            );
            let result = self
                .run_consensus_participant(config, reviewer, prompt, timeout)
                .await;

            let (verdict, review_text) = match result.runtime_error_reason() {
                Some(reason) => {
                    let error_event = if precheck {
                        Event::ProposalPrecheckReviewError {
                            round,
                            participant: reviewer.participant_id(),
                            provider: reviewer.provider.clone(),
                            reason: reason.clone(),
                        }
                    } else {
                        Event::ProposalReviewError {
                            round,
                            participant: reviewer.participant_id(),
                            provider: reviewer.provider.clone(),
                            reason: reason.clone(),
                        }
                    };
                    self.record_event(task_id, &error_event);
                    (
                        ReviewVerdict::Unknown,
                        format!("[{stage}_error] {reason}"),
                    )
                }
                None => (result.verdict, result.output.trim().to_string()),
            };

            let issues = parse_reviewer_issues(&review_text, verdict);
            let blocking = matches!(verdict, ReviewVerdict::Blocker | ReviewVerdict::Unknown);
            let contract_ok = !(blocking && issues.is_empty());
            self.record_event(
                task_id,
                &Event::ProposalReview {
                    round,
                    stage: stage.to_string(),
                    participant: reviewer.participant_id(),
                    provider: reviewer.provider.clone(),
                    verdict,
                    output: review_text.clone(),
                    issues: issues.clone(),
                    issue_contract_ok: contract_ok,
                },
            );
            if !review_text.is_empty() {
                let _ = self.artifacts.append_discussion(
                    task_id,
                    &format!("{stage}:{}", reviewer.participant_id()),
                    round,
                    &review_text,
                );
            }
            merged_context = prompts::append_proposal_feedback_context(
                &merged_context,
                &reviewer.participant_id(),
                &review_text,
            );
            items.push(ReviewerPassItem {
                participant: reviewer.participant_id(),
                provider: reviewer.provider.clone(),
                verdict,
                output: review_text,
                issues,
            });
        }
        (items, merged_context)
    }

    fn finish_proposal_terminal(
        &self,
        task_id: &str,
        status: TaskStatus,
        reason: &str,
        rounds_completed: u32,
        event: &Event,
    ) -> Result<Task, ServiceError> {
        let updated = self.repository.update_task_status(
            task_id,
            status,
            Some(reason),
            Some(rounds_completed),
        )?;
        self.record_event(task_id, event);
        self.patch_state(
            task_id,
            &json!({
                "status": status.to_string(),
                "last_gate_reason": reason,
                "rounds_completed": rounds_completed,
            }),
        );
        self.write_final_report(task_id, status, reason);
        Ok(updated)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_proposal_stalled(
        &self,
        task_id: &str,
        row: &Task,
        reason: &str,
        summary: &str,
        rounds_completed: u32,
        stall_payload: Value,
        latest_reviews: &[ReviewerPassItem],
        author_feedback_note: Option<&str>,
    ) -> Result<Task, ServiceError> {
        let waiting = self.repository.update_task_status(
            task_id,
            TaskStatus::WaitingManual,
            Some(reason),
            Some(rounds_completed),
        )?;
        self.record_event(
            task_id,
            &Event::ProposalConsensusStalled {
                reason: reason.to_string(),
                details: stall_payload.clone(),
            },
        );
        let pending = json!({
            "summary": summary,
            "self_loop_mode": row.self_loop_mode,
            "consensus_rounds": rounds_completed,
            "target_rounds": PROPOSAL_TARGET_ROUNDS,
            "review_payload": reviews_payload(latest_reviews),
            "author_feedback_note": author_feedback_note,
            "stall": stall_payload,
        });
        self.record_event(
            task_id,
            &Event::AuthorConfirmationRequired {
                details: pending.clone(),
            },
        );
        let _ = self
            .artifacts
            .write_artifact_json(task_id, "pending_proposal", &pending);
        let _ = self
            .artifacts
            .write_artifact_json(task_id, "consensus_stall", &json!({"reason": reason, "stall": pending["stall"]}));
        self.patch_state(
            task_id,
            &json!({
                "status": "waiting_manual",
                "last_gate_reason": reason,
                "rounds_completed": rounds_completed,
                "pending_proposal": pending,
            }),
        );
        self.write_final_report(task_id, TaskStatus::WaitingManual, reason);
        Ok(waiting)
    }

    /// Run the consensus subprotocol for a task already holding the
    /// running state. Ends in `running` (auto-approve), `waiting_manual`
    /// (checkpoint or stall), `failed_gate` (no usable reviewers), or
    /// `canceled`.
    pub(crate) async fn prepare_author_confirmation(
        &self,
        row: &Task,
        auto_approve: bool,
        memory_contexts: &BTreeMap<String, String>,
    ) -> Result<Task, ServiceError> {
        let task_id = row.task_id.as_str();
        let config = self.build_run_config(row, memory_contexts);
        let environment = prompts::environment_context(&config);
        let proposal_timeout = self.proposal_timeout(&config);
        let proposal_deadline = parse_deadline(config.evolve_until.as_deref());
        let author_feedback_note = self.latest_author_feedback_note(task_id);

        let mut seed = row.description.trim().to_string();
        if seed.is_empty() {
            seed = row.title.trim().to_string();
        }
        if let Some(note) = &author_feedback_note {
            seed = format!(
                "{seed}\n\nOperator custom feedback (must be addressed in next proposal):\n- {note}"
            );
        }
        let mut current_seed = seed;
        let mut consensus_rounds: u32 = 0;
        let mut review_payload: Vec<ReviewerPassItem> = Vec::new();
        let mut last_round_signature = String::new();
        let mut repeated_signature_rounds: u32 = 0;
        let reviewer_first = !config.reviewers.is_empty();

        'rounds: while reviewer_first && consensus_rounds < PROPOSAL_TARGET_ROUNDS {
            let round = consensus_rounds + 1;
            let mut attempt: u32 = 0;

            loop {
                if self.repository.is_cancel_requested(task_id)? {
                    return self.finish_proposal_terminal(
                        task_id,
                        TaskStatus::Canceled,
                        "canceled",
                        consensus_rounds,
                        &Event::ProposalCanceled { round, attempt },
                    );
                }
                if let Some(deadline) = proposal_deadline {
                    if self.engine.clock().now_utc() >= deadline {
                        return self.finish_proposal_terminal(
                            task_id,
                            TaskStatus::Canceled,
                            "deadline_reached",
                            consensus_rounds,
                            &Event::ProposalDeadlineReached {
                                round,
                                attempt,
                                deadline: deadline.to_rfc3339(),
                            },
                        );
                    }
                }

                attempt += 1;

                // 1. Reviewer precheck over the current seed.
                let (pre_reviews, merged_context) = self
                    .run_proposal_reviewer_pass(
                        task_id,
                        &config,
                        &current_seed,
                        round,
                        "proposal_precheck_review",
                        &environment,
                    )
                    .await;
                let precheck_actionable: Vec<&ReviewerPassItem> = pre_reviews
                    .iter()
                    .filter(|item| is_actionable_proposal_review_text(&item.output))
                    .collect();
                let precheck_owned: Vec<ReviewerPassItem> =
                    precheck_actionable.iter().map(|item| (*item).clone()).collect();
                let precheck_contract = validate_reviewer_issue_contract(&precheck_owned);
                if !precheck_contract.ok {
                    self.record_event(
                        task_id,
                        &Event::ProposalReviewContractViolation {
                            round,
                            attempt,
                            stage: "proposal_precheck_review".to_string(),
                            missing_issue_participants: precheck_contract
                                .missing_issue_participants
                                .clone(),
                        },
                    );
                    current_seed = prompts::append_proposal_feedback_context(
                        &merged_context,
                        "contract",
                        &format!(
                            "proposal_precheck_review contract violation: missing structured \
                             issues from {}",
                            precheck_contract.missing_issue_participants.join(", ")
                        ),
                    );
                    if attempt >= PROPOSAL_STALL_RETRY_LIMIT {
                        let summary = format!(
                            "Task: {}\nProposal precheck contract violation in round {round}: \
                             reached retry limit ({PROPOSAL_STALL_RETRY_LIMIT}).",
                            row.title
                        );
                        return self.finish_proposal_stalled(
                            task_id,
                            row,
                            "proposal_consensus_stalled_in_round",
                            &summary,
                            consensus_rounds,
                            json!({
                                "stall_kind": "in_round",
                                "round": round,
                                "attempt": attempt,
                                "retry_limit": PROPOSAL_STALL_RETRY_LIMIT,
                                "stage": "proposal_precheck_review",
                            }),
                            &pre_reviews,
                            author_feedback_note.as_deref(),
                        );
                    }
                    continue;
                }
                if !pre_reviews.is_empty() && usable_count(&pre_reviews) == 0 {
                    return self.finish_proposal_terminal(
                        task_id,
                        TaskStatus::FailedGate,
                        "proposal_precheck_unavailable",
                        consensus_rounds,
                        &Event::ProposalPrecheckUnavailable {
                            round,
                            attempt,
                            reviewers_total: pre_reviews.len(),
                            reviewers_usable: 0,
                        },
                    );
                }

                // 2. Author proposal with issue responses.
                self.record_event(
                    task_id,
                    &Event::ProposalDiscussionStarted {
                        round,
                        participant: config.author.participant_id(),
                        provider: config.author.provider.clone(),
                        timeout_seconds: proposal_timeout.as_secs(),
                        attempt,
                    },
                );
                let precheck_issue_list: Vec<awe_core::ReviewerIssue> = pre_reviews
                    .iter()
                    .flat_map(|item| item.issues.iter().cloned())
                    .collect();
                let author_prompt = prompts::proposal_author_prompt(
                    &config,
                    &merged_context,
                    &precheck_issue_list,
                    &environment,
                    config.memory_context_for_stage("discussion"),
                );
                let discussion = self
                    .run_consensus_participant(&config, &config.author, author_prompt, proposal_timeout)
                    .await;
                if let Some(reason) = discussion.runtime_error_reason() {
                    self.record_event(
                        task_id,
                        &Event::ProposalDiscussionError {
                            round,
                            attempt,
                            participant: config.author.participant_id(),
                            provider: config.author.provider.clone(),
                            reason: reason.clone(),
                        },
                    );
                    current_seed = prompts::append_proposal_feedback_context(
                        &current_seed,
                        "author",
                        &format!("proposal_discussion_error attempt={attempt}: {reason}"),
                    );
                    if attempt >= PROPOSAL_STALL_RETRY_LIMIT {
                        let summary = format!(
                            "Task: {}\nProposal discussion kept failing in round {round}: \
                             reached retry limit ({PROPOSAL_STALL_RETRY_LIMIT}).",
                            row.title
                        );
                        return self.finish_proposal_stalled(
                            task_id,
                            row,
                            "proposal_consensus_stalled_in_round",
                            &summary,
                            consensus_rounds,
                            json!({
                                "stall_kind": "in_round",
                                "round": round,
                                "attempt": attempt,
                                "retry_limit": PROPOSAL_STALL_RETRY_LIMIT,
                                "stage": "proposal_discussion",
                            }),
                            &pre_reviews,
                            author_feedback_note.as_deref(),
                        );
                    }
                    continue;
                }
                let discussion_text = {
                    let text = discussion.output.trim().to_string();
                    if text.is_empty() {
                        current_seed.clone()
                    } else {
                        text
                    }
                };
                let proposal_preview_source = discussion_text.clone();

                // Issue-response contract enforcement.
                let required_issue_ids = extract_required_issue_ids(&pre_reviews);
                let author_responses = parse_author_issue_responses(&discussion_text);
                let author_validation =
                    validate_author_issue_responses(&required_issue_ids, &author_responses);
                if !required_issue_ids.is_empty() && !author_validation.ok {
                    self.record_event(
                        task_id,
                        &Event::ProposalDiscussionIncomplete {
                            round,
                            attempt,
                            required_issue_ids: author_validation.required_issue_ids.clone(),
                            missing_issue_ids: author_validation.missing_issue_ids.clone(),
                            invalid_reject_issue_ids: author_validation
                                .invalid_reject_issue_ids
                                .clone(),
                        },
                    );
                    current_seed = prompts::append_proposal_feedback_context(
                        &merged_context,
                        "contract",
                        &format!(
                            "proposal_discussion_incomplete: missing/invalid issue responses. \
                             missing={}; invalid_reject={}",
                            if author_validation.missing_issue_ids.is_empty() {
                                "n/a".to_string()
                            } else {
                                author_validation.missing_issue_ids.join(",")
                            },
                            if author_validation.invalid_reject_issue_ids.is_empty() {
                                "n/a".to_string()
                            } else {
                                author_validation.invalid_reject_issue_ids.join(",")
                            },
                        ),
                    );
                    if attempt >= PROPOSAL_STALL_RETRY_LIMIT {
                        let preview = clip_text(&proposal_preview_source, 800);
                        let summary = format!(
                            "Task: {}\nProposal discussion incomplete in round {round}: reached \
                             retry limit ({PROPOSAL_STALL_RETRY_LIMIT}).\nConsensus rounds \
                             completed: {consensus_rounds}/{PROPOSAL_TARGET_ROUNDS}\nLatest \
                             proposal preview:\n{preview}",
                            row.title
                        );
                        return self.finish_proposal_stalled(
                            task_id,
                            row,
                            "proposal_consensus_stalled_in_round",
                            &summary,
                            consensus_rounds,
                            json!({
                                "stall_kind": "in_round",
                                "round": round,
                                "attempt": attempt,
                                "retry_limit": PROPOSAL_STALL_RETRY_LIMIT,
                                "missing_issue_ids": author_validation.missing_issue_ids,
                                "invalid_reject_issue_ids": author_validation.invalid_reject_issue_ids,
                            }),
                            &pre_reviews,
                            author_feedback_note.as_deref(),
                        );
                    }
                    continue;
                }

                self.record_event(
                    task_id,
                    &Event::Discussion {
                        round,
                        participant: config.author.participant_id(),
                        provider: config.author.provider.clone(),
                        output: discussion_text.clone(),
                        duration_seconds: Some(discussion.duration_seconds),
                        attempt: Some(attempt),
                    },
                );
                let _ = self.artifacts.append_discussion(
                    task_id,
                    &format!("discussion:{}", config.author.participant_id()),
                    round,
                    &discussion_text,
                );

                // 3. Reviewer verdicts over the proposal.
                let (round_reviews, merged_after_review) = self
                    .run_proposal_reviewer_pass(
                        task_id,
                        &config,
                        &discussion_text,
                        round,
                        "proposal_review",
                        &environment,
                    )
                    .await;
                let actionable_owned: Vec<ReviewerPassItem> = round_reviews
                    .iter()
                    .filter(|item| is_actionable_proposal_review_text(&item.output))
                    .cloned()
                    .collect();
                let review_contract = validate_reviewer_issue_contract(&actionable_owned);
                if !review_contract.ok {
                    self.record_event(
                        task_id,
                        &Event::ProposalReviewContractViolation {
                            round,
                            attempt,
                            stage: "proposal_review".to_string(),
                            missing_issue_participants: review_contract
                                .missing_issue_participants
                                .clone(),
                        },
                    );
                    current_seed = prompts::append_proposal_feedback_context(
                        &merged_after_review,
                        "contract",
                        &format!(
                            "proposal_review contract violation: missing structured issues \
                             from {}",
                            review_contract.missing_issue_participants.join(", ")
                        ),
                    );
                    if attempt >= PROPOSAL_STALL_RETRY_LIMIT {
                        let preview = clip_text(&proposal_preview_source, 800);
                        let summary = format!(
                            "Task: {}\nProposal review contract violation in round {round}: \
                             reached retry limit ({PROPOSAL_STALL_RETRY_LIMIT}).\nLatest \
                             proposal preview:\n{preview}",
                            row.title
                        );
                        return self.finish_proposal_stalled(
                            task_id,
                            row,
                            "proposal_consensus_stalled_in_round",
                            &summary,
                            consensus_rounds,
                            json!({
                                "stall_kind": "in_round",
                                "round": round,
                                "attempt": attempt,
                                "retry_limit": PROPOSAL_STALL_RETRY_LIMIT,
                                "missing_issue_participants": review_contract.missing_issue_participants,
                            }),
                            &round_reviews,
                            author_feedback_note.as_deref(),
                        );
                    }
                    continue;
                }

                review_payload = round_reviews.clone();
                let usable = usable_count(&round_reviews);
                if !round_reviews.is_empty() && usable == 0 {
                    return self.finish_proposal_terminal(
                        task_id,
                        TaskStatus::FailedGate,
                        "proposal_review_unavailable",
                        consensus_rounds,
                        &Event::ProposalReviewUnavailable {
                            round,
                            attempt,
                            reviewers_total: round_reviews.len(),
                            reviewers_usable: 0,
                        },
                    );
                }
                if usable > 0 && usable < config.reviewers.len() {
                    self.record_event(
                        task_id,
                        &Event::ProposalReviewPartial {
                            round,
                            attempt,
                            reviewers_total: round_reviews.len(),
                            reviewers_usable: usable,
                        },
                    );
                }
                let actionable: Vec<&ReviewerPassItem> = round_reviews
                    .iter()
                    .filter(|item| is_actionable_proposal_review_text(&item.output))
                    .collect();
                let counts = verdict_counts(&actionable);

                // 4. Consensus decision over the usable subset.
                if consensus_reached(&actionable) {
                    consensus_rounds += 1;
                    current_seed = proposal_preview_source.clone();
                    self.record_event(
                        task_id,
                        &Event::ProposalConsensusReached {
                            round,
                            attempt,
                            verdicts: counts,
                            consensus_rounds,
                            target_rounds: PROPOSAL_TARGET_ROUNDS,
                        },
                    );
                    let signature = round_signature(&actionable, &proposal_preview_source);
                    if signature.is_empty() {
                        last_round_signature.clear();
                        repeated_signature_rounds = 0;
                    } else if signature == last_round_signature {
                        repeated_signature_rounds += 1;
                    } else {
                        last_round_signature = signature.clone();
                        repeated_signature_rounds = 1;
                    }
                    if PROPOSAL_TARGET_ROUNDS > 1
                        && !signature.is_empty()
                        && repeated_signature_rounds >= PROPOSAL_REPEAT_ROUNDS_LIMIT
                    {
                        let preview = clip_text(&proposal_preview_source, 800);
                        let summary = format!(
                            "Task: {}\nConsensus stalled across rounds: repeated issue \
                             signature for {repeated_signature_rounds} rounds.\nLatest proposal \
                             preview:\n{preview}",
                            row.title
                        );
                        return self.finish_proposal_stalled(
                            task_id,
                            row,
                            "proposal_consensus_stalled_across_rounds",
                            &summary,
                            consensus_rounds,
                            json!({
                                "stall_kind": "across_rounds",
                                "round": round,
                                "attempt": attempt,
                                "repeated_rounds": repeated_signature_rounds,
                                "repeat_round_limit": PROPOSAL_REPEAT_ROUNDS_LIMIT,
                                "round_signature": signature,
                            }),
                            &actionable_owned,
                            author_feedback_note.as_deref(),
                        );
                    }
                    continue 'rounds;
                }

                self.record_event(
                    task_id,
                    &Event::ProposalConsensusRetry {
                        round,
                        attempt,
                        verdicts: counts,
                    },
                );
                current_seed = prompts::append_proposal_feedback_context(
                    &merged_after_review,
                    "consensus",
                    &format!(
                        "unresolved blockers={}, unknown={}",
                        counts.blocker, counts.unknown
                    ),
                );
                if attempt >= PROPOSAL_STALL_RETRY_LIMIT {
                    let preview = clip_text(&proposal_preview_source, 800);
                    let summary = format!(
                        "Task: {}\nConsensus stalled in round {round}: reached retry limit \
                         ({PROPOSAL_STALL_RETRY_LIMIT}).\nConsensus rounds completed: \
                         {consensus_rounds}/{PROPOSAL_TARGET_ROUNDS}\nLatest proposal \
                         preview:\n{preview}",
                        row.title
                    );
                    return self.finish_proposal_stalled(
                        task_id,
                        row,
                        "proposal_consensus_stalled_in_round",
                        &summary,
                        consensus_rounds,
                        json!({
                            "stall_kind": "in_round",
                            "round": round,
                            "attempt": attempt,
                            "retry_limit": PROPOSAL_STALL_RETRY_LIMIT,
                            "verdicts": {
                                "no_blocker": counts.no_blocker,
                                "blocker": counts.blocker,
                                "unknown": counts.unknown,
                            },
                        }),
                        &actionable_owned,
                        author_feedback_note.as_deref(),
                    );
                }
            }
        }

        // 5. Checkpoint: summarize, park, and optionally auto-approve.
        let counts = {
            let all: Vec<&ReviewerPassItem> = review_payload.iter().collect();
            verdict_counts(&all)
        };
        let preview = clip_text(&current_seed, 1200);
        let mut summary = format!(
            "Task: {}\nConsensus rounds: {consensus_rounds}/{PROPOSAL_TARGET_ROUNDS}\n\
             Proposal verdicts: no_blocker={}, blocker={}, unknown={}\nProposal:\n{preview}",
            row.title, counts.no_blocker, counts.blocker, counts.unknown
        );
        if let Some(note) = &author_feedback_note {
            summary = format!("{summary}\nAuthor feedback:\n- {note}");
        }

        let waiting = self.repository.update_task_status(
            task_id,
            TaskStatus::WaitingManual,
            Some("author_confirmation_required"),
            Some(consensus_rounds),
        )?;
        let pending = json!({
            "summary": summary,
            "self_loop_mode": row.self_loop_mode,
            "consensus_rounds": consensus_rounds,
            "target_rounds": PROPOSAL_TARGET_ROUNDS,
            "review_payload": reviews_payload(&review_payload),
            "author_feedback_note": author_feedback_note,
        });
        self.record_event(
            task_id,
            &Event::AuthorConfirmationRequired {
                details: pending.clone(),
            },
        );
        let _ = self
            .artifacts
            .write_artifact_json(task_id, "pending_proposal", &pending);

        if auto_approve {
            self.record_event(
                task_id,
                &Event::AuthorDecision {
                    decision: "approved".to_string(),
                    note: Some("auto_approved_by_self_loop_mode".to_string()),
                },
            );
            self.repository.set_cancel_requested(task_id, false)?;
            let approved = self.repository.update_task_status(
                task_id,
                TaskStatus::Running,
                Some("author_approved"),
                Some(consensus_rounds),
            )?;
            self.patch_state(
                task_id,
                &json!({
                    "status": "running",
                    "last_gate_reason": "author_approved",
                    "cancel_requested": false,
                    "pending_proposal": pending,
                }),
            );
            return Ok(approved);
        }

        self.patch_state(
            task_id,
            &json!({
                "status": "waiting_manual",
                "last_gate_reason": "author_confirmation_required",
                "pending_proposal": pending,
            }),
        );
        Ok(waiting)
    }
}

#[cfg(test)]
#[path = "consensus_tests.rs"]
mod tests;
