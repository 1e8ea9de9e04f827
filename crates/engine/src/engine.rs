// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-round staged workflow executor.

use crate::audit::run_architecture_audit;
use crate::cache_probe::{CacheProbeInput, PromptCacheState};
use crate::checklist::{run_pre_completion_checklist, ChecklistInput};
use crate::config::{RunConfig, RunResult, RunStatus};
use crate::gate::evaluate_medium_gate;
use crate::loopdetect::LoopTracker;
use crate::profile::resolve_runtime_profile;
use crate::prompts;
use awe_adapters::{AgentRunner, AdapterResult, CommandRunner, RunRequest};
use awe_core::{clip_text, parse_deadline, Clock, Event, Participant, SystemClock, TaskId};
use std::sync::Arc;
use std::time::Duration;

/// Receives every event the engine emits, in order.
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;
/// Polled between phases; true stops the run.
pub type CancelProbe = Arc<dyn Fn() -> bool + Send + Sync>;

const DEFAULT_PARTICIPANT_TIMEOUT: Duration = Duration::from_secs(3600);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const STREAM_CHUNK_MAX_CHARS: usize = 2000;
const VERIFICATION_STDOUT_MAX_CHARS: usize = 500;

struct PhaseTimeouts {
    discussion: Duration,
    implementation: Duration,
    review: Duration,
    command: Duration,
}

/// Runs one task through up to `max_rounds` rounds (or until the
/// deadline in deadline mode) and reports the outcome.
pub struct WorkflowEngine {
    runner: Arc<dyn AgentRunner>,
    commands: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
    participant_timeout: Duration,
    command_timeout: Duration,
}

impl WorkflowEngine {
    pub fn new(runner: Arc<dyn AgentRunner>, commands: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            commands,
            clock: Arc::new(SystemClock),
            participant_timeout: DEFAULT_PARTICIPANT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, participant: Duration, command: Duration) -> Self {
        self.participant_timeout = participant.max(Duration::from_secs(1));
        self.command_timeout = command.max(Duration::from_secs(1));
        self
    }

    /// Swap the wall clock; deadlines are evaluated against it.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn participant_timeout(&self) -> Duration {
        self.participant_timeout
    }

    pub fn runner(&self) -> Arc<dyn AgentRunner> {
        Arc::clone(&self.runner)
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Reviews default to a fraction of the participant budget; every
    /// phase can be pinned explicitly via the per-task timeout map.
    pub fn review_timeout(participant_timeout: Duration) -> Duration {
        (participant_timeout / 2).max(Duration::from_secs(60))
    }

    fn resolve_phase_timeouts(&self, config: &RunConfig) -> PhaseTimeouts {
        let pick = |key: &str, fallback: Duration| {
            config
                .phase_timeout_seconds
                .get(key)
                .map(|seconds| Duration::from_secs((*seconds).max(10)))
                .unwrap_or(fallback)
        };
        PhaseTimeouts {
            discussion: pick("discussion", self.participant_timeout),
            implementation: pick("implementation", self.participant_timeout),
            review: pick("review", Self::review_timeout(self.participant_timeout)),
            command: pick("command", self.command_timeout),
        }
    }

    fn stream_emitter(
        emit: &EventSink,
        round: u32,
        stage: &str,
        participant: &Participant,
    ) -> awe_adapters::StreamCallback {
        let emit = Arc::clone(emit);
        let stage = stage.to_string();
        let participant_id = participant.participant_id();
        let provider = participant.provider.clone();
        Arc::new(move |stream: &str, chunk: &str| {
            (emit.as_ref())(Event::ParticipantStream {
                round,
                stage: stage.clone(),
                participant: participant_id.clone(),
                provider: provider.clone(),
                stream: stream.to_string(),
                chunk: clip_text(chunk, STREAM_CHUNK_MAX_CHARS),
            });
        })
    }

    /// One agent invocation: cache probe, optional stream wiring, run.
    #[allow(clippy::too_many_arguments)]
    async fn invoke(
        &self,
        config: &RunConfig,
        cache_state: &mut PromptCacheState,
        sink: &EventSink,
        stage: &str,
        round: u32,
        participant: &Participant,
        prompt: String,
        timeout: Duration,
    ) -> AdapterResult {
        let emit = sink.as_ref();
        let profile = resolve_runtime_profile(config, participant);
        let (probe, breaks) = cache_state.record(&CacheProbeInput {
            round,
            stage,
            participant,
            model: profile.model.as_deref(),
            model_params: profile.model_params.as_deref(),
            claude_team_agents: profile.claude_team_agents,
            codex_multi_agents: profile.codex_multi_agents,
            prompt: &prompt,
        });
        emit(probe);
        for cache_break in breaks {
            emit(cache_break);
        }

        let mut request = RunRequest::new(participant.clone(), prompt, config.cwd.clone());
        request.timeout = timeout;
        request.model = profile.model;
        request.model_params = profile.model_params;
        request.claude_team_agents = profile.claude_team_agents;
        request.codex_multi_agents = profile.codex_multi_agents;
        if config.stream_mode {
            request.on_stream = Some(Self::stream_emitter(sink, round, stage, participant));
        }
        self.runner.run(request).await
    }

    /// Non-empty review text with no runtime-error marker is usable.
    fn is_actionable_review_text(text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }
        if trimmed.starts_with("[debate_review_error]") || trimmed.starts_with("[review_error]") {
            return false;
        }
        awe_adapters::runtime_error_reason(trimmed, 0).is_none()
    }

    pub async fn run(
        &self,
        config: RunConfig,
        on_event: EventSink,
        should_cancel: CancelProbe,
    ) -> RunResult {
        let sink = &on_event;
        let emit = on_event.as_ref();
        let should_cancel = should_cancel.as_ref();
        emit(Event::TaskStarted {
            task_id: TaskId::from_str_lossy(&config.task_id),
        });
        tracing::info!(
            task_id = %config.task_id,
            max_rounds = config.max_rounds,
            "workflow_started"
        );

        let deadline = parse_deadline(config.evolve_until.as_deref());
        let deadline_mode = deadline.is_some();
        let debate_mode = config.debate_mode && !config.reviewers.is_empty();
        let environment = prompts::environment_context(&config);
        let timeouts = self.resolve_phase_timeouts(&config);
        let mut cache_state = PromptCacheState::new();
        let mut loop_tracker = LoopTracker::new();
        let mut strategy_hint: Option<String> = None;
        let mut previous_gate_reason: Option<String> = None;
        let mut round_no: u32 = 0;

        loop {
            round_no += 1;
            if debate_mode && should_cancel() {
                emit(Event::Canceled { round: round_no });
                return RunResult::new(RunStatus::Canceled, round_no - 1, "canceled");
            }
            if let Some(deadline) = deadline {
                if self.clock.now_utc() >= deadline {
                    emit(Event::DeadlineReached {
                        round: round_no,
                        deadline: deadline.to_rfc3339(),
                    });
                    return RunResult::new(RunStatus::Canceled, round_no - 1, "deadline_reached");
                }
            }
            tracing::info!(round = round_no, "round_started");
            emit(Event::RoundStarted { round: round_no });

            let proposal_memory = config
                .memory_context_for_stage("proposal")
                .map(str::to_string);
            let mut implementation_context = config.description.clone();
            if let Some(reason) = &previous_gate_reason {
                implementation_context =
                    format!("{implementation_context}\n\nPrevious gate failure reason: {reason}");
            }

            // Debate precheck: reviewers speak before the author plans.
            if debate_mode {
                let mut reviews_total = 0usize;
                let mut reviews_usable = 0usize;
                emit(Event::DebateStarted {
                    round: round_no,
                    mode: "reviewer_first".to_string(),
                    reviewer_count: config.reviewers.len(),
                });
                for reviewer in &config.reviewers {
                    if should_cancel() {
                        emit(Event::Canceled { round: round_no });
                        return RunResult::new(RunStatus::Canceled, round_no - 1, "canceled");
                    }
                    emit(Event::DebateReviewStarted {
                        round: round_no,
                        participant: reviewer.participant_id(),
                        provider: reviewer.provider.clone(),
                        timeout_seconds: timeouts.review.as_secs(),
                    });
                    let prompt = prompts::debate_review_prompt(
                        &config,
                        reviewer,
                        round_no,
                        &implementation_context,
                        &environment,
                        strategy_hint.as_deref(),
                        proposal_memory.as_deref(),
                    );
                    let review = self
                        .invoke(
                            &config,
                            &mut cache_state,
                            sink,
                            "debate_review",
                            round_no,
                            reviewer,
                            prompt,
                            timeouts.review,
                        )
                        .await;
                    let mut review_text = review.output.trim().to_string();
                    let usable = match review.runtime_error_reason() {
                        Some(reason) => {
                            review_text = format!("[debate_review_error] {reason}");
                            emit(Event::DebateReviewError {
                                round: round_no,
                                participant: reviewer.participant_id(),
                                provider: reviewer.provider.clone(),
                                output: review_text.clone(),
                            });
                            false
                        }
                        None => Self::is_actionable_review_text(&review_text),
                    };
                    reviews_total += 1;
                    if usable {
                        reviews_usable += 1;
                    }
                    emit(Event::DebateReview {
                        round: round_no,
                        participant: reviewer.participant_id(),
                        provider: reviewer.provider.clone(),
                        output: review_text.clone(),
                        usable,
                    });
                    if usable {
                        implementation_context = prompts::append_debate_line(
                            &implementation_context,
                            &reviewer.participant_id(),
                            &review_text,
                        );
                    }
                }
                emit(Event::DebateCompleted {
                    round: round_no,
                    reviewers_total: reviews_total,
                    reviewers_usable: reviews_usable,
                });
                if reviews_total > 0 && reviews_usable == 0 {
                    let reason = "debate_review_unavailable";
                    emit(Event::GateFailed {
                        round: round_no,
                        reason: reason.to_string(),
                        stage: Some("debate_precheck".to_string()),
                    });
                    return RunResult::new(RunStatus::FailedGate, round_no, reason);
                }
            }

            if should_cancel() {
                emit(Event::Canceled { round: round_no });
                return RunResult::new(RunStatus::Canceled, round_no - 1, "canceled");
            }

            // Discussion: the author plans the round.
            emit(Event::DiscussionStarted {
                round: round_no,
                participant: config.author.participant_id(),
                provider: config.author.provider.clone(),
                timeout_seconds: timeouts.discussion.as_secs(),
            });
            let discussion_memory = config
                .memory_context_for_stage("discussion")
                .map(str::to_string);
            let discussion_prompt = if debate_mode {
                prompts::discussion_after_reviewer_prompt(
                    &config,
                    round_no,
                    &implementation_context,
                    &environment,
                    strategy_hint.as_deref(),
                    discussion_memory.as_deref(),
                )
            } else {
                prompts::discussion_prompt(
                    &config,
                    round_no,
                    previous_gate_reason.as_deref(),
                    &environment,
                    strategy_hint.as_deref(),
                    discussion_memory.as_deref(),
                )
            };
            let discussion = self
                .invoke(
                    &config,
                    &mut cache_state,
                    sink,
                    "discussion",
                    round_no,
                    &config.author,
                    discussion_prompt,
                    timeouts.discussion,
                )
                .await;
            emit(Event::Discussion {
                round: round_no,
                participant: config.author.participant_id(),
                provider: config.author.provider.clone(),
                output: discussion.output.clone(),
                duration_seconds: Some(discussion.duration_seconds),
                attempt: None,
            });
            if let Some(reason) = discussion.runtime_error_reason() {
                emit(Event::GateFailed {
                    round: round_no,
                    reason: reason.clone(),
                    stage: Some("discussion".to_string()),
                });
                return RunResult::new(RunStatus::FailedGate, round_no, reason);
            }
            if !discussion.output.trim().is_empty() {
                implementation_context = discussion.output.trim().to_string();
            }

            if should_cancel() {
                emit(Event::Canceled { round: round_no });
                return RunResult::new(RunStatus::Canceled, round_no - 1, "canceled");
            }

            // Implementation: the author executes the plan.
            emit(Event::ImplementationStarted {
                round: round_no,
                participant: config.author.participant_id(),
                provider: config.author.provider.clone(),
                timeout_seconds: timeouts.implementation.as_secs(),
            });
            let implementation_memory = config
                .memory_context_for_stage("implementation")
                .map(str::to_string);
            let implementation_prompt = prompts::implementation_prompt(
                &config,
                round_no,
                &implementation_context,
                &environment,
                strategy_hint.as_deref(),
                implementation_memory.as_deref(),
            );
            let implementation = self
                .invoke(
                    &config,
                    &mut cache_state,
                    sink,
                    "implementation",
                    round_no,
                    &config.author,
                    implementation_prompt,
                    timeouts.implementation,
                )
                .await;
            emit(Event::Implementation {
                round: round_no,
                participant: config.author.participant_id(),
                provider: config.author.provider.clone(),
                output: implementation.output.clone(),
                duration_seconds: implementation.duration_seconds,
            });
            if let Some(reason) = implementation.runtime_error_reason() {
                emit(Event::GateFailed {
                    round: round_no,
                    reason: reason.clone(),
                    stage: Some("implementation".to_string()),
                });
                return RunResult::new(RunStatus::FailedGate, round_no, reason);
            }

            if should_cancel() {
                emit(Event::Canceled { round: round_no });
                return RunResult::new(RunStatus::Canceled, round_no - 1, "canceled");
            }

            // Review: reviewer errors degrade to UNKNOWN, never abort.
            let review_memory = config
                .memory_context_for_stage("review")
                .map(str::to_string);
            let mut verdicts = Vec::with_capacity(config.reviewers.len());
            let mut review_outputs = Vec::with_capacity(config.reviewers.len());
            for reviewer in &config.reviewers {
                emit(Event::ReviewStarted {
                    round: round_no,
                    participant: reviewer.participant_id(),
                    timeout_seconds: timeouts.review.as_secs(),
                });
                let prompt = prompts::review_prompt(
                    &config,
                    reviewer,
                    round_no,
                    &implementation.output,
                    &environment,
                    strategy_hint.as_deref(),
                    review_memory.as_deref(),
                );
                let review = self
                    .invoke(
                        &config,
                        &mut cache_state,
                        sink,
                        "review",
                        round_no,
                        reviewer,
                        prompt,
                        timeouts.review,
                    )
                    .await;
                if let Some(reason) = review.runtime_error_reason() {
                    emit(Event::ReviewError {
                        round: round_no,
                        participant: reviewer.participant_id(),
                        reason: reason.clone(),
                    });
                    let synthetic = format!("[review_error] {reason}");
                    verdicts.push(awe_core::ReviewVerdict::Unknown);
                    review_outputs.push(synthetic.clone());
                    emit(Event::Review {
                        round: round_no,
                        participant: reviewer.participant_id(),
                        provider: None,
                        verdict: awe_core::ReviewVerdict::Unknown,
                        output: synthetic,
                        duration_seconds: review.duration_seconds,
                    });
                    continue;
                }
                verdicts.push(review.verdict);
                review_outputs.push(review.output.clone());
                emit(Event::Review {
                    round: round_no,
                    participant: reviewer.participant_id(),
                    provider: Some(reviewer.provider.clone()),
                    verdict: review.verdict,
                    output: review.output.clone(),
                    duration_seconds: review.duration_seconds,
                });
            }

            if should_cancel() {
                emit(Event::Canceled { round: round_no });
                return RunResult::new(RunStatus::Canceled, round_no - 1, "canceled");
            }

            // Verify: tests then lint.
            emit(Event::VerificationStarted {
                round: round_no,
                test_command: config.test_command.clone(),
                lint_command: config.lint_command.clone(),
                timeout_seconds: timeouts.command.as_secs(),
            });
            let test_result = self
                .commands
                .run(&config.test_command, &config.cwd, timeouts.command)
                .await;
            let lint_result = self
                .commands
                .run(&config.lint_command, &config.cwd, timeouts.command)
                .await;
            emit(Event::Verification {
                round: round_no,
                tests_ok: test_result.ok,
                lint_ok: lint_result.ok,
                test_stdout: clip_text(&test_result.stdout, VERIFICATION_STDOUT_MAX_CHARS),
                lint_stdout: clip_text(&lint_result.stdout, VERIFICATION_STDOUT_MAX_CHARS),
            });

            // Pre-completion checklist.
            let checklist = run_pre_completion_checklist(&ChecklistInput {
                test_command: &config.test_command,
                lint_command: &config.lint_command,
                implementation_output: &implementation.output,
                review_outputs: &review_outputs,
                test_result: &test_result,
                lint_result: &lint_result,
                cwd: &config.cwd,
            });
            emit(Event::PrecompletionChecklist {
                round: round_no,
                passed: checklist.passed,
                reason: checklist.reason.clone(),
                checks: checklist.checks,
                evidence_paths: checklist.evidence_paths.clone(),
            });

            if should_cancel() {
                emit(Event::Canceled { round: round_no });
                return RunResult::new(RunStatus::Canceled, round_no - 1, "canceled");
            }

            if !checklist.passed {
                tracing::warn!(round = round_no, reason = %checklist.reason, "precompletion_failed");
                emit(Event::GateFailed {
                    round: round_no,
                    reason: checklist.reason.clone(),
                    stage: Some("precompletion".to_string()),
                });
                let assessment = loop_tracker.assess(
                    &checklist.reason,
                    &implementation.output,
                    &review_outputs,
                    test_result.ok,
                    lint_result.ok,
                );
                if assessment.triggered {
                    if !assessment.hint.is_empty() {
                        strategy_hint = Some(assessment.hint.clone());
                    }
                    emit(Event::StrategyShifted {
                        round: round_no,
                        hint: strategy_hint.clone().unwrap_or_default(),
                        signals: assessment.signals.clone(),
                        shift_count: assessment.shift_count,
                    });
                }
                previous_gate_reason = Some(checklist.reason.clone());
                if let Some(terminal) = assessment.terminal_reason {
                    return RunResult::new(RunStatus::FailedGate, round_no, terminal);
                }
                if !deadline_mode && round_no >= config.max_rounds {
                    return RunResult::new(RunStatus::FailedGate, round_no, checklist.reason);
                }
                continue;
            }

            // Architecture audit (optional).
            let audit = run_architecture_audit(&config.cwd, config.evolution_level);
            emit(Event::ArchitectureAudit {
                round: round_no,
                enabled: audit.enabled,
                passed: audit.passed,
                mode: audit.mode.clone(),
                severity: if audit.mode == "hard" && !audit.passed {
                    "error".to_string()
                } else {
                    "warning".to_string()
                },
                reason: audit.reason.clone(),
                violations: audit.violations.clone(),
                scanned_files: audit.scanned_files,
            });
            if audit.enabled && audit.mode == "hard" && !audit.passed {
                tracing::warn!(round = round_no, reason = %audit.reason, "architecture_audit_failed");
                emit(Event::GateFailed {
                    round: round_no,
                    reason: audit.reason.clone(),
                    stage: Some("architecture_audit".to_string()),
                });
                let assessment = loop_tracker.assess(
                    &audit.reason,
                    &implementation.output,
                    &review_outputs,
                    test_result.ok,
                    lint_result.ok,
                );
                if assessment.triggered {
                    if !assessment.hint.is_empty() {
                        strategy_hint = Some(assessment.hint.clone());
                    }
                    emit(Event::StrategyShifted {
                        round: round_no,
                        hint: strategy_hint.clone().unwrap_or_default(),
                        signals: assessment.signals.clone(),
                        shift_count: assessment.shift_count,
                    });
                }
                previous_gate_reason = Some(audit.reason.clone());
                if let Some(terminal) = assessment.terminal_reason {
                    return RunResult::new(RunStatus::FailedGate, round_no, terminal);
                }
                if !deadline_mode && round_no >= config.max_rounds {
                    return RunResult::new(RunStatus::FailedGate, round_no, audit.reason);
                }
                continue;
            }

            // Gate evaluation.
            let gate = evaluate_medium_gate(test_result.ok, lint_result.ok, &verdicts);
            if gate.passed {
                tracing::info!(round = round_no, reason = %gate.reason, "gate_passed");
                emit(Event::GatePassed {
                    round: round_no,
                    reason: gate.reason.clone(),
                });
                return RunResult::new(RunStatus::Passed, round_no, gate.reason);
            }

            tracing::warn!(round = round_no, reason = %gate.reason, "gate_failed");
            emit(Event::GateFailed {
                round: round_no,
                reason: gate.reason.clone(),
                stage: None,
            });
            previous_gate_reason = Some(gate.reason.clone());
            let assessment = loop_tracker.assess(
                &gate.reason,
                &implementation.output,
                &review_outputs,
                test_result.ok,
                lint_result.ok,
            );
            if assessment.triggered {
                if !assessment.hint.is_empty() {
                    strategy_hint = Some(assessment.hint.clone());
                }
                emit(Event::StrategyShifted {
                    round: round_no,
                    hint: strategy_hint.clone().unwrap_or_default(),
                    signals: assessment.signals.clone(),
                    shift_count: assessment.shift_count,
                });
            }
            if let Some(terminal) = assessment.terminal_reason {
                return RunResult::new(RunStatus::FailedGate, round_no, terminal);
            }
            if !deadline_mode && round_no >= config.max_rounds {
                return RunResult::new(RunStatus::FailedGate, round_no, gate.reason);
            }
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
