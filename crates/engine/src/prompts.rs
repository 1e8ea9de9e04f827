// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt assembly for every stage.
//!
//! Each prompt is a static instruction block followed by a `Context:`
//! marker and the volatile material (round, previous reasons, memory,
//! task description). The prompt-cache probe keys on everything before
//! the marker, so round-varying content must stay below it.

use crate::config::RunConfig;
use awe_core::{ConversationLanguage, Participant, RepairMode, ReviewerIssue};

/// Stable description of the workspace and verification commands.
pub fn environment_context(config: &RunConfig) -> String {
    format!(
        "Environment:\n- workspace: {}\n- test command: {}\n- lint command: {}",
        config.cwd.display(),
        config.test_command,
        config.lint_command
    )
}

pub fn language_instruction(language: ConversationLanguage) -> &'static str {
    match language {
        ConversationLanguage::En => "Respond in English.",
        ConversationLanguage::Zh => "Respond in Chinese (中文).",
    }
}

pub fn repair_guidance(mode: RepairMode) -> &'static str {
    match mode {
        RepairMode::Minimal => {
            "Repair policy: minimal. Touch as few files as possible; fix only what is broken \
             and avoid any restructuring."
        }
        RepairMode::Balanced => {
            "Repair policy: balanced. Prefer small focused changes, but refactor locally when \
             it makes the fix simpler to verify."
        }
        RepairMode::Structural => {
            "Repair policy: structural. Restructuring is allowed when it removes the root \
             cause; keep behavior covered by tests while you move code."
        }
    }
}

pub fn plain_mode_instruction(enabled: bool) -> &'static str {
    if enabled {
        "Write plain text. No markdown tables, no headings, no decorative formatting."
    } else {
        ""
    }
}

/// The structured control-output contract every agent answer must follow.
pub fn control_schema_instruction() -> &'static str {
    "End your answer with exactly one JSON object on its own line:\n\
     {\"verdict\":\"NO_BLOCKER|BLOCKER|UNKNOWN\",\"next_action\":\"pass|retry|stop\",\
     \"issue\":\"...\",\"impact\":\"...\",\"next\":\"...\"}\n\
     List the repo-relative paths of every file you touched or inspected as evidence."
}

/// Review depth scales with the evolution level.
pub fn review_checklist_guidance(evolution_level: u8) -> &'static str {
    match evolution_level {
        0 => "Check: does the change do what the task asks, and do tests cover it?",
        1 => {
            "Check correctness, test coverage, and that no unrelated files were touched. \
             Flag missing edge cases."
        }
        2 => {
            "Check correctness, tests, error handling, and interface contracts. Flag \
             anything that would regress under concurrent use."
        }
        _ => {
            "Full audit: correctness, tests, error handling, concurrency, performance \
             characteristics, and structural debt. Flag everything that blocks a merge."
        }
    }
}

fn memory_block(memory_context: Option<&str>) -> String {
    match memory_context {
        Some(text) if !text.trim().is_empty() => {
            format!("Recalled context from earlier tasks:\n{}\n\n", text.trim())
        }
        _ => String::new(),
    }
}

fn strategy_block(strategy_hint: Option<&str>) -> String {
    match strategy_hint {
        Some(hint) if !hint.trim().is_empty() => {
            format!("Strategy adjustment: {}\n", hint.trim())
        }
        _ => String::new(),
    }
}

/// Author discussion prompt for a fresh round.
pub fn discussion_prompt(
    config: &RunConfig,
    round: u32,
    previous_gate_reason: Option<&str>,
    environment: &str,
    strategy_hint: Option<&str>,
    memory_context: Option<&str>,
) -> String {
    let mut volatile = format!("Round {round} of {}.\n", config.max_rounds);
    if let Some(reason) = previous_gate_reason.filter(|reason| !reason.is_empty()) {
        volatile.push_str(&format!("Previous gate failure reason: {reason}\n"));
    }
    volatile.push_str(&strategy_block(strategy_hint));
    volatile.push_str(&memory_block(memory_context));
    format!(
        "You are {author}, the author for task {task_id}: {title}\n\
         {language}\n{repair}\n{plain}\n\
         Lay out the concrete plan for this round: which files change, which tests prove \
         the change, and what could go wrong.\n\
         {schema}\n\
         {environment}\n\
         \nContext:\n{volatile}\nTask description:\n{description}",
        author = config.author.participant_id(),
        task_id = config.task_id,
        title = config.title,
        language = language_instruction(config.conversation_language),
        repair = repair_guidance(config.repair_mode),
        plain = plain_mode_instruction(config.plain_mode),
        schema = control_schema_instruction(),
        environment = environment,
        volatile = volatile.trim_end(),
        description = config.description
    )
}

/// Author discussion prompt when a debate precheck already produced
/// reviewer input.
pub fn discussion_after_reviewer_prompt(
    config: &RunConfig,
    round: u32,
    reviewer_context: &str,
    environment: &str,
    strategy_hint: Option<&str>,
    memory_context: Option<&str>,
) -> String {
    let mut volatile = format!("Round {round} of {}.\n", config.max_rounds);
    volatile.push_str(&strategy_block(strategy_hint));
    volatile.push_str(&memory_block(memory_context));
    format!(
        "You are {author}, the author for task {task_id}: {title}\n\
         {language}\n{repair}\n{plain}\n\
         Reviewers spoke first this round. Address their concerns in your plan before \
         anything else, then state which files change and which tests prove the change.\n\
         {schema}\n\
         {environment}\n\
         \nContext:\n{volatile}\nReviewer input:\n{reviewer_context}\n\nTask description:\n{description}",
        author = config.author.participant_id(),
        task_id = config.task_id,
        title = config.title,
        language = language_instruction(config.conversation_language),
        repair = repair_guidance(config.repair_mode),
        plain = plain_mode_instruction(config.plain_mode),
        schema = control_schema_instruction(),
        environment = environment,
        volatile = volatile.trim_end(),
        reviewer_context = reviewer_context,
        description = config.description
    )
}

/// Author implementation prompt.
pub fn implementation_prompt(
    config: &RunConfig,
    round: u32,
    discussion_output: &str,
    environment: &str,
    strategy_hint: Option<&str>,
    memory_context: Option<&str>,
) -> String {
    let mut volatile = format!("Round {round} of {}.\n", config.max_rounds);
    volatile.push_str(&strategy_block(strategy_hint));
    volatile.push_str(&memory_block(memory_context));
    format!(
        "You are {author}, the author for task {task_id}: {title}\n\
         {language}\n{repair}\n{plain}\n\
         Implement the agreed plan now. Edit files in the workspace directly, run the \
         verification commands, and report every file you changed with its repo-relative \
         path.\n\
         {schema}\n\
         {environment}\n\
         \nContext:\n{volatile}\nAgreed plan:\n{discussion}\n\nTask description:\n{description}",
        author = config.author.participant_id(),
        task_id = config.task_id,
        title = config.title,
        language = language_instruction(config.conversation_language),
        repair = repair_guidance(config.repair_mode),
        plain = plain_mode_instruction(config.plain_mode),
        schema = control_schema_instruction(),
        environment = environment,
        volatile = volatile.trim_end(),
        discussion = discussion_output,
        description = config.description
    )
}

/// Reviewer prompt over the author's implementation report.
pub fn review_prompt(
    config: &RunConfig,
    reviewer: &Participant,
    round: u32,
    implementation_output: &str,
    environment: &str,
    strategy_hint: Option<&str>,
    memory_context: Option<&str>,
) -> String {
    let mut volatile = format!("Round {round} of {}.\n", config.max_rounds);
    volatile.push_str(&strategy_block(strategy_hint));
    volatile.push_str(&memory_block(memory_context));
    format!(
        "You are {reviewer}, a reviewer for task {task_id}: {title}\n\
         {language}\n{plain}\n\
         {checklist}\n\
         Inspect the workspace yourself; do not trust the report blindly. Cite \
         repo-relative paths for every finding.\n\
         {schema}\n\
         {environment}\n\
         \nContext:\n{volatile}\nImplementation report:\n{implementation}",
        reviewer = reviewer.participant_id(),
        task_id = config.task_id,
        title = config.title,
        language = language_instruction(config.conversation_language),
        plain = plain_mode_instruction(config.plain_mode),
        checklist = review_checklist_guidance(config.evolution_level),
        schema = control_schema_instruction(),
        environment = environment,
        volatile = volatile.trim_end(),
        implementation = implementation_output
    )
}

/// Reviewer-first debate prompt over the current round seed.
pub fn debate_review_prompt(
    config: &RunConfig,
    reviewer: &Participant,
    round: u32,
    seed_context: &str,
    environment: &str,
    strategy_hint: Option<&str>,
    memory_context: Option<&str>,
) -> String {
    let mut volatile = format!("Round {round} of {}.\n", config.max_rounds);
    volatile.push_str(&strategy_block(strategy_hint));
    volatile.push_str(&memory_block(memory_context));
    format!(
        "You are {reviewer}, a reviewer for task {task_id}: {title}\n\
         {language}\n{plain}\n\
         The author has not written a plan yet. State the risks, constraints, and \
         non-negotiable requirements the plan must satisfy, grounded in the actual \
         workspace files.\n\
         {schema}\n\
         {environment}\n\
         \nContext:\n{volatile}\nCurrent task state:\n{seed}",
        reviewer = reviewer.participant_id(),
        task_id = config.task_id,
        title = config.title,
        language = language_instruction(config.conversation_language),
        plain = plain_mode_instruction(config.plain_mode),
        schema = control_schema_instruction(),
        environment = environment,
        volatile = volatile.trim_end(),
        seed = seed_context
    )
}

/// Append one usable debate contribution to the rolling context.
pub fn append_debate_line(base: &str, speaker: &str, text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return base.to_string();
    }
    if base.trim().is_empty() {
        format!("[{speaker}]\n{trimmed}")
    } else {
        format!("{base}\n\n[{speaker}]\n{trimmed}")
    }
}

/// Reviewer prompt for proposal consensus (precheck and proposal
/// review share the shape; `stage` names which pass this is).
pub fn proposal_review_prompt(
    config: &RunConfig,
    stage: &str,
    source_text: &str,
    environment: &str,
    memory_context: Option<&str>,
) -> String {
    format!(
        "You are a reviewer in the proposal-consensus stage ({stage}) for task {task_id}: {title}\n\
         {language}\n{plain}\n\
         If your verdict is BLOCKER or UNKNOWN you MUST list structured issues:\n\
         {{\"issues\":[{{\"issue_id\":\"ISSUE-001\",\"summary\":\"...\",\"severity\":\"blocker\",\
         \"required_action\":\"...\",\"evidence_paths\":[\"src/x.rs\"]}}]}}\n\
         A BLOCKER without issues is a contract violation and will be bounced back to you.\n\
         {schema}\n\
         {environment}\n\
         \nContext:\n{memory}Proposal under review:\n{source}",
        stage = stage,
        task_id = config.task_id,
        title = config.title,
        language = language_instruction(config.conversation_language),
        plain = plain_mode_instruction(config.plain_mode),
        schema = control_schema_instruction(),
        environment = environment,
        memory = memory_block(memory_context),
        source = source_text
    )
}

/// Author prompt for the proposal round, carrying reviewer prechecks
/// and the issue-response contract.
pub fn proposal_author_prompt(
    config: &RunConfig,
    merged_context: &str,
    precheck_issues: &[ReviewerIssue],
    environment: &str,
    memory_context: Option<&str>,
) -> String {
    let mut issue_lines = String::new();
    for issue in precheck_issues {
        issue_lines.push_str(&format!(
            "- {} [{}] {}\n",
            issue.issue_id, issue.severity, issue.summary
        ));
    }
    if issue_lines.is_empty() {
        issue_lines.push_str("(none)\n");
    }
    format!(
        "You are {author}, the author, drafting the proposal for task {task_id}: {title}\n\
         {language}\n{repair}\n{plain}\n\
         Answer every required issue with an issue_responses entry:\n\
         {{\"issue_responses\":[{{\"issue_id\":\"ISSUE-001\",\"status\":\"accept|reject|defer\",\
         \"reason\":\"...\",\"alternative_plan\":\"...\",\"validation_commands\":[\"cargo test\"],\
         \"evidence_paths\":[\"src/x.rs\"]}}]}}\n\
         A reject without reason, alternative_plan, validation_commands, and evidence_paths \
         is invalid and will be bounced back.\n\
         {schema}\n\
         {environment}\n\
         \nContext:\n{memory}Required issues:\n{issues}\nReviewer feedback so far:\n{merged}\n\n\
         Task description:\n{description}",
        author = config.author.participant_id(),
        task_id = config.task_id,
        title = config.title,
        language = language_instruction(config.conversation_language),
        repair = repair_guidance(config.repair_mode),
        plain = plain_mode_instruction(config.plain_mode),
        schema = control_schema_instruction(),
        environment = environment,
        memory = memory_block(memory_context),
        issues = issue_lines,
        merged = merged_context,
        description = config.description
    )
}

/// Fold one reviewer's feedback into the rolling proposal seed.
pub fn append_proposal_feedback_context(base: &str, reviewer_id: &str, review_text: &str) -> String {
    let trimmed = review_text.trim();
    if trimmed.is_empty() {
        return base.to_string();
    }
    if base.trim().is_empty() {
        format!("[{reviewer_id}]\n{trimmed}")
    } else {
        format!("{base}\n\n[{reviewer_id}]\n{trimmed}")
    }
}

#[cfg(test)]
#[path = "prompts_tests.rs"]
mod tests;
