// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! awe-adapters: everything that talks to an external process.
//!
//! Provider adapters shape the argv and normalize output for each
//! known agent CLI; the [`ParticipantRunner`] supervises the child
//! process (streaming, timeout budget, retries, provider-limit
//! detection); the [`CommandExecutor`] runs vetted test/lint commands.

mod base;
mod claude;
mod codex;
mod command;
mod control;
mod gemini;
mod generic;
mod registry;
mod runner;
mod tokenize;

pub use base::{
    has_agents_flag, has_model_flag, has_multi_agent_config_token, has_prompt_flag,
    normalize_approval_flags, split_extra_args, AdapterCapabilities, ProviderAdapter,
    ProviderSpec,
};
pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use command::{CommandExecutor, CommandResult, CommandRunner};
pub use control::{
    extract_control_object, parse_next_action, parse_verdict, CONTROL_SCHEMA_COMPAT_ENV,
};
pub use gemini::GeminiAdapter;
pub use generic::GenericAdapter;
pub use registry::{create_adapter, ProviderRegistry, PROVIDER_ADAPTERS_ENV};
pub use runner::{
    runtime_error_reason, AdapterResult, AgentRunner, ParticipantRunner, RunRequest,
    StreamCallback,
};
pub use tokenize::{split_command, TokenizeError};

#[cfg(any(test, feature = "test-support"))]
pub use runner::stub::{StubRunner, StubStep};
