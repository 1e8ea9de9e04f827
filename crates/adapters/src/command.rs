// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Vetted test/lint command execution.
//!
//! Commands are tokenized shell-style but no shell is ever invoked;
//! metacharacters stay literal argv tokens. Only allowlisted prefixes
//! spawn at all.

use crate::runner::ParticipantRunner;
use crate::tokenize::split_command;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Command prefixes the executor will spawn. Everything else is
/// rejected with returncode 2 before any process starts.
const ALLOWED_COMMAND_PREFIXES: &[&[&str]] = &[
    &["cargo", "test"],
    &["cargo", "clippy"],
    &["cargo", "check"],
    &["cargo", "fmt"],
    &["py", "-m", "pytest"],
    &["py", "-m", "ruff"],
    &["python", "-m", "pytest"],
    &["python", "-m", "ruff"],
    &["python3", "-m", "pytest"],
    &["python3", "-m", "ruff"],
    &["pytest"],
    &["ruff"],
];

/// Result of one test/lint command run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub ok: bool,
    pub command: String,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    fn rejected(command: String, returncode: i32, stderr: String) -> Self {
        Self {
            ok: false,
            command,
            returncode,
            stdout: String::new(),
            stderr,
        }
    }
}

/// Seam the workflow engine runs verification commands through.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> CommandResult;
}

/// Production executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    fn normalize_command(command: &str) -> Result<Vec<String>, String> {
        let argv = split_command(command.trim()).map_err(|error| error.to_string())?;
        if argv.is_empty() {
            return Err("command is empty".to_string());
        }
        let lowered: Vec<String> = argv.iter().map(|part| part.to_ascii_lowercase()).collect();
        let allowed = ALLOWED_COMMAND_PREFIXES.iter().any(|prefix| {
            lowered.len() >= prefix.len()
                && lowered[..prefix.len()]
                    .iter()
                    .zip(prefix.iter())
                    .all(|(got, want)| got == want)
        });
        if !allowed {
            return Err(format!("command prefix is not allowed: {}", argv[0]));
        }
        Ok(argv)
    }
}

#[async_trait]
impl CommandRunner for CommandExecutor {
    async fn run(&self, command: &str, cwd: &Path, timeout: Duration) -> CommandResult {
        let display_command = command.trim().to_string();
        let argv = match Self::normalize_command(command) {
            Ok(argv) => argv,
            Err(reason) => {
                return CommandResult::rejected(display_command, 2, reason);
            }
        };
        let display_command = argv.join(" ");

        let mut child_command = tokio::process::Command::new(&argv[0]);
        child_command
            .args(&argv[1..])
            .current_dir(cwd)
            .env_clear()
            .envs(ParticipantRunner::build_child_env(cwd))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let started = std::time::Instant::now();
        let child = match child_command.spawn() {
            Ok(child) => child,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return CommandResult::rejected(
                    display_command,
                    127,
                    "command_not_found provider=shell".to_string(),
                );
            }
            Err(error) => {
                return CommandResult::rejected(
                    display_command,
                    126,
                    format!("command_failed provider=shell error={error}"),
                );
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let returncode = output.status.code().unwrap_or(-1);
                tracing::debug!(
                    command = %display_command,
                    ok = returncode == 0,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "shell_command"
                );
                CommandResult {
                    ok: returncode == 0,
                    command: display_command,
                    returncode,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
            Ok(Err(error)) => CommandResult::rejected(
                display_command,
                126,
                format!("command_failed provider=shell error={error}"),
            ),
            Err(_) => CommandResult::rejected(
                display_command,
                124,
                format!(
                    "command_timeout provider=shell timeout_seconds={}",
                    timeout.as_secs()
                ),
            ),
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
