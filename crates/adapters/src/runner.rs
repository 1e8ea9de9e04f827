// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Participant runner: supervises one agent CLI invocation.
//!
//! The total `timeout` is a budget shared across `timeout_retries + 1`
//! attempts. Each attempt gets `max(min_floor, remaining/attempts_left)`
//! of it; retries sleep a short jittered backoff that never eats into
//! the floor reserved for the next attempt. Stream pumping runs on two
//! reader tasks feeding a bounded channel.

use crate::base::ProviderAdapter;
use crate::control::{compat_enabled_from_env, parse_next_action, parse_verdict};
use crate::registry::{create_adapter, ProviderRegistry};
use async_trait::async_trait;
use awe_core::{NextAction, Participant, ReviewVerdict};
use rand::Rng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(50);
const RETRY_PROMPT_MAX_CHARS: usize = 1200;
const STREAM_CHANNEL_CAPACITY: usize = 256;

const LIMIT_PATTERNS: [&str; 9] = [
    "hit your limit",
    "usage limit",
    "rate limit",
    "ratelimitexceeded",
    "resource_exhausted",
    "model_capacity_exhausted",
    "no capacity available",
    "quota exceeded",
    "insufficient_quota",
];

/// Environment variables that would leak host test instrumentation
/// into task subprocesses.
const STRIPPED_ENV_VARS: [&str; 6] = [
    "COVERAGE_PROCESS_START",
    "COV_CORE_SOURCE",
    "COV_CORE_CONFIG",
    "COV_CORE_DATAFILE",
    "PYTEST_CURRENT_TEST",
    "PYTEST_ADDOPTS",
];

/// Callback invoked with `(stream_name, chunk)` for each output line.
pub type StreamCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Outcome of one agent invocation, runtime errors included.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterResult {
    pub output: String,
    pub verdict: ReviewVerdict,
    pub next_action: NextAction,
    pub returncode: i32,
    pub duration_seconds: f64,
}

impl AdapterResult {
    pub fn runtime_error(reason: impl Into<String>, duration: Duration) -> Self {
        let text = reason.into();
        let output = if text.trim().is_empty() {
            "adapter_runtime_error".to_string()
        } else {
            text.trim().to_string()
        };
        Self {
            output,
            verdict: ReviewVerdict::Unknown,
            next_action: NextAction::Stop,
            returncode: 2,
            duration_seconds: duration.as_secs_f64(),
        }
    }

    /// The runtime-error kind this result carries, if any.
    pub fn runtime_error_reason(&self) -> Option<String> {
        runtime_error_reason(&self.output, self.returncode)
    }
}

/// Map output markers and exit status to a stable runtime-error kind.
pub fn runtime_error_reason(output: &str, returncode: i32) -> Option<String> {
    let lowered = output.to_ascii_lowercase();
    for kind in [
        "provider_limit",
        "command_timeout",
        "command_not_found",
        "command_not_configured",
        "command_failed",
    ] {
        if lowered.contains(&format!("{kind} provider=")) {
            return Some(kind.to_string());
        }
    }
    if returncode != 0 {
        return Some("command_failed".to_string());
    }
    None
}

/// Everything one invocation needs.
#[derive(Clone)]
pub struct RunRequest {
    pub participant: Participant,
    pub prompt: String,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub model: Option<String>,
    pub model_params: Option<String>,
    pub claude_team_agents: bool,
    pub codex_multi_agents: bool,
    pub on_stream: Option<StreamCallback>,
}

impl RunRequest {
    pub fn new(participant: Participant, prompt: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            participant,
            prompt: prompt.into(),
            cwd: cwd.into(),
            timeout: Duration::from_secs(900),
            model: None,
            model_params: None,
            claude_team_agents: false,
            codex_multi_agents: false,
            on_stream: None,
        }
    }
}

/// Seam the workflow engine drives agents through.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, request: RunRequest) -> AdapterResult;
}

/// Production runner over the provider registry.
pub struct ParticipantRunner {
    registry: ProviderRegistry,
    dry_run: bool,
    timeout_retries: u32,
    legacy_control_compat: bool,
}

impl Default for ParticipantRunner {
    fn default() -> Self {
        Self::new(ProviderRegistry::from_env())
    }
}

impl ParticipantRunner {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            dry_run: false,
            timeout_retries: 1,
            legacy_control_compat: compat_enabled_from_env(),
        }
    }

    pub fn with_command_overrides(mut self, overrides: &BTreeMap<String, String>) -> Self {
        self.registry.apply_command_overrides(overrides);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_timeout_retries(mut self, retries: u32) -> Self {
        self.timeout_retries = retries;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn dry_run_result(participant: &Participant) -> AdapterResult {
        let output = format!(
            "[dry-run participant={}]\n\
             {{\"verdict\":\"NO_BLOCKER\",\"next_action\":\"pass\",\"issue\":\"n/a\",\"impact\":\"n/a\",\"next\":\"n/a\"}}\n\
             Evidence:\n\
             - src/lib.rs\n\
             - tests/specs.rs\n\
             Verification:\n\
             - cargo test -q\n\
             - cargo clippy -q",
            participant.participant_id()
        );
        AdapterResult {
            output,
            verdict: ReviewVerdict::NoBlocker,
            next_action: NextAction::Pass,
            returncode: 0,
            duration_seconds: 0.01,
        }
    }

    fn resolve_executable(argv: &mut [String]) {
        let Some(first) = argv.first() else { return };
        if first.is_empty() || first.contains(std::path::MAIN_SEPARATOR) {
            return;
        }
        let Some(paths) = std::env::var_os("PATH") else { return };
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join(first);
            if candidate.is_file() {
                argv[0] = candidate.to_string_lossy().into_owned();
                return;
            }
        }
    }

    fn format_command(argv: &[String]) -> String {
        argv.join(" ")
    }

    fn compute_attempt_timeout(remaining: Duration, attempts_left: u32) -> Duration {
        if remaining.is_zero() {
            return Duration::ZERO;
        }
        let floor = MIN_ATTEMPT_TIMEOUT.min(remaining);
        let share = remaining / attempts_left.max(1);
        share.max(floor).min(remaining)
    }

    fn retry_backoff(attempt: u32) -> Duration {
        let base = (0.15 * f64::from(attempt.max(1))).min(0.5);
        let jitter: f64 = rand::rng().random_range(0.0..0.1);
        Duration::from_secs_f64((base + jitter).min(0.75))
    }

    /// Sleep the retry backoff, capped so the next attempt keeps at
    /// least the minimum floor. Returns false when the budget is gone.
    async fn sleep_before_retry(attempt: u32, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        let floor = MIN_ATTEMPT_TIMEOUT.min(remaining);
        let pause_cap = remaining.saturating_sub(floor);
        if !pause_cap.is_zero() {
            let pause = Self::retry_backoff(attempt).min(pause_cap);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        !deadline.saturating_duration_since(Instant::now()).is_zero()
    }

    fn clip_prompt_for_retry(prompt: &str) -> String {
        let total = prompt.chars().count();
        if total <= RETRY_PROMPT_MAX_CHARS {
            return prompt.to_string();
        }
        let kept: String = prompt.chars().take(RETRY_PROMPT_MAX_CHARS).collect();
        let dropped = total - RETRY_PROMPT_MAX_CHARS;
        format!("{kept}\n\n[retry prompt clipped: {dropped} chars removed]")
    }

    fn is_provider_limit_output(output: &str) -> bool {
        let lowered = output.trim().to_ascii_lowercase();
        if lowered.is_empty() {
            return false;
        }
        LIMIT_PATTERNS.iter().any(|pattern| lowered.contains(pattern))
    }

    /// Child environment: inherited vars minus host test
    /// instrumentation, with the workspace `src` dir prepended to the
    /// module search path (duplicates and the host's own tree removed).
    pub(crate) fn build_child_env(cwd: &Path) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| !STRIPPED_ENV_VARS.contains(&key.as_str()))
            .collect();
        let workspace_src = cwd.join("src");
        if !workspace_src.is_dir() {
            return env;
        }
        let workspace_norm = normalize_path_text(&workspace_src.to_string_lossy());
        let existing = env
            .iter()
            .find(|(key, _)| key == "PYTHONPATH")
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        let mut ordered = vec![workspace_src.to_string_lossy().into_owned()];
        for item in std::env::split_paths(&existing) {
            let text = item.to_string_lossy().into_owned();
            if text.trim().is_empty() {
                continue;
            }
            let normalized = normalize_path_text(&text);
            if normalized == workspace_norm || normalized.ends_with("/awe-agentcheck/src") {
                continue;
            }
            ordered.push(text);
        }
        let joined = std::env::join_paths(ordered.iter().map(PathBuf::from))
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_else(|_| ordered.join(":"));
        env.retain(|(key, _)| key != "PYTHONPATH");
        env.push(("PYTHONPATH".to_string(), joined));
        env
    }
}

fn normalize_path_text(text: &str) -> String {
    text.replace('\\', "/").to_ascii_lowercase()
}

struct Completed {
    returncode: i32,
    stdout: String,
    stderr: String,
}

enum AttemptError {
    Timeout,
    NotFound,
    Io(std::io::Error),
}

async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    name: &'static str,
    tx: mpsc::Sender<(&'static str, String)>,
) -> String {
    let Some(reader) = reader else {
        return String::new();
    };
    let mut reader = BufReader::new(reader);
    let mut acc = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let chunk = String::from_utf8_lossy(&buf).into_owned();
                acc.push_str(&chunk);
                if tx.send((name, chunk)).await.is_err() {
                    // Receiver gone; keep accumulating for the result.
                }
            }
            Err(_) => break,
        }
    }
    acc
}

async fn run_attempt(
    argv: &[String],
    stdin_text: &str,
    cwd: &Path,
    env: &[(String, String)],
    attempt_timeout: Duration,
    on_stream: Option<StreamCallback>,
) -> Result<Completed, AttemptError> {
    let Some(program) = argv.first() else {
        return Err(AttemptError::NotFound);
    };
    let mut command = tokio::process::Command::new(program);
    command
        .args(&argv[1..])
        .current_dir(cwd)
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(if stdin_text.is_empty() {
            Stdio::null()
        } else {
            Stdio::piped()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|error| {
        if error.kind() == std::io::ErrorKind::NotFound {
            AttemptError::NotFound
        } else {
            AttemptError::Io(error)
        }
    })?;

    if !stdin_text.is_empty() {
        if let Some(mut stdin) = child.stdin.take() {
            let payload = stdin_text.to_string();
            tokio::spawn(async move {
                let _ = stdin.write_all(payload.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }
    }

    let (tx, mut rx) = mpsc::channel::<(&'static str, String)>(STREAM_CHANNEL_CAPACITY);
    let stdout_task = tokio::spawn(pump(child.stdout.take(), "stdout", tx.clone()));
    let stderr_task = tokio::spawn(pump(child.stderr.take(), "stderr", tx));
    let drain_task = tokio::spawn(async move {
        while let Some((name, chunk)) = rx.recv().await {
            if let Some(callback) = &on_stream {
                callback(name, &chunk);
            }
        }
    });

    let status = tokio::select! {
        status = child.wait() => status.map_err(AttemptError::Io)?,
        () = tokio::time::sleep(attempt_timeout) => {
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
            stdout_task.abort();
            stderr_task.abort();
            drain_task.abort();
            return Err(AttemptError::Timeout);
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    let _ = drain_task.await;
    Ok(Completed {
        returncode: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

#[async_trait]
impl AgentRunner for ParticipantRunner {
    async fn run(&self, request: RunRequest) -> AdapterResult {
        if self.dry_run {
            return Self::dry_run_result(&request.participant);
        }

        let provider = request.participant.provider.clone();
        let Some(spec) = self.registry.get(&provider).cloned() else {
            return AdapterResult::runtime_error(
                format!("command_not_configured provider={provider}"),
                Duration::ZERO,
            );
        };
        if spec.command.trim().is_empty() {
            return AdapterResult::runtime_error(
                format!("command_not_configured provider={provider}"),
                Duration::ZERO,
            );
        }

        let adapter = create_adapter(&provider, spec);
        let mut argv = adapter.build_argv(
            request.model.as_deref(),
            request.model_params.as_deref(),
            request.claude_team_agents,
            request.codex_multi_agents,
        );
        Self::resolve_executable(&mut argv);
        let effective_command = Self::format_command(&argv);

        let started = Instant::now();
        let budget = request.timeout.max(MIN_ATTEMPT_TIMEOUT);
        let deadline = started + budget;
        let attempts = self.timeout_retries + 1;
        let env = Self::build_child_env(&request.cwd);
        let mut current_prompt = request.prompt.clone();
        let mut completed: Option<Completed> = None;
        let mut attempts_made = 0u32;

        for attempt in 1..=attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let attempts_left = attempts - attempt + 1;
            let attempt_timeout = Self::compute_attempt_timeout(remaining, attempts_left);
            if attempt_timeout.is_zero() {
                break;
            }

            attempts_made += 1;
            let (runtime_argv, stdin_text) =
                adapter.prepare_runtime_invocation(&argv, &current_prompt);
            match run_attempt(
                &runtime_argv,
                &stdin_text,
                &request.cwd,
                &env,
                attempt_timeout,
                request.on_stream.clone(),
            )
            .await
            {
                Ok(done) => {
                    completed = Some(done);
                    break;
                }
                Err(AttemptError::NotFound) => {
                    return AdapterResult::runtime_error(
                        format!(
                            "command_not_found provider={provider} command={effective_command}"
                        ),
                        started.elapsed(),
                    );
                }
                Err(AttemptError::Io(error)) => {
                    tracing::warn!(%provider, %error, "agent process failed to run");
                    return AdapterResult::runtime_error(
                        format!("command_failed provider={provider} returncode=-1"),
                        started.elapsed(),
                    );
                }
                Err(AttemptError::Timeout) => {
                    tracing::warn!(%provider, attempt, "agent attempt timed out");
                    if attempt >= attempts {
                        break;
                    }
                    current_prompt = Self::clip_prompt_for_retry(&current_prompt);
                    if !Self::sleep_before_retry(attempt, deadline).await {
                        break;
                    }
                }
            }
        }

        let Some(done) = completed else {
            return AdapterResult::runtime_error(
                format!(
                    "command_timeout provider={provider} command={effective_command} \
                     timeout_seconds={} attempts={attempts} attempts_made={attempts_made}",
                    budget.as_secs()
                ),
                started.elapsed(),
            );
        };

        let elapsed = started.elapsed();
        let mut output = done.stdout.trim().to_string();
        if done.returncode != 0 {
            let stderr = done.stderr.trim();
            if !stderr.is_empty() {
                if output.is_empty() {
                    output = stderr.to_string();
                } else {
                    output = format!("{output}\n{stderr}");
                }
            }
        }

        if Self::is_provider_limit_output(&output) {
            return AdapterResult::runtime_error(
                format!("provider_limit provider={provider} command={effective_command}"),
                elapsed,
            );
        }
        if done.returncode != 0 {
            return AdapterResult::runtime_error(
                format!(
                    "command_failed provider={provider} command={effective_command} \
                     returncode={}",
                    done.returncode
                ),
                elapsed,
            );
        }

        let verdict = parse_verdict(&output, self.legacy_control_compat);
        let next_action = parse_next_action(&output, self.legacy_control_compat);
        AdapterResult {
            output: adapter.normalize_output(&output),
            verdict,
            next_action,
            returncode: done.returncode,
            duration_seconds: elapsed.as_secs_f64(),
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod stub {
    //! Scripted runner for tests: pops one step per invocation and
    //! records every request it saw.

    use super::{AdapterResult, AgentRunner, RunRequest};
    use crate::control::{parse_next_action, parse_verdict};
    use async_trait::async_trait;
    use awe_core::{NextAction, ReviewVerdict};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Debug, Clone)]
    pub struct StubStep {
        pub result: AdapterResult,
    }

    impl StubStep {
        /// Successful invocation; verdict/next_action parsed from the text.
        pub fn ok(output: impl Into<String>) -> Self {
            let output = output.into();
            Self {
                result: AdapterResult {
                    verdict: parse_verdict(&output, false),
                    next_action: parse_next_action(&output, false),
                    output,
                    returncode: 0,
                    duration_seconds: 0.01,
                },
            }
        }

        /// Runtime-error invocation, e.g. `provider_limit provider=codex`.
        pub fn runtime_error(reason: impl Into<String>) -> Self {
            Self {
                result: AdapterResult {
                    output: reason.into(),
                    verdict: ReviewVerdict::Unknown,
                    next_action: NextAction::Stop,
                    returncode: 2,
                    duration_seconds: 0.01,
                },
            }
        }
    }

    #[derive(Default)]
    pub struct StubRunner {
        steps: Mutex<VecDeque<StubStep>>,
        default_output: Mutex<String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl StubRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Result returned once the scripted steps run out.
        pub fn with_default_output(self, output: impl Into<String>) -> Self {
            *self.default_output.lock() = output.into();
            self
        }

        pub fn push(&self, step: StubStep) {
            self.steps.lock().push_back(step);
        }

        pub fn push_all(&self, steps: impl IntoIterator<Item = StubStep>) {
            self.steps.lock().extend(steps);
        }

        /// `(participant_id, prompt)` for every invocation so far.
        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl AgentRunner for StubRunner {
        async fn run(&self, request: RunRequest) -> AdapterResult {
            self.calls
                .lock()
                .push((request.participant.participant_id(), request.prompt.clone()));
            if let Some(step) = self.steps.lock().pop_front() {
                return step.result;
            }
            let fallback = self.default_output.lock().clone();
            if fallback.is_empty() {
                StubStep::ok("{\"verdict\":\"NO_BLOCKER\",\"next_action\":\"pass\"}").result
            } else {
                StubStep::ok(fallback).result
            }
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
