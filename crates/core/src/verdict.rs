// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reviewer verdicts and agent control directives.

use serde::{Deserialize, Serialize};

/// Verdict a reviewer returns about a proposal or implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    NoBlocker,
    Blocker,
    Unknown,
}

impl ReviewVerdict {
    /// Map the wire form (`NO_BLOCKER` / `BLOCKER` / `UNKNOWN`, any case)
    /// to a verdict. Anything unrecognized is `Unknown`.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NO_BLOCKER" | "NO-BLOCKER" | "NOBLOCKER" => Self::NoBlocker,
            "BLOCKER" => Self::Blocker,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoBlocker => "no_blocker",
            Self::Blocker => "blocker",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the agent asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    Pass,
    Retry,
    Stop,
}

impl NextAction {
    /// Map the wire form to an action; unrecognized input is `Pass`.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "retry" => Self::Retry,
            "stop" => Self::Stop,
            _ => Self::Pass,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Retry => "retry",
            Self::Stop => "stop",
        }
    }
}

impl std::fmt::Display for NextAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "verdict_tests.rs"]
mod tests;
