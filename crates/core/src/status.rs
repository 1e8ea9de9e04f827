// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task status state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
///
/// `Passed`, `FailedSystem`, and `Canceled` are hard-terminal: no
/// operation may transition out of them. `FailedGate` is terminal for
/// the workflow but re-enters `Queued` via an explicit author decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    WaitingManual,
    Passed,
    FailedGate,
    FailedSystem,
    Canceled,
}

impl TaskStatus {
    /// States no operation may leave.
    pub fn is_hard_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Canceled)
    }

    /// States the workflow will not re-enter on its own.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Passed | Self::FailedGate | Self::FailedSystem | Self::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::WaitingManual => "waiting_manual",
            Self::Passed => "passed",
            Self::FailedGate => "failed_gate",
            Self::FailedSystem => "failed_system",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "waiting_manual" => Ok(Self::WaitingManual),
            "passed" => Ok(Self::Passed),
            "failed_gate" => Ok(Self::FailedGate),
            "failed_system" => Ok(Self::FailedSystem),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
