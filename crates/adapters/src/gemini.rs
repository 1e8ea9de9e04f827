// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Gemini-family CLI adapter.

use crate::base::{normalize_approval_flags, ProviderAdapter, ProviderSpec};

pub struct GeminiAdapter {
    spec: ProviderSpec,
}

impl GeminiAdapter {
    pub fn new(spec: ProviderSpec) -> Self {
        Self { spec }
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    fn extend_argv(
        &self,
        argv: Vec<String>,
        _claude_team_agents: bool,
        _codex_multi_agents: bool,
    ) -> Vec<String> {
        // Model params may re-introduce an approval flag the base
        // command already carries; keep only the first.
        normalize_approval_flags(argv)
    }
}

#[cfg(test)]
#[path = "gemini_tests.rs"]
mod tests;
