// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider registry: built-in adapters plus user-registered entries.

use crate::base::{AdapterCapabilities, ProviderAdapter, ProviderSpec};
use crate::claude::ClaudeAdapter;
use crate::codex::CodexAdapter;
use crate::gemini::GeminiAdapter;
use crate::generic::GenericAdapter;
use std::collections::BTreeMap;

/// Env var holding a JSON object of extra provider specs:
/// `{"mycli": {"command": "mycli run", "model_flag": "-m"}}`.
pub const PROVIDER_ADAPTERS_ENV: &str = "AWE_PROVIDER_ADAPTERS_JSON";

fn builtin_specs() -> BTreeMap<String, ProviderSpec> {
    let mut out = BTreeMap::new();
    out.insert(
        "claude".to_string(),
        ProviderSpec {
            command: "claude -p --output-format text --dangerously-skip-permissions".to_string(),
            model_flag: "--model".to_string(),
            prompt_flag: String::new(),
            capabilities: AdapterCapabilities {
                claude_team_agents: true,
                codex_multi_agents: false,
            },
        },
    );
    out.insert(
        "codex".to_string(),
        ProviderSpec {
            command: "codex exec --skip-git-repo-check".to_string(),
            model_flag: "-m".to_string(),
            prompt_flag: String::new(),
            capabilities: AdapterCapabilities {
                claude_team_agents: false,
                codex_multi_agents: true,
            },
        },
    );
    out.insert(
        "gemini".to_string(),
        ProviderSpec {
            command: "gemini --approval-mode yolo".to_string(),
            model_flag: "-m".to_string(),
            prompt_flag: "-p".to_string(),
            capabilities: AdapterCapabilities::default(),
        },
    );
    out
}

/// Registered providers: the fixed built-in table extended by the
/// `AWE_PROVIDER_ADAPTERS_JSON` env var and runtime command overrides.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    specs: BTreeMap<String, ProviderSpec>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ProviderRegistry {
    /// Built-ins only, no environment consultation.
    pub fn builtin() -> Self {
        Self {
            specs: builtin_specs(),
        }
    }

    /// Built-ins merged with `AWE_PROVIDER_ADAPTERS_JSON`.
    pub fn from_env() -> Self {
        let mut registry = Self::builtin();
        if let Ok(raw) = std::env::var(PROVIDER_ADAPTERS_ENV) {
            registry.merge_json(&raw);
        }
        registry
    }

    fn merge_json(&mut self, raw: &str) {
        let parsed: BTreeMap<String, ProviderSpec> = match serde_json::from_str(raw) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(%error, "ignoring unparseable {PROVIDER_ADAPTERS_ENV}");
                return;
            }
        };
        for (key, mut spec) in parsed {
            let provider = key.trim().to_ascii_lowercase();
            if provider.is_empty() || spec.command.trim().is_empty() {
                continue;
            }
            if spec.model_flag.trim().is_empty() {
                spec.model_flag = "-m".to_string();
            }
            self.specs.insert(provider, spec);
        }
    }

    /// Replace base commands for existing providers, or register new
    /// providers with default settings.
    pub fn apply_command_overrides(&mut self, overrides: &BTreeMap<String, String>) {
        for (raw_provider, raw_command) in overrides {
            let provider = raw_provider.trim().to_ascii_lowercase();
            let command = raw_command.trim();
            if provider.is_empty() || command.is_empty() {
                continue;
            }
            let spec = self.specs.entry(provider).or_insert_with(|| ProviderSpec {
                model_flag: "-m".to_string(),
                ..ProviderSpec::default()
            });
            spec.command = command.to_string();
        }
    }

    pub fn get(&self, provider: &str) -> Option<&ProviderSpec> {
        self.specs.get(&provider.trim().to_ascii_lowercase())
    }

    pub fn supported_providers(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    pub fn is_supported(&self, provider: &str) -> bool {
        self.get(provider).is_some()
    }
}

/// Select the adapter family for a provider key.
pub fn create_adapter(provider: &str, spec: ProviderSpec) -> Box<dyn ProviderAdapter> {
    match provider.trim().to_ascii_lowercase().as_str() {
        "claude" => Box::new(ClaudeAdapter::new(spec)),
        "codex" => Box::new(CodexAdapter::new(spec)),
        "gemini" => Box::new(GeminiAdapter::new(spec)),
        _ => Box::new(GenericAdapter::new(spec)),
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
