// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Participant identity (`provider#alias`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configured agent participant: the external CLI provider plus a
/// task-local alias, e.g. `codex#author-A`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub provider: String,
    pub alias: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParticipantError {
    #[error("participant id is empty")]
    Empty,
    #[error("participant id must be provider#alias, got {0:?}")]
    MissingSeparator(String),
    #[error("participant provider is empty")]
    EmptyProvider,
    #[error("participant alias is empty")]
    EmptyAlias,
    #[error("participant provider {0:?} contains invalid characters")]
    InvalidProvider(String),
}

impl Participant {
    pub fn new(provider: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            provider: provider.into().trim().to_ascii_lowercase(),
            alias: alias.into().trim().to_string(),
        }
    }

    /// Canonical `provider#alias` form.
    pub fn participant_id(&self) -> String {
        format!("{}#{}", self.provider, self.alias)
    }
}

impl std::fmt::Display for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.provider, self.alias)
    }
}

/// Parse a `provider#alias` participant id.
///
/// Provider keys are lowercased; provider shape is validated here while
/// provider *registration* is checked by the service against the
/// adapter registry.
pub fn parse_participant_id(raw: &str) -> Result<Participant, ParticipantError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ParticipantError::Empty);
    }
    let (provider, alias) = text
        .split_once('#')
        .ok_or_else(|| ParticipantError::MissingSeparator(text.to_string()))?;
    let provider = provider.trim().to_ascii_lowercase();
    let alias = alias.trim();
    if provider.is_empty() {
        return Err(ParticipantError::EmptyProvider);
    }
    if alias.is_empty() {
        return Err(ParticipantError::EmptyAlias);
    }
    if !provider
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ParticipantError::InvalidProvider(provider));
    }
    Ok(Participant {
        provider,
        alias: alias.to_string(),
    })
}

#[cfg(test)]
#[path = "participant_tests.rs"]
mod tests;
