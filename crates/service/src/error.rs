// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service-level error taxonomy.

use awe_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input validation failure pointing at the offending field
    /// (including indexed forms like `reviewer_participants[1]`).
    /// Messages never contain absolute filesystem paths.
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
        code: &'static str,
    },

    #[error("task not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
            code: "validation_error",
        }
    }

    pub fn validation_coded(
        message: impl Into<String>,
        field: impl Into<String>,
        code: &'static str,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
            code,
        }
    }

    /// The stable error code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::NotFound(_) => "task_not_found",
            Self::Storage(_) => "storage_error",
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
