// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task filesystem artifact tree.
//!
//! Layout under the artifact root:
//! `threads/<task_id>/{state.json, events.jsonl, discussion/*.md,
//! artifacts/*.json, final_report.txt}`. All writes stay inside the
//! task directory; task ids are validated before any path join.

use crate::repository::StorageError;
use awe_core::Event;
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Filesystem mirror of repository state plus the home of everything
/// that is a file by nature (discussions, patches, reports).
pub struct ArtifactStore {
    root: PathBuf,
}

fn is_valid_task_key(task_id: &str) -> bool {
    !task_id.is_empty()
        && task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn sanitize_name(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    out
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("threads"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, task_id: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_task_key(task_id) {
            return Err(StorageError::TaskNotFound(task_id.to_string()));
        }
        Ok(self.root.join("threads").join(task_id))
    }

    /// Create the per-task directory tree; idempotent.
    pub fn create_task_workspace(&self, task_id: &str) -> Result<PathBuf, StorageError> {
        let dir = self.task_dir(task_id)?;
        std::fs::create_dir_all(dir.join("discussion"))?;
        std::fs::create_dir_all(dir.join("artifacts"))?;
        Ok(dir)
    }

    /// Append one event object to the task's `events.jsonl` mirror.
    pub fn append_event(&self, task_id: &str, event: &Event) -> Result<(), StorageError> {
        let dir = self.create_task_workspace(task_id)?;
        let line = serde_json::to_string(event)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("events.jsonl"))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Read the mirrored events, used as a fallback when the repository
    /// does not know the task. Unreadable lines are skipped.
    pub fn read_events(&self, task_id: &str) -> Option<Vec<Value>> {
        let dir = self.task_dir(task_id).ok()?;
        let raw = std::fs::read(dir.join("events.jsonl")).ok()?;
        let text = String::from_utf8_lossy(&raw);
        let mut out = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Ok(value) = serde_json::from_str::<Value>(line) {
                out.push(value);
            }
        }
        Some(out)
    }

    /// Write (or overwrite) a named JSON artifact; returns its path.
    pub fn write_artifact_json(
        &self,
        task_id: &str,
        name: &str,
        payload: &Value,
    ) -> Result<PathBuf, StorageError> {
        let dir = self.create_task_workspace(task_id)?;
        let path = dir
            .join("artifacts")
            .join(format!("{}.json", sanitize_name(name)));
        let body = serde_json::to_string_pretty(payload)?;
        std::fs::write(&path, body)?;
        Ok(path)
    }

    pub fn read_artifact_json(&self, task_id: &str, name: &str) -> Option<Value> {
        let dir = self.task_dir(task_id).ok()?;
        let path = dir
            .join("artifacts")
            .join(format!("{}.json", sanitize_name(name)));
        let raw = std::fs::read(path).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Append a message to the role+round-scoped discussion markdown.
    pub fn append_discussion(
        &self,
        task_id: &str,
        role: &str,
        round: u32,
        content: &str,
    ) -> Result<(), StorageError> {
        let dir = self.create_task_workspace(task_id)?;
        let path = dir
            .join("discussion")
            .join(format!("round-{round:03}-{}.md", sanitize_name(role)));
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "## {role}\n\n{content}\n")?;
        Ok(())
    }

    /// Merge `patch` keys into `state.json` atomically (write temp,
    /// then rename). The repository stays authoritative for status;
    /// this mirror is eventually consistent.
    pub fn update_state(&self, task_id: &str, patch: &Value) -> Result<(), StorageError> {
        let dir = self.create_task_workspace(task_id)?;
        let path = dir.join("state.json");
        let mut state: Map<String, Value> = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => Map::new(),
        };
        if let Value::Object(fields) = patch {
            for (key, value) in fields {
                state.insert(key.clone(), value.clone());
            }
        }
        let body = serde_json::to_string_pretty(&Value::Object(state))?;
        let tmp = dir.join("state.json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn read_state(&self, task_id: &str) -> Option<Value> {
        let dir = self.task_dir(task_id).ok()?;
        let raw = std::fs::read(dir.join("state.json")).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    /// Write `final_report.txt` with the terminal `status=`/`reason=` lines.
    pub fn write_final_report(&self, task_id: &str, content: &str) -> Result<(), StorageError> {
        let dir = self.create_task_workspace(task_id)?;
        std::fs::write(dir.join("final_report.txt"), content)?;
        Ok(())
    }

    pub fn read_final_report(&self, task_id: &str) -> Option<String> {
        let dir = self.task_dir(task_id).ok()?;
        let raw = std::fs::read(dir.join("final_report.txt")).ok()?;
        Some(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Best-effort removal of the whole task subtree.
    pub fn remove_task_workspace(&self, task_id: &str) {
        if let Ok(dir) = self.task_dir(task_id) {
            if let Err(error) = std::fs::remove_dir_all(&dir) {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(task_id, %error, "artifact subtree removal failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "artifacts_tests.rs"]
mod tests;
