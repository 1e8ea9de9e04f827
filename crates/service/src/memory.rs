// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lightweight task memory: outcome records persisted after terminal
//! transitions, recalled by keyword overlap to seed stage prompts.

use awe_core::{MemoryMode, Task, TaskStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::PathBuf;

const MEMORY_FILE: &str = "records.jsonl";
const MAX_RECALL_SCAN: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub memory_id: String,
    pub task_id: String,
    pub title: String,
    pub status: String,
    pub reason: Option<String>,
    pub keywords: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MemoryHit {
    pub record: MemoryRecord,
    pub score: f64,
}

/// Per-stage recall output.
#[derive(Debug, Default, Clone)]
pub struct StageContextPack {
    pub contexts: BTreeMap<String, String>,
    pub hits: BTreeMap<String, Vec<MemoryHit>>,
}

pub struct MemoryService {
    root: PathBuf,
}

fn keywords_of(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .map(str::to_ascii_lowercase)
        .filter(|word| word.len() >= 4)
        .collect()
}

impl MemoryService {
    pub fn new(artifact_root: impl Into<PathBuf>) -> Self {
        Self {
            root: artifact_root.into().join("memory"),
        }
    }

    fn records_path(&self) -> PathBuf {
        self.root.join(MEMORY_FILE)
    }

    fn load_records(&self) -> Vec<MemoryRecord> {
        let Ok(raw) = std::fs::read(self.records_path()) else {
            return Vec::new();
        };
        let text = String::from_utf8_lossy(&raw);
        let mut records: Vec<MemoryRecord> = text
            .lines()
            .filter_map(|line| serde_json::from_str(line.trim()).ok())
            .collect();
        if records.len() > MAX_RECALL_SCAN {
            records.drain(..records.len() - MAX_RECALL_SCAN);
        }
        records
    }

    /// Persist a terminal outcome; returns the stored record.
    pub fn persist_outcome(
        &self,
        task: &Task,
        status: TaskStatus,
        reason: &str,
    ) -> std::io::Result<MemoryRecord> {
        std::fs::create_dir_all(&self.root)?;
        let record = MemoryRecord {
            memory_id: format!("mem-{}", task.task_id.suffix()),
            task_id: task.task_id.as_str().to_string(),
            title: task.title.clone(),
            status: status.to_string(),
            reason: (!reason.trim().is_empty()).then(|| reason.trim().to_string()),
            keywords: keywords_of(&format!("{} {}", task.title, task.description))
                .into_iter()
                .take(24)
                .collect(),
            created_at: Utc::now().to_rfc3339(),
        };
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.records_path())?;
        writeln!(file, "{}", serde_json::to_string(&record)?)?;
        Ok(record)
    }

    /// Recall context for the given stages. Basic mode degrades to
    /// empty on any problem; strict mode behaves the same here because
    /// recall itself never guesses — it only reads local records.
    pub fn build_stage_context(
        &self,
        task: &Task,
        memory_mode: MemoryMode,
        stages: &[&str],
        limit_per_stage: usize,
    ) -> StageContextPack {
        if memory_mode == MemoryMode::Off {
            return StageContextPack::default();
        }
        let query = keywords_of(&format!(
            "{} {} {}",
            task.title,
            task.description,
            task.last_gate_reason.clone().unwrap_or_default()
        ));
        if query.is_empty() {
            return StageContextPack::default();
        }

        let mut scored: Vec<MemoryHit> = self
            .load_records()
            .into_iter()
            .filter(|record| record.task_id != task.task_id.as_str())
            .filter_map(|record| {
                let overlap = record
                    .keywords
                    .iter()
                    .filter(|word| query.contains(*word))
                    .count();
                if overlap == 0 {
                    return None;
                }
                let score = overlap as f64 / record.keywords.len().max(1) as f64;
                Some(MemoryHit { record, score })
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit_per_stage.max(1));

        if scored.is_empty() {
            return StageContextPack::default();
        }
        let context_text = scored
            .iter()
            .map(|hit| {
                format!(
                    "- earlier task {} ({}) ended {}{}",
                    hit.record.task_id,
                    hit.record.title,
                    hit.record.status,
                    hit.record
                        .reason
                        .as_deref()
                        .map(|reason| format!(": {reason}"))
                        .unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut pack = StageContextPack::default();
        for stage in stages {
            pack.contexts.insert((*stage).to_string(), context_text.clone());
            pack.hits.insert((*stage).to_string(), scored.clone());
        }
        pack
    }

    /// Record the task's conversational preferences so later recall
    /// can bias toward the operator's habits.
    pub fn persist_preferences(&self, task: &Task) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let record = json!({
            "task_id": task.task_id.as_str(),
            "repair_mode": task.repair_mode.to_string(),
            "memory_mode": task.memory_mode.to_string(),
            "conversation_language": task.conversation_language.to_string(),
            "debate_mode": task.debate_mode,
            "created_at": Utc::now().to_rfc3339(),
        });
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join("preferences.jsonl"))?;
        writeln!(file, "{record}")?;
        Ok(())
    }

    /// JSON summary of a hit list for event payloads.
    pub fn hits_payload(hits: &[MemoryHit]) -> serde_json::Value {
        json!(hits
            .iter()
            .map(|hit| {
                json!({
                    "memory_id": hit.record.memory_id,
                    "title": hit.record.title,
                    "status": hit.record.status,
                    "score": hit.score,
                    "source_task_id": hit.record.task_id,
                })
            })
            .collect::<Vec<_>>())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
