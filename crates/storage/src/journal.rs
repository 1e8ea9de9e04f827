// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Journal-backed repository: WAL-style JSONL plus a zstd snapshot.
//!
//! Every mutation applies to the in-memory state under the lock and is
//! then appended to `journal.jsonl` before the call returns. Startup
//! loads `state.snapshot.zst` (if present) and replays the journal on
//! top. `compact` folds the journal into a fresh snapshot.

use crate::repository::{event_parts, StorageError, TaskRepository};
use awe_core::{Clock, Event, SystemClock, Task, TaskCreateRecord, TaskEvent, TaskId, TaskStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const JOURNAL_FILE: &str = "journal.jsonl";
const SNAPSHOT_FILE: &str = "state.snapshot.zst";
const SNAPSHOT_ZSTD_LEVEL: i32 = 3;
const APPEND_RETRY_ATTEMPTS: u32 = 8;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    TaskUpserted { task: Task },
    EventAppended { event: TaskEvent },
    TasksDeleted { task_ids: Vec<String> },
}

#[derive(Default, Serialize, Deserialize)]
struct SnapshotState {
    tasks: Vec<Task>,
    events: Vec<TaskEvent>,
}

struct Inner {
    tasks: HashMap<String, Task>,
    events: HashMap<String, Vec<TaskEvent>>,
    journal: File,
}

impl Inner {
    fn apply(&mut self, record: &JournalRecord) {
        match record {
            JournalRecord::TaskUpserted { task } => {
                let key = task.task_id.as_str().to_string();
                self.events.entry(key.clone()).or_default();
                self.tasks.insert(key, task.clone());
            }
            JournalRecord::EventAppended { event } => {
                let rows = self
                    .events
                    .entry(event.task_id.as_str().to_string())
                    .or_default();
                // Replay idempotency: skip records at or below the tip.
                if rows.last().map(|row| row.seq).unwrap_or(0) < event.seq {
                    rows.push(event.clone());
                }
            }
            JournalRecord::TasksDeleted { task_ids } => {
                for task_id in task_ids {
                    self.tasks.remove(task_id);
                    self.events.remove(task_id);
                }
            }
        }
    }
}

/// Repository persisted as an append-only journal under `root`.
pub struct JournalRepository {
    root: PathBuf,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl JournalRepository {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let mut tasks = HashMap::new();
        let mut events: HashMap<String, Vec<TaskEvent>> = HashMap::new();

        let snapshot_path = root.join(SNAPSHOT_FILE);
        if snapshot_path.is_file() {
            let file = File::open(&snapshot_path)?;
            let decoded = zstd::decode_all(BufReader::new(file))?;
            let snapshot: SnapshotState = serde_json::from_slice(&decoded)?;
            for task in snapshot.tasks {
                events.entry(task.task_id.as_str().to_string()).or_default();
                tasks.insert(task.task_id.as_str().to_string(), task);
            }
            for event in snapshot.events {
                events
                    .entry(event.task_id.as_str().to_string())
                    .or_default()
                    .push(event);
            }
            for rows in events.values_mut() {
                rows.sort_by_key(|row| row.seq);
            }
        }

        let journal_path = root.join(JOURNAL_FILE);
        let journal = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&journal_path)?;
        let mut inner = Inner {
            tasks,
            events,
            journal,
        };

        let reader = BufReader::new(File::open(&journal_path)?);
        for line in reader.lines() {
            let line = line?;
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(text) {
                Ok(record) => inner.apply(&record),
                Err(error) => {
                    // A torn tail write is expected after a crash; skip it.
                    tracing::warn!(%error, "skipping unreadable journal record");
                }
            }
        }

        Ok(Self {
            root,
            inner: Mutex::new(inner),
            clock: Arc::new(SystemClock),
        })
    }

    /// Swap the wall clock; row timestamps come from it.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fold the journal into a fresh snapshot and truncate it.
    pub fn compact(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let snapshot = SnapshotState {
            tasks: inner.tasks.values().cloned().collect(),
            events: inner.events.values().flatten().cloned().collect(),
        };
        let encoded = serde_json::to_vec(&snapshot)?;
        let compressed = zstd::encode_all(&encoded[..], SNAPSHOT_ZSTD_LEVEL)?;
        let tmp_path = self.root.join(format!("{SNAPSHOT_FILE}.tmp"));
        std::fs::write(&tmp_path, compressed)?;
        std::fs::rename(&tmp_path, self.root.join(SNAPSHOT_FILE))?;
        inner.journal = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(self.root.join(JOURNAL_FILE))?;
        Ok(())
    }

    fn backoff_delay(attempt: u32) -> Duration {
        // Small exponential backoff capped to keep callers responsive.
        let seconds = (0.02 * f64::from(2u32.pow(attempt.saturating_sub(1)))).min(0.2);
        Duration::from_secs_f64(seconds)
    }

    fn append_record(inner: &mut Inner, record: &JournalRecord) -> Result<(), StorageError> {
        let line = serde_json::to_string(record)?;
        for attempt in 1..=APPEND_RETRY_ATTEMPTS {
            let result = writeln!(inner.journal, "{line}").and_then(|()| inner.journal.flush());
            match result {
                Ok(()) => return Ok(()),
                Err(error) if attempt < APPEND_RETRY_ATTEMPTS => {
                    tracing::warn!(%error, attempt, "journal append failed, retrying");
                    std::thread::sleep(Self::backoff_delay(attempt));
                }
                Err(error) => {
                    tracing::error!(%error, "journal append retry budget exhausted");
                    return Err(StorageError::RetryExhausted {
                        op: "journal_append",
                    });
                }
            }
        }
        Err(StorageError::RetryExhausted {
            op: "journal_append",
        })
    }

    fn mutate_task<T>(
        &self,
        task_id: &str,
        apply: impl FnOnce(&mut Task) -> T,
        journal_after: impl FnOnce(&T) -> bool,
    ) -> Result<T, StorageError> {
        let mut inner = self.inner.lock();
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StorageError::TaskNotFound(task_id.to_string()))?;
        let out = apply(task);
        let task = task.clone();
        if journal_after(&out) {
            Self::append_record(&mut inner, &JournalRecord::TaskUpserted { task })?;
        }
        Ok(out)
    }
}

impl TaskRepository for JournalRepository {
    fn create_task(&self, record: TaskCreateRecord) -> Result<Task, StorageError> {
        let task = Task::from_record(record, TaskId::generate(), self.clock.now_utc());
        let mut inner = self.inner.lock();
        inner
            .tasks
            .insert(task.task_id.as_str().to_string(), task.clone());
        inner
            .events
            .insert(task.task_id.as_str().to_string(), Vec::new());
        Self::append_record(&mut inner, &JournalRecord::TaskUpserted { task: task.clone() })?;
        Ok(task)
    }

    fn list_tasks(&self, limit: usize) -> Result<Vec<Task>, StorageError> {
        let inner = self.inner.lock();
        let mut rows: Vec<Task> = inner.tasks.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    fn get_task(&self, task_id: &str) -> Result<Option<Task>, StorageError> {
        Ok(self.inner.lock().tasks.get(task_id).cloned())
    }

    fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        reason: Option<&str>,
        rounds_completed: Option<u32>,
    ) -> Result<Task, StorageError> {
        let now = self.clock.now_utc();
        self.mutate_task(
            task_id,
            |task| {
                task.status = status;
                task.last_gate_reason = reason.map(str::to_string);
                if let Some(rounds) = rounds_completed {
                    task.rounds_completed = rounds;
                }
                task.updated_at = now;
                task.clone()
            },
            |_| true,
        )
    }

    fn update_task_status_if(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        status: TaskStatus,
        reason: Option<&str>,
        rounds_completed: Option<u32>,
        set_cancel_requested: Option<bool>,
    ) -> Result<Option<Task>, StorageError> {
        let now = self.clock.now_utc();
        self.mutate_task(
            task_id,
            |task| {
                if task.status != expected_status {
                    return None;
                }
                task.status = status;
                task.last_gate_reason = reason.map(str::to_string);
                if let Some(rounds) = rounds_completed {
                    task.rounds_completed = rounds;
                }
                if let Some(cancel) = set_cancel_requested {
                    task.cancel_requested = cancel;
                }
                task.updated_at = now;
                Some(task.clone())
            },
            Option::is_some,
        )
    }

    fn set_cancel_requested(&self, task_id: &str, requested: bool) -> Result<Task, StorageError> {
        let now = self.clock.now_utc();
        self.mutate_task(
            task_id,
            |task| {
                task.cancel_requested = requested;
                task.updated_at = now;
                task.clone()
            },
            |_| true,
        )
    }

    fn is_cancel_requested(&self, task_id: &str) -> Result<bool, StorageError> {
        let inner = self.inner.lock();
        inner
            .tasks
            .get(task_id)
            .map(|task| task.cancel_requested)
            .ok_or_else(|| StorageError::TaskNotFound(task_id.to_string()))
    }

    fn append_event(&self, task_id: &str, event: &Event) -> Result<TaskEvent, StorageError> {
        let (event_type, round, payload) = event_parts(event)?;
        let mut inner = self.inner.lock();
        if !inner.tasks.contains_key(task_id) {
            return Err(StorageError::TaskNotFound(task_id.to_string()));
        }
        let seq = {
            let rows = inner.events.entry(task_id.to_string()).or_default();
            rows.last().map(|row| row.seq).unwrap_or(0) + 1
        };
        let row = TaskEvent {
            task_id: TaskId::from_str_lossy(task_id),
            seq,
            event_type,
            round,
            payload,
            created_at: self.clock.now_utc(),
        };
        Self::append_record(&mut inner, &JournalRecord::EventAppended { event: row.clone() })?;
        if let Some(rows) = inner.events.get_mut(task_id) {
            rows.push(row.clone());
        }
        Ok(row)
    }

    fn list_events(&self, task_id: &str) -> Result<Vec<TaskEvent>, StorageError> {
        let inner = self.inner.lock();
        if !inner.tasks.contains_key(task_id) {
            return Err(StorageError::TaskNotFound(task_id.to_string()));
        }
        Ok(inner.events.get(task_id).cloned().unwrap_or_default())
    }

    fn delete_tasks(&self, task_ids: &[String]) -> Result<usize, StorageError> {
        let mut inner = self.inner.lock();
        let mut seen = std::collections::HashSet::new();
        let mut deleted_ids = Vec::new();
        for raw in task_ids {
            let task_id = raw.trim();
            if task_id.is_empty() || !seen.insert(task_id.to_string()) {
                continue;
            }
            if inner.tasks.remove(task_id).is_some() {
                inner.events.remove(task_id);
                deleted_ids.push(task_id.to_string());
            }
        }
        let deleted = deleted_ids.len();
        if !deleted_ids.is_empty() {
            Self::append_record(
                &mut inner,
                &JournalRecord::TasksDeleted {
                    task_ids: deleted_ids,
                },
            )?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
