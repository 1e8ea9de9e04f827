// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory repository used by tests and single-process setups.

use crate::repository::{event_parts, StorageError, TaskRepository};
use awe_core::{Clock, Event, SystemClock, Task, TaskCreateRecord, TaskEvent, TaskId, TaskStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    events: HashMap<String, Vec<TaskEvent>>,
}

/// Mutex-guarded map-backed repository. All mutations hold the lock for
/// their full duration, which is what serializes sequence reservation
/// and makes `update_task_status_if` a true CAS.
pub struct InMemoryRepository {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock: Arc::new(SystemClock),
        }
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap the wall clock; row timestamps come from it.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn with_task<T>(
        &self,
        task_id: &str,
        apply: impl FnOnce(&mut Task) -> T,
    ) -> Result<T, StorageError> {
        let mut inner = self.inner.lock();
        let task = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StorageError::TaskNotFound(task_id.to_string()))?;
        Ok(apply(task))
    }
}

impl TaskRepository for InMemoryRepository {
    fn create_task(&self, record: TaskCreateRecord) -> Result<Task, StorageError> {
        let task = Task::from_record(record, TaskId::generate(), self.clock.now_utc());
        let mut inner = self.inner.lock();
        inner
            .tasks
            .insert(task.task_id.as_str().to_string(), task.clone());
        inner
            .events
            .insert(task.task_id.as_str().to_string(), Vec::new());
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
        self.with_task(task_id, |task| {
            task.status = status;
            task.last_gate_reason = reason.map(str::to_string);
            if let Some(rounds) = rounds_completed {
                task.rounds_completed = rounds;
            }
            task.updated_at = now;
            task.clone()
        })
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
        self.with_task(task_id, |task| {
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
        })
    }

    fn set_cancel_requested(&self, task_id: &str, requested: bool) -> Result<Task, StorageError> {
        let now = self.clock.now_utc();
        self.with_task(task_id, |task| {
            task.cancel_requested = requested;
            task.updated_at = now;
            task.clone()
        })
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
        let rows = inner.events.entry(task_id.to_string()).or_default();
        let seq = rows.last().map(|row| row.seq).unwrap_or(0) + 1;
        let row = TaskEvent {
            task_id: TaskId::from_str_lossy(task_id),
            seq,
            event_type,
            round,
            payload,
            created_at: self.clock.now_utc(),
        };
        rows.push(row.clone());
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
        let mut deleted = 0;
        for raw in task_ids {
            let task_id = raw.trim();
            if task_id.is_empty() || !seen.insert(task_id.to_string()) {
                continue;
            }
            if inner.tasks.remove(task_id).is_some() {
                inner.events.remove(task_id);
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
