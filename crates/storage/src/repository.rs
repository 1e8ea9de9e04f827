// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Repository contract for tasks and their append-only events.

use awe_core::{Event, Task, TaskCreateRecord, TaskEvent, TaskStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("storage retry budget exhausted during {op}")]
    RetryExhausted { op: &'static str },
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Conditional and unconditional mutations on a task row.
///
/// `update_task_status_if` is the compare-and-swap primitive every
/// race-sensitive transition goes through: it applies only when the
/// current status equals the expectation and returns `None` otherwise.
/// Event sequence numbers are reserved atomically per task; concurrent
/// appends serialize and the resulting `seq` values are gap-free.
pub trait TaskRepository: Send + Sync {
    fn create_task(&self, record: TaskCreateRecord) -> Result<Task, StorageError>;

    /// Tasks sorted by `created_at` descending, newest first.
    fn list_tasks(&self, limit: usize) -> Result<Vec<Task>, StorageError>;

    fn get_task(&self, task_id: &str) -> Result<Option<Task>, StorageError>;

    fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        reason: Option<&str>,
        rounds_completed: Option<u32>,
    ) -> Result<Task, StorageError>;

    /// Atomic CAS: apply only if the current status equals
    /// `expected_status`; returns `None` when a concurrent transition
    /// already happened.
    #[allow(clippy::too_many_arguments)]
    fn update_task_status_if(
        &self,
        task_id: &str,
        expected_status: TaskStatus,
        status: TaskStatus,
        reason: Option<&str>,
        rounds_completed: Option<u32>,
        set_cancel_requested: Option<bool>,
    ) -> Result<Option<Task>, StorageError>;

    fn set_cancel_requested(&self, task_id: &str, requested: bool) -> Result<Task, StorageError>;

    fn is_cancel_requested(&self, task_id: &str) -> Result<bool, StorageError>;

    /// Reserve the next sequence number for the task and persist the
    /// event under it.
    fn append_event(&self, task_id: &str, event: &Event) -> Result<TaskEvent, StorageError>;

    /// Events ordered by `seq` ascending.
    fn list_events(&self, task_id: &str) -> Result<Vec<TaskEvent>, StorageError>;

    /// Purge tasks, their events, and their counters. Unknown and
    /// duplicate ids are skipped; returns the number deleted.
    fn delete_tasks(&self, task_ids: &[String]) -> Result<usize, StorageError>;
}

/// Split a typed event into the persisted `(type, round, payload)` form.
pub(crate) fn event_parts(
    event: &Event,
) -> Result<(String, Option<u32>, serde_json::Value), StorageError> {
    let payload = serde_json::to_value(event)?;
    let event_type = payload
        .get("type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("event")
        .to_string();
    let round = payload
        .get("round")
        .and_then(serde_json::Value::as_u64)
        .map(|v| v as u32);
    Ok((event_type, round, payload))
}
