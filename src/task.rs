//! Conversion tasks and the in-memory task registry.
//!
//! A [`ConversionTask`] is the orchestrator's record of one background
//! attempt. It starts `pending` and moves exactly once, to `completed` or
//! `failed`. The [`TaskRegistry`] owns every task and enforces that rule:
//! the two terminal transitions are the only mutators, and both refuse to
//! touch a task that already left `pending`.
//!
//! Tasks are volatile. Nothing here is persisted; a restart forgets every
//! task while the published artifacts remain on disk.

use crate::error::Doc2MdError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Opaque task identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Mint a fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Client-visible view of a conversion.
///
/// Serialises as `{"status", "task_id", "file_name", "error"}` with absent
/// fields omitted. A cache hit carries no `task_id`; clients rely on that to
/// tell "already converted" apart from a fresh job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionTask {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversionTask {
    /// Synthetic completed task for an artifact that already exists.
    pub fn cache_hit(file_name: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Completed,
            task_id: None,
            file_name: Some(file_name.into()),
            error: None,
        }
    }

    fn pending(task_id: TaskId, file_name: String) -> Self {
        Self {
            status: TaskStatus::Pending,
            task_id: Some(task_id),
            file_name: Some(file_name),
            error: None,
        }
    }
}

/// Concurrency-safe map of task id → task.
///
/// Reads (status polls) and the single writer per task (its background job)
/// go through per-shard locks of a [`DashMap`]; no lock is held across an
/// await point.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, ConversionTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new `pending` task that will produce `file_name`.
    pub fn create(&self, file_name: impl Into<String>) -> ConversionTask {
        let task_id = TaskId::new();
        let task = ConversionTask::pending(task_id.clone(), file_name.into());
        self.tasks.insert(task_id.clone(), task.clone());
        debug!("Registered task {}", task_id);
        task
    }

    /// Snapshot of the task's current state.
    pub fn get(&self, task_id: &TaskId) -> Result<ConversionTask, Doc2MdError> {
        self.tasks
            .get(task_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Doc2MdError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Terminal transition `pending → completed`.
    pub fn mark_completed(&self, task_id: &TaskId, file_name: impl Into<String>) -> Result<(), Doc2MdError> {
        let file_name = file_name.into();
        self.finish(task_id, |task| {
            task.status = TaskStatus::Completed;
            task.file_name = Some(file_name);
        })
    }

    /// Terminal transition `pending → failed`.
    pub fn mark_failed(&self, task_id: &TaskId, error: impl Into<String>) -> Result<(), Doc2MdError> {
        let error = error.into();
        self.finish(task_id, |task| {
            task.status = TaskStatus::Failed;
            task.error = Some(error);
        })
    }

    /// Number of tasks ever created in this process.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn finish(&self, task_id: &TaskId, apply: impl FnOnce(&mut ConversionTask)) -> Result<(), Doc2MdError> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Doc2MdError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        let task = entry.value_mut();
        if task.status.is_terminal() {
            return Err(Doc2MdError::TaskAlreadyFinished {
                task_id: task_id.to_string(),
                status: task.status,
            });
        }
        apply(&mut *task);
        debug!("Task {} → {}", task_id, task.status);
        Ok(())
    }
}
