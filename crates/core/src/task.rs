// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable task model: one submitted cell execution.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::define_id;

define_id! {
    /// Stable identifier for one submitted execution. Callers may supply
    /// their own (e.g. a UUID); the server generates one otherwise.
    pub struct TaskId("tsk-");
}

/// Cell index reserved for internal/maintenance code that must never be
/// written back to the notebook.
pub const INTERNAL_CELL_INDEX: i32 = -1;

/// Lifecycle status of a task.
///
/// Transitions are one-way: `Pending → Running → {Completed, Failed,
/// Cancelled, TimedOut}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(rename = "timeout")]
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::TimedOut
        )
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => {
                matches!(next, TaskStatus::Running | TaskStatus::Cancelled)
            }
            TaskStatus::Running => next.is_terminal(),
            // Terminal states never move
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::TimedOut => "timeout",
        };
        write!(f, "{s}")
    }
}

/// One row of the durable execution queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub notebook: PathBuf,
    pub cell_index: i32,
    pub code: String,
    pub status: TaskStatus,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<i32>,
    /// Serialized notebook outputs, stored on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<serde_json::Value>,
    /// Set when the finalizer could not write the notebook to disk.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed_save: bool,
    #[serde(default)]
    pub retries: u32,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        notebook: PathBuf,
        cell_index: i32,
        code: String,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id,
            notebook,
            cell_index,
            code,
            status: TaskStatus::Pending,
            created_at_ms,
            started_at_ms: None,
            completed_at_ms: None,
            error: None,
            execution_count: None,
            outputs: None,
            failed_save: false,
            retries: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
