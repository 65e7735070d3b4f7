// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event handlers for the execution queue.

use ink_core::{Event, TaskRecord, TaskStatus};

use super::MaterializedState;

pub(super) fn apply(state: &mut MaterializedState, event: &Event) {
    match event {
        Event::TaskEnqueued { id, notebook, cell_index, code, created_at_ms } => {
            // Overwrite-by-design: re-enqueueing an id resets the row to
            // pending. The retry counter survives, incremented only when the
            // previous incarnation reached a terminal state (idempotent:
            // a second apply sees status pending and leaves the counter).
            let retries = match state.tasks.get(id) {
                Some(prev) if prev.is_terminal() => prev.retries + 1,
                Some(prev) => prev.retries,
                None => 0,
            };
            let mut record = TaskRecord::new(
                *id,
                notebook.clone(),
                *cell_index,
                code.clone(),
                *created_at_ms,
            );
            record.retries = retries;
            state.tasks.insert(*id, record);
        }

        Event::TaskStarted { id, started_at_ms } => {
            if let Some(task) = state.tasks.get_mut(id) {
                task.status = TaskStatus::Running;
                task.started_at_ms = Some(*started_at_ms);
            }
        }

        Event::TaskCompleted { id, outputs, execution_count, completed_at_ms } => {
            if let Some(task) = state.tasks.get_mut(id) {
                task.status = TaskStatus::Completed;
                task.completed_at_ms = Some(*completed_at_ms);
                if outputs.is_some() {
                    task.outputs = outputs.clone();
                }
                if execution_count.is_some() {
                    task.execution_count = *execution_count;
                }
            }
        }

        Event::TaskFailed { id, error, completed_at_ms } => {
            if let Some(task) = state.tasks.get_mut(id) {
                task.status = TaskStatus::Failed;
                task.error = Some(error.clone());
                task.completed_at_ms = Some(*completed_at_ms);
            }
        }

        Event::TaskCancelled { id, reason, completed_at_ms } => {
            if let Some(task) = state.tasks.get_mut(id) {
                task.status = TaskStatus::Cancelled;
                task.error = Some(reason.clone());
                task.completed_at_ms = Some(*completed_at_ms);
            }
        }

        Event::TaskTimedOut { id, error, completed_at_ms } => {
            if let Some(task) = state.tasks.get_mut(id) {
                task.status = TaskStatus::TimedOut;
                task.error = Some(error.clone());
                task.completed_at_ms = Some(*completed_at_ms);
            }
        }

        Event::TaskSaveFailed { id, error } => {
            if let Some(task) = state.tasks.get_mut(id) {
                task.failed_save = true;
                task.error = Some(error.clone());
            }
        }

        Event::TaskPruned { id } => {
            state.tasks.remove(id);
        }

        _ => {}
    }
}
