// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory execution records, keyed by the kernel-assigned message id.

use ink_core::{Latch, TaskId, TaskStatus};
use ink_kernel::KernelStatus;
use ink_notebook::Output;
use parking_lot::Mutex;

/// Mutable accounting for one in-flight execution. The scheduler owns
/// creation and terminal transitions; the multiplexer owns output appends
/// and kernel-state flags. They never write the same field concurrently,
/// but both go through the one lock.
#[derive(Debug)]
pub struct RecordState {
    pub status: TaskStatus,
    pub outputs: Vec<Output>,
    /// Cumulative across clear_output resets; subscribers index by this.
    pub output_count: u64,
    pub last_activity_ms: u64,
    pub kernel_state: KernelStatus,
    /// Scheduler-assigned at dequeue; overwritten by the kernel's own count
    /// when an `execute_result` reports one.
    pub execution_count: Option<i32>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct ExecutionRecord {
    pub task_id: TaskId,
    pub cell_index: i32,
    pub state: Mutex<RecordState>,
    /// Set by the multiplexer when the kernel reports idle (or on error /
    /// kernel death); the scheduler waits on it.
    pub completion: Latch,
    /// Set by the scheduler after the terminal status is committed to the
    /// store; the multiplexer waits on it before finalizing.
    pub finalization: Latch,
}

impl ExecutionRecord {
    pub fn new(task_id: TaskId, cell_index: i32, execution_count: i32, now_ms: u64) -> Self {
        Self {
            task_id,
            cell_index,
            state: Mutex::new(RecordState {
                status: TaskStatus::Running,
                outputs: Vec::new(),
                output_count: 0,
                last_activity_ms: now_ms,
                kernel_state: KernelStatus::Busy,
                execution_count: Some(execution_count),
                error: None,
            }),
            completion: Latch::new(),
            finalization: Latch::new(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    /// Move to a terminal status unless already terminal. Returns the status
    /// in effect afterwards.
    pub fn finish(&self, status: TaskStatus, error: Option<String>) -> TaskStatus {
        let mut state = self.state.lock();
        if !state.status.is_terminal() {
            state.status = status;
            if error.is_some() {
                state.error = error;
            }
        }
        state.status
    }

    pub fn outputs_snapshot(&self) -> Vec<Output> {
        self.state.lock().outputs.clone()
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
