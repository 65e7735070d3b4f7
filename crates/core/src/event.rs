// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WAL events: facts about the execution queue and asset leases.
//!
//! State is derived by replaying these through
//! `MaterializedState::apply_event` in the storage crate. All handlers must
//! be idempotent because an event may be applied both at commit time and
//! again during WAL replay after a crash.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::task::TaskId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Event {
    /// A task entered the durable queue. Re-enqueueing an existing id
    /// overwrites the row (idempotent re-submission).
    TaskEnqueued {
        id: TaskId,
        notebook: PathBuf,
        cell_index: i32,
        code: String,
        created_at_ms: u64,
    },

    /// A task transitioned pending → running.
    TaskStarted { id: TaskId, started_at_ms: u64 },

    /// A task finished successfully; outputs and the kernel-assigned
    /// execution count are attached when available.
    TaskCompleted {
        id: TaskId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outputs: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        execution_count: Option<i32>,
        completed_at_ms: u64,
    },

    /// A task failed (kernel error, process death, store/kernel I/O).
    TaskFailed {
        id: TaskId,
        error: String,
        completed_at_ms: u64,
    },

    /// A task was cancelled before or during execution.
    TaskCancelled {
        id: TaskId,
        reason: String,
        completed_at_ms: u64,
    },

    /// A task exceeded its per-session execution timeout.
    TaskTimedOut {
        id: TaskId,
        error: String,
        completed_at_ms: u64,
    },

    /// The finalizer could not write the notebook for this task.
    TaskSaveFailed { id: TaskId, error: String },

    /// A terminal task row was pruned by cleanup.
    TaskPruned { id: TaskId },

    /// An asset lease was created or renewed.
    LeaseRenewed {
        asset: PathBuf,
        notebook: PathBuf,
        last_seen_ms: u64,
        lease_expires_ms: u64,
    },

    /// An asset lease was removed after a GC decision.
    LeaseDropped { asset: PathBuf },
}
