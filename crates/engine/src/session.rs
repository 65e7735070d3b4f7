// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-notebook session state.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ink_core::TaskId;
use ink_kernel::{KernelClient, KernelProcess};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::record::ExecutionRecord;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Restarting,
    Stopping,
    Stopped,
}

/// One queued unit of work for the session worker.
#[derive(Debug)]
pub enum WorkerMsg {
    Task { task_id: TaskId, cell_index: i32, code: String },
    /// Sentinel: drain and exit cleanly.
    Shutdown,
}

/// Environment provenance recorded at kernel start.
#[derive(Debug, Clone)]
pub struct EnvInfo {
    pub interpreter: PathBuf,
    pub env_name: String,
    pub started_at_ms: u64,
    /// Injected into the child process environment for reaping correlation.
    pub session_uuid: String,
}

/// A running kernel bound to one notebook path.
///
/// Once published in the session table the `Arc<Session>` itself is
/// immutable; all mutation goes through the interior locks and atomics.
pub struct Session {
    /// Canonical absolute notebook path -- the session identity.
    pub notebook: PathBuf,
    pub client: KernelClient,
    pub process: Mutex<Option<KernelProcess>>,
    pub env: EnvInfo,
    /// Env root the kernel was started with; restart reuses it.
    pub env_root: Option<PathBuf>,
    pub connection_file: PathBuf,

    /// In-flight executions keyed by kernel message id. The scheduler
    /// creates entries and sets terminal status; the multiplexer appends
    /// outputs and kernel-state flags.
    pub executions: Mutex<HashMap<String, Arc<ExecutionRecord>>>,
    /// Queued-but-cancelled task ids; the worker skips them on pop.
    pub cancelled_pending: Mutex<HashSet<TaskId>>,
    /// Cell indices that have completed at least once this session.
    pub executed_indices: Mutex<HashSet<i32>>,
    /// Cells whose on-disk write was deferred while subscribers were
    /// connected, mapped to the task holding their outputs.
    pub dirty_cells: Mutex<HashMap<i32, TaskId>>,

    pub execution_counter: AtomicI32,
    pub max_executed_index: AtomicI32,
    pub stop_on_error: AtomicBool,
    pub waiting_for_input: AtomicBool,
    pub listener_healthy: AtomicBool,
    pub last_probe_latency_ms: AtomicU64,

    pub execution_timeout: Mutex<Duration>,
    pub state: Mutex<SessionState>,
    /// Observable error from the exit monitor (OOM classification etc).
    pub error: Mutex<Option<String>>,

    pub queue_tx: mpsc::Sender<WorkerMsg>,
    /// Held until the worker task claims it.
    pub queue_rx: Mutex<Option<mpsc::Receiver<WorkerMsg>>>,
    pub queue_capacity: usize,
    /// Cancels the listeners and probes on stop/shutdown.
    pub cancel: CancellationToken,
    /// Background task handles, joined on teardown.
    pub tasks: Mutex<Vec<JoinHandle<()>>>,

    pub pid: Option<i32>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Find an in-flight record by its task id.
    pub fn record_for_task(&self, task_id: TaskId) -> Option<Arc<ExecutionRecord>> {
        self.executions.lock().values().find(|r| r.task_id == task_id).cloned()
    }

    /// The record currently marked running, if any.
    pub fn running_record(&self) -> Option<Arc<ExecutionRecord>> {
        self.executions
            .lock()
            .values()
            .find(|r| r.status() == ink_core::TaskStatus::Running)
            .cloned()
    }

    pub fn queued_len(&self) -> usize {
        self.queue_capacity - self.queue_tx.capacity()
    }

    /// Record that a cell finished; feeds the linearity warning.
    pub fn note_executed(&self, cell_index: i32) {
        if cell_index < 0 {
            return;
        }
        self.executed_indices.lock().insert(cell_index);
        self.max_executed_index.fetch_max(cell_index, Ordering::SeqCst);
    }

    /// Abort every background task and cancel listeners. Idempotent.
    pub fn teardown_tasks(&self) {
        self.cancel.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
