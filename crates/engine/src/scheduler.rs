// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session execution scheduler: one linear FIFO, one worker.
//!
//! The worker owns the pending → running transition, the execution counter,
//! and the terminal commit. Errors from a single task never kill the worker;
//! they become task status.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use ink_core::{Clock, TaskId, TaskStatus};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::deps::Deps;
use crate::record::ExecutionRecord;
use crate::session::{Session, WorkerMsg};

/// Run the session's queue worker until the shutdown sentinel.
pub(crate) async fn run_worker<C: Clock>(
    session: Arc<Session>,
    deps: Arc<Deps<C>>,
    rx: Arc<Mutex<Option<mpsc::Receiver<WorkerMsg>>>>,
) {
    let Some(mut rx) = rx.lock().take() else {
        return;
    };
    info!(notebook = %session.notebook.display(), "queue worker started");

    while let Some(msg) = rx.recv().await {
        let (task_id, cell_index, code) = match msg {
            WorkerMsg::Shutdown => break,
            WorkerMsg::Task { task_id, cell_index, code } => (task_id, cell_index, code),
        };

        // Cancelled while queued: never executes.
        if session.cancelled_pending.lock().remove(&task_id) {
            continue;
        }

        let outcome = run_task(&session, &deps, task_id, cell_index, &code).await;

        let cascade = match outcome {
            Ok(status) => {
                matches!(status, TaskStatus::Failed | TaskStatus::TimedOut)
                    && session.stop_on_error.load(Ordering::SeqCst)
            }
            Err(e) => {
                warn!(task = %task_id, error = %e, "task execution failed outside the kernel");
                let now = deps.clock.epoch_ms();
                let _ = deps
                    .store
                    .mark_failed(task_id, &e.to_string(), now)
                    .or_else(|_| deps.store.mark_cancelled(task_id, &e.to_string(), now));
                session.stop_on_error.load(Ordering::SeqCst)
            }
        };

        if cascade {
            drain_on_error(&session, &deps, &mut rx, cell_index);
        }
    }

    info!(notebook = %session.notebook.display(), "queue worker stopped");
}

/// Execute one task end to end. Returns its terminal status.
async fn run_task<C: Clock>(
    session: &Arc<Session>,
    deps: &Arc<Deps<C>>,
    task_id: TaskId,
    cell_index: i32,
    code: &str,
) -> Result<TaskStatus, crate::EngineError> {
    // Execution counts are assigned at the dequeue boundary.
    let execution_count = session.execution_counter.fetch_add(1, Ordering::SeqCst) + 1;

    // Out-of-source-order execution can mask hidden state. Advisory only.
    let max_executed = session.max_executed_index.load(Ordering::SeqCst);
    if cell_index >= 0 && cell_index <= max_executed {
        warn!(
            notebook = %session.notebook.display(),
            cell_index,
            max_executed,
            "cell executed out of order"
        );
        deps.notifier.notify(
            "notebook/warning",
            json!({
                "notebook_path": session.notebook,
                "kind": "out_of_order_execution",
                "cell_index": cell_index,
                "max_executed_index": max_executed,
                "message": format!(
                    "cell {cell_index} re-runs at or before already-executed cell {max_executed}"
                ),
            }),
        );
    }

    deps.store.mark_running(task_id, deps.clock.epoch_ms())?;

    let msg_id = session.client.execute(code).await?;

    let record = Arc::new(ExecutionRecord::new(
        task_id,
        cell_index,
        execution_count,
        deps.clock.epoch_ms(),
    ));
    session.executions.lock().insert(msg_id.clone(), Arc::clone(&record));

    // Wait for the multiplexer to observe idle (or error / kernel death),
    // bounded by the session's per-task timeout.
    let timeout = *session.execution_timeout.lock();
    let completed = tokio::time::timeout(timeout, record.completion.wait()).await.is_ok();

    let status = if completed {
        record.status()
    } else {
        warn!(
            task = %task_id,
            cell_index,
            "execution exceeded {}s timeout",
            timeout.as_secs()
        );
        record.finish(
            TaskStatus::TimedOut,
            Some(format!("Execution exceeded {}s timeout", timeout.as_secs())),
        )
    };

    // Commit the terminal status BEFORE releasing the finalizer: it must
    // only ever see a committed record.
    let now = deps.clock.epoch_ms();
    let commit = match status {
        TaskStatus::Completed => {
            let state = record.state.lock();
            let outputs = serde_json::to_value(&state.outputs).ok();
            let count = state.execution_count;
            drop(state);
            deps.store.mark_complete(task_id, outputs, count, now)
        }
        TaskStatus::Failed => {
            let error = record.state.lock().error.clone().unwrap_or_else(|| "error".to_string());
            deps.store.mark_failed(task_id, &error, now)
        }
        TaskStatus::Cancelled => {
            let reason = record
                .state
                .lock()
                .error
                .clone()
                .unwrap_or_else(|| "cancelled".to_string());
            deps.store.mark_cancelled(task_id, &reason, now)
        }
        TaskStatus::TimedOut => {
            let error = record.state.lock().error.clone().unwrap_or_default();
            deps.store.mark_timeout(task_id, &error, now)
        }
        other => {
            warn!(task = %task_id, status = %other, "unexpected non-terminal status after wait");
            Ok(())
        }
    };
    if let Err(e) = commit {
        warn!(task = %task_id, error = %e, "failed to commit terminal status");
    }

    record.finalization.set();

    // A timed-out record never gets its idle; it would sit in the in-flight
    // table forever. The kernel is left running for the caller to interrupt.
    if status == TaskStatus::TimedOut {
        session.executions.lock().remove(&msg_id);
    }

    Ok(status)
}

/// Stop-on-error cascade: atomically drain the queue, cancelling everything
/// behind the failed task.
fn drain_on_error<C: Clock>(
    session: &Arc<Session>,
    deps: &Arc<Deps<C>>,
    rx: &mut mpsc::Receiver<WorkerMsg>,
    failed_cell: i32,
) {
    let reason = format!("cancelled: stop_on_error after failure in cell {failed_cell}");
    let mut drained = 0usize;

    while let Ok(msg) = rx.try_recv() {
        let WorkerMsg::Task { task_id, .. } = msg else {
            // Preserve shutdown by re-queueing is impossible on a Receiver;
            // honor it by pushing the sentinel back through the sender.
            let _ = session.queue_tx.try_send(WorkerMsg::Shutdown);
            break;
        };
        if session.cancelled_pending.lock().remove(&task_id) {
            continue;
        }
        if let Err(e) = deps.store.mark_cancelled(task_id, &reason, deps.clock.epoch_ms()) {
            warn!(task = %task_id, error = %e, "failed to mark drained task cancelled");
        }
        deps.notifier.notify(
            "notebook/status",
            json!({
                "notebook_path": session.notebook,
                "task_id": task_id,
                "status": "cancelled",
                "reason": reason,
            }),
        );
        drained += 1;
    }

    if drained > 0 {
        info!(
            notebook = %session.notebook.display(),
            drained,
            failed_cell,
            "stop_on_error drained queue"
        );
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
