// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! I/O multiplexer: route kernel iopub traffic into execution records and
//! out to subscribers; watch the stdin channel for `input()` requests.
//!
//! Routing is by exact parent-id. Messages that arrive before their
//! execution is registered land in a bounded per-parent orphan ring and are
//! flushed, in arrival order, once the registration shows up.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ink_core::{Clock, TaskStatus};
use ink_kernel::{
    ClearOutput, ErrorContent, ExecuteResult, InputRequest, KernelMessage, KernelStatus,
    MessageType, Status, StreamOutput,
};
use ink_notebook::Output;
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::deps::Deps;
use crate::finalize::Finalizer;
use crate::record::ExecutionRecord;
use crate::session::Session;

/// Consecutive drain failures before the listener declares itself unhealthy.
const CIRCUIT_BREAKER_LIMIT: u32 = 5;

/// Minimum spacing between output notifications per session (~10 Hz).
const OUTPUT_NOTIFY_INTERVAL: Duration = Duration::from_millis(100);

/// Orphan rings with no activity for this long are abandoned.
const ORPHAN_RING_TTL_MS: u64 = 10 * 60 * 1000;

pub(crate) struct Multiplexer<C: Clock> {
    session: Arc<Session>,
    deps: Arc<Deps<C>>,
    finalizer: Arc<Finalizer<C>>,
    /// parent-id → ring of (arrival epoch ms, message).
    orphans: Mutex<HashMap<String, VecDeque<(u64, KernelMessage)>>>,
    last_output_notify: Mutex<Option<std::time::Instant>>,
}

impl<C: Clock> Multiplexer<C> {
    pub fn new(session: Arc<Session>, deps: Arc<Deps<C>>, finalizer: Arc<Finalizer<C>>) -> Self {
        Self {
            session,
            deps,
            finalizer,
            orphans: Mutex::new(HashMap::new()),
            last_output_notify: Mutex::new(None),
        }
    }

    /// Drain the iopub channel until cancellation or circuit break.
    pub async fn listen_iopub(self: Arc<Self>) {
        let nb = self.session.notebook.display().to_string();
        info!(notebook = %nb, "iopub listener started");
        let mut consecutive_errors = 0u32;

        loop {
            let msg = tokio::select! {
                _ = self.session.cancel.cancelled() => break,
                msg = self.session.client.recv_iopub() => msg,
            };

            match msg {
                Ok(msg) => {
                    consecutive_errors = 0;
                    self.route(msg).await;
                    self.flush_registered().await;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(
                        notebook = %nb,
                        error = %e,
                        consecutive_errors,
                        "iopub listener error"
                    );
                    if consecutive_errors >= CIRCUIT_BREAKER_LIMIT {
                        error!(
                            notebook = %nb,
                            "listener hit {CIRCUIT_BREAKER_LIMIT} consecutive errors, stopping"
                        );
                        self.session.listener_healthy.store(false, Ordering::SeqCst);
                        break;
                    }
                    let backoff = Duration::from_secs(1u64 << (consecutive_errors - 1).min(4));
                    tokio::select! {
                        _ = self.session.cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
        info!(notebook = %nb, "iopub listener stopped");
    }

    /// Route one message: into its execution record, or into the orphan
    /// ring when the parent is not (yet) registered.
    pub async fn route(&self, msg: KernelMessage) {
        let Some(parent_id) = msg.parent_id().map(str::to_string) else {
            debug!(msg_type = ?msg.msg_type(), "iopub message without parent, dropping");
            return;
        };

        let record = self.session.executions.lock().get(&parent_id).cloned();
        let Some(record) = record else {
            self.buffer_orphan(parent_id, msg);
            return;
        };

        // Anything buffered for this parent goes first, in arrival order.
        let buffered = self.orphans.lock().remove(&parent_id);
        if let Some(buffered) = buffered {
            for (_, orphan) in buffered {
                self.handle(&record, orphan).await;
            }
        }

        self.handle(&record, msg).await;
    }

    /// Flush any orphan rings whose parent has since been registered.
    pub async fn flush_registered(&self) {
        let ready: Vec<(Arc<ExecutionRecord>, VecDeque<(u64, KernelMessage)>)> = {
            let executions = self.session.executions.lock();
            let mut orphans = self.orphans.lock();
            let keys: Vec<String> =
                orphans.keys().filter(|k| executions.contains_key(*k)).cloned().collect();
            keys.into_iter()
                .filter_map(|k| {
                    let ring = orphans.remove(&k)?;
                    Some((Arc::clone(executions.get(&k)?), ring))
                })
                .collect()
        };

        for (record, ring) in ready {
            for (_, msg) in ring {
                self.handle(&record, msg).await;
            }
        }
    }

    fn buffer_orphan(&self, parent_id: String, msg: KernelMessage) {
        let now_ms = self.deps.clock.epoch_ms();
        let mut orphans = self.orphans.lock();

        // Rings whose parent never registered (timed-out executions,
        // restarted kernels) would otherwise live forever.
        orphans.retain(|_, ring| {
            ring.back().is_some_and(|(at, _)| now_ms.saturating_sub(*at) < ORPHAN_RING_TTL_MS)
        });

        let ring = orphans.entry(parent_id).or_default();
        if ring.len() >= self.deps.config.orphan_max {
            ring.pop_front();
        }
        ring.push_back((now_ms, msg));
    }

    async fn handle(&self, record: &Arc<ExecutionRecord>, msg: KernelMessage) {
        match msg.msg_type().clone() {
            MessageType::Status => self.handle_status(record, &msg).await,
            MessageType::ClearOutput => self.handle_clear_output(record, &msg),
            MessageType::Stream
            | MessageType::DisplayData
            | MessageType::ExecuteResult
            | MessageType::Error => self.handle_output(record, &msg),
            _ => {}
        }
    }

    async fn handle_status(&self, record: &Arc<ExecutionRecord>, msg: &KernelMessage) {
        let Ok(status) = msg.content_as::<Status>() else {
            return;
        };

        {
            let mut state = record.state.lock();
            state.kernel_state = status.execution_state;
        }

        if status.execution_state != KernelStatus::Idle {
            return;
        }

        // Idle: the execution is over. Completed unless something terminal
        // (error, cancel, timeout) already claimed it.
        let final_status = record.finish(TaskStatus::Completed, None);
        record.completion.set();

        // The scheduler commits the terminal status to the store, then sets
        // the finalization latch; finalizing before that commit would let a
        // crash lose a task the notebook already shows as done.
        record.finalization.wait().await;

        if let Err(e) = self.finalizer.finalize(&self.session, record).await {
            warn!(task = %record.task_id, error = %e, "finalization failed");
        }

        self.session.note_executed(record.cell_index);

        self.deps.notifier.notify(
            "notebook/status",
            json!({
                "notebook_path": self.session.notebook,
                "task_id": record.task_id,
                "status": final_status.to_string(),
            }),
        );

        // Finalized records are done; drop them from the in-flight table.
        let parent = msg.parent_id().unwrap_or_default().to_string();
        self.session.executions.lock().remove(&parent);
    }

    fn handle_clear_output(&self, record: &Arc<ExecutionRecord>, msg: &KernelMessage) {
        let wait = msg.content_as::<ClearOutput>().map(|c| c.wait).unwrap_or(false);
        if !wait {
            let mut state = record.state.lock();
            // In-place progress displays: reset the list but NOT the
            // cumulative count -- subscribers index by cumulative count.
            state.outputs.clear();
        }
    }

    fn handle_output(&self, record: &Arc<ExecutionRecord>, msg: &KernelMessage) {
        let Some(output) = self.build_output(record, msg) else {
            return;
        };

        {
            let mut state = record.state.lock();
            state.outputs.push(output.clone());
            state.output_count += 1;
            state.last_activity_ms = self.deps.clock.epoch_ms();
        }

        if self.should_notify_output() {
            self.deps.notifier.notify(
                "notebook/output",
                json!({
                    "notebook_path": self.session.notebook,
                    "task_id": record.task_id,
                    "cell_index": record.cell_index,
                    "output": output,
                }),
            );
        }
    }

    fn build_output(&self, record: &Arc<ExecutionRecord>, msg: &KernelMessage) -> Option<Output> {
        match msg.msg_type() {
            MessageType::Stream => {
                let stream: StreamOutput = msg.content_as().ok()?;
                Some(Output::stream(&stream.name, stream.text))
            }
            MessageType::DisplayData => {
                let content = msg.content.as_object()?;
                Some(Output::DisplayData {
                    data: content.get("data")?.as_object()?.clone(),
                    metadata: content
                        .get("metadata")
                        .and_then(|m| m.as_object())
                        .cloned()
                        .unwrap_or_default(),
                })
            }
            MessageType::ExecuteResult => {
                let result: ExecuteResult = msg.content_as().ok()?;
                record.state.lock().execution_count = Some(result.execution_count);
                Some(Output::ExecuteResult {
                    execution_count: Some(result.execution_count),
                    data: result.data,
                    metadata: result.metadata,
                })
            }
            MessageType::Error => {
                let err: ErrorContent = msg.content_as().ok()?;
                {
                    let mut state = record.state.lock();
                    if !state.status.is_terminal() {
                        state.status = TaskStatus::Failed;
                        state.error = Some(format!("{}: {}", err.ename, err.evalue));
                    }
                }
                Some(Output::error(&err.ename, &err.evalue, err.traceback))
            }
            _ => None,
        }
    }

    /// Output notifications are throttled to ~10 Hz; status notifications
    /// never pass through here.
    fn should_notify_output(&self) -> bool {
        let mut last = self.last_output_notify.lock();
        let now = std::time::Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < OUTPUT_NOTIFY_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Watch the stdin channel for `input()` requests.
    pub async fn listen_stdin(self: Arc<Self>) {
        let nb = self.session.notebook.display().to_string();
        info!(notebook = %nb, "stdin listener started");

        loop {
            let msg = tokio::select! {
                _ = self.session.cancel.cancelled() => break,
                msg = self.session.client.recv_stdin() => msg,
            };
            let msg = match msg {
                Ok(msg) => msg,
                Err(_) => break,
            };

            if matches!(msg.msg_type(), MessageType::InputRequest) {
                let request = msg.content_as::<InputRequest>().unwrap_or(InputRequest {
                    prompt: String::new(),
                    password: false,
                });
                self.handle_input_request(request).await;
            }
        }
        info!(notebook = %nb, "stdin listener stopped");
    }

    async fn handle_input_request(&self, request: InputRequest) {
        info!(prompt = %request.prompt, "kernel requested input");

        self.deps.notifier.notify(
            "notebook/input_request",
            json!({
                "notebook_path": self.session.notebook,
                "prompt": request.prompt,
                "password": request.password,
            }),
        );

        self.session.waiting_for_input.store(true, Ordering::SeqCst);

        let timeout = self.deps.config.input_timeout;
        let poll = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        let mut timed_out = true;

        while waited < timeout {
            tokio::select! {
                _ = self.session.cancel.cancelled() => return,
                _ = tokio::time::sleep(poll) => {}
            }
            waited += poll;
            if !self.session.waiting_for_input.load(Ordering::SeqCst) {
                timed_out = false;
                break;
            }
        }

        if timed_out {
            warn!(
                notebook = %self.session.notebook.display(),
                "input request timed out after {}s, unblocking kernel",
                timeout.as_secs()
            );
            self.session.waiting_for_input.store(false, Ordering::SeqCst);
            // Empty string unblocks the kernel; interrupt is the fallback.
            if self.session.client.input_reply("").await.is_err() {
                let interrupted = match self.session.process.lock().as_ref() {
                    Some(process) => process.interrupt().is_ok(),
                    None => false,
                };
                if !interrupted {
                    let _ = self.session.client.interrupt_request().await;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "multiplexer_tests.rs"]
mod tests;
