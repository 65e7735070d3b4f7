// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session manager: canonical session table, request routing, startup
//! recovery and shutdown.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ink_core::{Clock, SystemClock, TaskId, TaskStatus};
use ink_kernel::pid_alive;
use ink_storage::Store;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::assets::collect_garbage;
use crate::config::EngineConfig;
use crate::deps::Deps;
use crate::finalize::Finalizer;
use crate::launcher::{KernelLauncher, LaunchSpec};
use crate::multiplexer::Multiplexer;
use crate::notify::Notifier;
use crate::reap::{reconcile_zombies, EnvDescriptor, SessionDescriptor};
use crate::record::ExecutionRecord;
use crate::scheduler::run_worker;
use crate::session::{EnvInfo, Session, SessionState, WorkerMsg};
use crate::sync::{self, DetectReport, ResyncReport, SyncStrategy};
use crate::EngineError;

/// Grace window for kernels to exit after a shutdown request.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// How long a start request waits on a concurrent start of the same path.
const START_WAIT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub notebook_path: PathBuf,
    pub state: String,
    pub env_name: String,
    pub interpreter: PathBuf,
    pub started_at_ms: u64,
    pub session_uuid: String,
    pub execution_count: i32,
    pub queued: usize,
    pub kernel_pid: Option<i32>,
    pub waiting_for_input: bool,
    /// Round-trip of the most recent health probe.
    pub last_probe_latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusReport {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub outputs_count: u64,
    pub last_activity_ms: Option<u64>,
    pub execution_count: Option<i32>,
    pub error: Option<String>,
    pub failed_save: bool,
}

/// Options for starting a session.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub env_root: Option<PathBuf>,
    pub timeout: Option<Duration>,
    /// Agent-scoped working-directory isolation.
    pub agent_id: Option<String>,
}

pub struct SessionManager<C: Clock = SystemClock> {
    deps: Arc<Deps<C>>,
    finalizer: Arc<Finalizer<C>>,
    launcher: Arc<dyn KernelLauncher>,
    sessions: Mutex<HashMap<PathBuf, Arc<Session>>>,
    /// Paths with a start in flight (the table gets the session only once
    /// the kernel is ready).
    starting: Mutex<HashSet<PathBuf>>,
}

impl<C: Clock + 'static> SessionManager<C> {
    pub fn new(
        store: Arc<Store>,
        notifier: Arc<dyn Notifier>,
        launcher: Arc<dyn KernelLauncher>,
        config: EngineConfig,
        clock: C,
    ) -> Arc<Self> {
        let deps = Arc::new(Deps { store, notifier, config, clock });
        let finalizer = Arc::new(Finalizer::new(Arc::clone(&deps)));
        Arc::new(Self {
            deps,
            finalizer,
            launcher,
            sessions: Mutex::new(HashMap::new()),
            starting: Mutex::new(HashSet::new()),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.deps.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.deps.config
    }

    fn session(&self, notebook: &Path) -> Result<Arc<Session>, EngineError> {
        self.sessions
            .lock()
            .get(notebook)
            .cloned()
            .ok_or_else(|| EngineError::SessionNotFound(notebook.to_path_buf()))
    }

    fn canonicalize(&self, notebook: &Path) -> Result<PathBuf, EngineError> {
        std::fs::canonicalize(notebook)
            .map_err(|e| EngineError::InvalidPath(format!("{}: {e}", notebook.display())))
    }

    /// Start (or return) the session for a notebook.
    ///
    /// Running → stable no-op success. Starting → waits for the other start.
    /// Stopping → retryable error.
    pub async fn start_session(
        self: &Arc<Self>,
        notebook: &Path,
        opts: StartOptions,
    ) -> Result<SessionInfo, EngineError> {
        let notebook = self.canonicalize(notebook)?;
        let deadline = tokio::time::Instant::now() + START_WAIT;

        loop {
            if let Some(existing) = self.sessions.lock().get(&notebook).cloned() {
                match existing.state() {
                    SessionState::Running | SessionState::Restarting => {
                        return Ok(self.session_info(&existing));
                    }
                    SessionState::Stopping | SessionState::Stopped => {
                        return Err(EngineError::SessionStopping(notebook));
                    }
                    SessionState::Starting => {}
                }
            }

            let won_race = {
                let mut starting = self.starting.lock();
                if starting.contains(&notebook) {
                    false
                } else {
                    starting.insert(notebook.clone());
                    true
                }
            };
            if won_race {
                break;
            }

            // Someone else is starting this path; wait for them.
            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::SessionStopping(notebook));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let result = self.start_session_inner(&notebook, opts).await;
        self.starting.lock().remove(&notebook);
        result
    }

    async fn start_session_inner(
        self: &Arc<Self>,
        notebook: &Path,
        opts: StartOptions,
    ) -> Result<SessionInfo, EngineError> {
        // Kernel cap: refuse with a concrete suggestion for which session
        // to stop.
        {
            let sessions = self.sessions.lock();
            let active = sessions.len() + self.starting.lock().len() - 1;
            if active >= self.deps.config.max_kernels {
                let suggestion = sessions
                    .keys()
                    .next()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "an existing session".to_string());
                return Err(EngineError::KernelCapReached {
                    max: self.deps.config.max_kernels,
                    suggestion,
                });
            }
        }

        let notebook_dir =
            notebook.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

        // Agent isolation: a scoped subdirectory as working directory.
        let cwd = match &opts.agent_id {
            Some(agent_id) => {
                let safe: String = agent_id
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                    .collect();
                let dir = notebook_dir.join(format!("agent_{safe}"));
                std::fs::create_dir_all(&dir)?;
                dir
            }
            None => notebook_dir,
        };

        let connection_file = self
            .deps
            .config
            .runtime_dir()
            .join(format!("kernel-{}.json", uuid::Uuid::new_v4()));

        // `opts.timeout` is the session's per-task execution timeout; the
        // kernel ready-wait bound comes from configuration.
        let spec = LaunchSpec {
            notebook: notebook.to_path_buf(),
            cwd,
            env_root: opts.env_root.clone(),
            connection_file,
            start_timeout: self.deps.config.start_timeout,
        };

        let launched = self.launcher.launch(&spec).await?;

        let session = self.build_session(notebook, launched, &spec, opts);
        self.persist_descriptor(&session);
        self.spawn_session_tasks(&session);
        self.requeue_pending(&session);

        session.set_state(SessionState::Running);
        self.sessions.lock().insert(notebook.to_path_buf(), Arc::clone(&session));
        info!(notebook = %notebook.display(), env = %session.env.env_name, "session started");

        Ok(self.session_info(&session))
    }

    fn build_session(
        &self,
        notebook: &Path,
        launched: crate::launcher::LaunchedKernel,
        spec: &LaunchSpec,
        opts: StartOptions,
    ) -> Arc<Session> {
        let (queue_tx, queue_rx) = mpsc::channel(self.deps.config.queue_capacity);

        let session = Arc::new(Session {
            notebook: notebook.to_path_buf(),
            client: launched.client,
            process: Mutex::new(launched.process),
            env: EnvInfo {
                interpreter: launched.interpreter,
                env_name: launched.env_name,
                started_at_ms: self.deps.clock.epoch_ms(),
                session_uuid: if launched.kernel_uuid.is_empty() {
                    uuid::Uuid::new_v4().to_string()
                } else {
                    launched.kernel_uuid
                },
            },
            env_root: opts.env_root,
            executions: Mutex::new(HashMap::new()),
            cancelled_pending: Mutex::new(HashSet::new()),
            executed_indices: Mutex::new(HashSet::new()),
            dirty_cells: Mutex::new(HashMap::new()),
            execution_counter: AtomicI32::new(0),
            max_executed_index: AtomicI32::new(-1),
            stop_on_error: AtomicBool::new(false),
            waiting_for_input: AtomicBool::new(false),
            listener_healthy: AtomicBool::new(true),
            last_probe_latency_ms: AtomicU64::new(0),
            execution_timeout: Mutex::new(
                opts.timeout.unwrap_or(self.deps.config.execution_timeout),
            ),
            state: Mutex::new(SessionState::Starting),
            error: Mutex::new(None),
            queue_tx,
            queue_capacity: self.deps.config.queue_capacity,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            pid: launched.pid,
            connection_file: spec.connection_file.clone(),
            queue_rx: Mutex::new(Some(queue_rx)),
        });
        session
    }

    fn persist_descriptor(&self, session: &Arc<Session>) {
        let descriptor = SessionDescriptor {
            notebook_path: session.notebook.clone(),
            connection_file: session.connection_file.clone(),
            kernel_pid: session.pid.unwrap_or(0),
            server_pid: std::process::id() as i32,
            env_info: EnvDescriptor {
                interpreter: session.env.interpreter.clone(),
                env_name: session.env.env_name.clone(),
            },
            created_at_ms: self.deps.clock.epoch_ms(),
        };
        if let Err(e) = descriptor.write(&self.deps.config.sessions_dir()) {
            warn!(error = %e, "could not persist session descriptor");
        }
    }

    fn spawn_session_tasks(self: &Arc<Self>, session: &Arc<Session>) {
        let mux = Arc::new(Multiplexer::new(
            Arc::clone(session),
            Arc::clone(&self.deps),
            Arc::clone(&self.finalizer),
        ));

        let mut tasks = Vec::new();

        // Queue worker (C4)
        {
            let rx = {
                let taken = session.queue_rx.lock().take();
                Arc::new(Mutex::new(taken))
            };
            tasks.push(tokio::spawn(run_worker(
                Arc::clone(session),
                Arc::clone(&self.deps),
                rx,
            )));
        }

        // I/O listeners (C3)
        tasks.push(tokio::spawn(Arc::clone(&mux).listen_iopub()));
        tasks.push(tokio::spawn(Arc::clone(&mux).listen_stdin()));

        // Health probe (C2)
        tasks.push(tokio::spawn(Self::health_probe(Arc::clone(self), Arc::clone(session))));

        // Kernel-exit monitor (C2)
        let child = session.process.lock().as_mut().and_then(|p| p.take_child());
        if let Some(child) = child {
            tasks.push(tokio::spawn(Self::exit_monitor(
                Arc::clone(self),
                Arc::clone(session),
                child,
            )));
        }

        *session.tasks.lock() = tasks;
    }

    /// Resubmit this notebook's durable pending rows (crash recovery).
    fn requeue_pending(&self, session: &Arc<Session>) {
        let pending = match self.deps.store.pending_tasks(Some(&session.notebook)) {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "could not read pending tasks for recovery");
                return;
            }
        };
        for task in pending {
            let msg = WorkerMsg::Task {
                task_id: task.id,
                cell_index: task.cell_index,
                code: task.code,
            };
            if session.queue_tx.try_send(msg).is_err() {
                warn!(task = %task.id, "queue full during pending-task recovery");
                break;
            }
        }
    }

    async fn health_probe(manager: Arc<Self>, session: Arc<Session>) {
        let interval = manager.deps.config.health_interval;
        loop {
            tokio::select! {
                _ = session.cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            match session.client.kernel_info(Duration::from_secs(5)).await {
                Ok(latency) => {
                    session
                        .last_probe_latency_ms
                        .store(latency.as_millis() as u64, Ordering::SeqCst);
                }
                Err(_) => {
                    let process_alive = session.pid.map(pid_alive).unwrap_or(true);
                    if process_alive {
                        // Unresponsive, not dead: a long-running cell can
                        // starve the shell channel. Observe, don't act.
                        warn!(
                            notebook = %session.notebook.display(),
                            "kernel unresponsive to health probe"
                        );
                    } else {
                        warn!(
                            notebook = %session.notebook.display(),
                            "kernel process confirmed dead"
                        );
                        manager.handle_kernel_death(&session).await;
                        return;
                    }
                }
            }
        }
    }

    async fn exit_monitor(manager: Arc<Self>, session: Arc<Session>, mut child: tokio::process::Child) {
        let status = tokio::select! {
            _ = session.cancel.cancelled() => return,
            status = child.wait() => status,
        };

        let error = match status {
            Ok(status) if status.success() => None,
            Ok(status) => {
                let code = status.code();
                #[cfg(unix)]
                let signal = std::os::unix::process::ExitStatusExt::signal(&status);
                #[cfg(not(unix))]
                let signal: Option<i32> = None;

                if code == Some(137) || signal == Some(9) {
                    Some(
                        "Kernel crashed: out of memory (exit code 137). \
                         Consider smaller working sets or more RAM."
                            .to_string(),
                    )
                } else {
                    Some(format!("Kernel crashed: exit status {status}"))
                }
            }
            Err(e) => Some(format!("Kernel exit monitor failed: {e}")),
        };

        if let Some(error) = error {
            warn!(notebook = %session.notebook.display(), error = %error, "kernel exited");
            *session.error.lock() = Some(error);
        }

        if session.state() == SessionState::Running {
            manager.handle_kernel_death(&session).await;
        }
    }

    /// A kernel died under a live session: fail the in-flight task, notify,
    /// and tear the session down (or restart it when configured).
    async fn handle_kernel_death(self: &Arc<Self>, session: &Arc<Session>) {
        let error = session
            .error
            .lock()
            .clone()
            .unwrap_or_else(|| "Kernel process died".to_string());

        if let Some(record) = session.running_record() {
            record.finish(TaskStatus::Failed, Some(error.clone()));
            record.completion.set();
        }

        self.deps.notifier.notify(
            "notebook/status",
            json!({
                "notebook_path": session.notebook,
                "status": "kernel_died",
                "error": error,
            }),
        );

        // This runs inside a session-owned task; teardown aborts those
        // tasks, so the rest of the cleanup must happen on a detached one.
        let manager = Arc::clone(self);
        let notebook = session.notebook.clone();
        let env_root = session.env_root.clone();
        let auto_restart = self.deps.config.auto_restart;
        tokio::spawn(async move {
            let _ = manager.teardown(&notebook, false).await;
            if auto_restart {
                let restart = manager
                    .start_session(&notebook, StartOptions { env_root, ..Default::default() })
                    .await;
                if let Err(e) = restart {
                    warn!(notebook = %notebook.display(), error = %e, "auto-restart failed");
                }
            }
        });
    }

    /// Stop a session: graceful kernel shutdown, bounded; cleanup is
    /// unconditional.
    pub async fn stop_session(
        self: &Arc<Self>,
        notebook: &Path,
        cleanup_assets: bool,
    ) -> Result<(), EngineError> {
        let notebook = self.canonicalize(notebook).unwrap_or_else(|_| notebook.to_path_buf());
        self.session(&notebook)?;
        self.teardown(&notebook, cleanup_assets).await
    }

    async fn teardown(&self, notebook: &Path, cleanup_assets: bool) -> Result<(), EngineError> {
        let Some(session) = self.sessions.lock().get(notebook).cloned() else {
            return Ok(());
        };
        session.set_state(SessionState::Stopping);

        // Let the worker drain its in-flight task, then exit.
        let _ = session.queue_tx.try_send(WorkerMsg::Shutdown);

        // Pending on-disk state first: after this the session is gone.
        self.finalizer.flush_dirty(&session);

        let _ = session.client.shutdown_request(false).await;

        if let Some(pid) = session.pid {
            let deadline = tokio::time::Instant::now() + STOP_GRACE;
            while pid_alive(pid) && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            if pid_alive(pid) {
                warn!(pid, "kernel did not exit in grace window, killing");
                let _ = ink_kernel::kill_pid(pid);
            }
        }

        session.teardown_tasks();
        session.client.close();

        if let Some(process) = session.process.lock().take() {
            process.remove_connection_file();
        } else {
            let _ = std::fs::remove_file(&session.connection_file);
        }
        SessionDescriptor::remove(&self.deps.config.sessions_dir(), notebook);

        if cleanup_assets {
            collect_garbage(&self.deps.store, notebook, self.deps.clock.epoch_ms());
        }

        session.set_state(SessionState::Stopped);
        self.sessions.lock().remove(notebook);
        info!(notebook = %notebook.display(), "session stopped");
        Ok(())
    }

    /// Restart: asset GC around the restart, in-memory records cleared,
    /// notebook outputs on disk preserved.
    pub async fn restart_session(self: &Arc<Self>, notebook: &Path) -> Result<SessionInfo, EngineError> {
        let notebook = self.canonicalize(notebook)?;
        let session = self.session(&notebook)?;
        session.set_state(SessionState::Restarting);

        collect_garbage(&self.deps.store, &notebook, self.deps.clock.epoch_ms());

        let env_root = session.env_root.clone();
        self.teardown(&notebook, false).await?;
        self.start_session(&notebook, StartOptions { env_root, ..Default::default() }).await
    }

    /// Deliver the wire-protocol interrupt. The caller observes the state
    /// transition through task status.
    pub async fn interrupt_session(&self, notebook: &Path) -> Result<(), EngineError> {
        let notebook = self.canonicalize(notebook)?;
        let session = self.session(&notebook)?;
        self.interrupt(&session).await
    }

    async fn interrupt(&self, session: &Arc<Session>) -> Result<(), EngineError> {
        let signalled = {
            let process = session.process.lock();
            match process.as_ref() {
                Some(process) => process.interrupt().is_ok(),
                None => false,
            }
        };
        if !signalled {
            // Re-attached or fake kernels: message-based interrupt.
            session.client.interrupt_request().await?;
        }
        Ok(())
    }

    /// Submit code for a cell. Durable first, in-memory second, ack third.
    pub async fn submit(
        &self,
        notebook: &Path,
        cell_index: i32,
        code: &str,
        task_id: Option<TaskId>,
        stop_on_error: Option<bool>,
    ) -> Result<TaskId, EngineError> {
        let notebook = self.canonicalize(notebook)?;
        let session = self.session(&notebook)?;

        if cell_index < ink_core::task::INTERNAL_CELL_INDEX {
            return Err(EngineError::InvalidCellIndex(cell_index));
        }
        if let Some(stop) = stop_on_error {
            session.stop_on_error.store(stop, Ordering::SeqCst);
        }

        // Backpressure before durability: a rejected submit must leave no
        // pending row behind.
        let permit = session.queue_tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                EngineError::QueueFull { capacity: session.queue_capacity }
            }
            mpsc::error::TrySendError::Closed(_) => {
                EngineError::SessionStopping(notebook.clone())
            }
        })?;

        let id = self.deps.store.enqueue(
            &notebook,
            cell_index,
            code,
            task_id,
            self.deps.clock.epoch_ms(),
        )?;

        permit.send(WorkerMsg::Task {
            task_id: id,
            cell_index,
            code: code.to_string(),
        });

        Ok(id)
    }

    /// Cancel a task: queued-not-started tasks never run; a running task is
    /// interrupted and becomes `cancelled` once the kernel reports idle.
    pub async fn cancel_task(
        self: &Arc<Self>,
        notebook: &Path,
        task_id: Option<TaskId>,
    ) -> Result<(), EngineError> {
        let notebook = self.canonicalize(notebook)?;
        let session = self.session(&notebook)?;

        let record = match task_id {
            Some(id) => session.record_for_task(id),
            None => session.running_record(),
        };

        if let Some(record) = record {
            if record.status() == TaskStatus::Running {
                record.finish(TaskStatus::Cancelled, Some("cancelled by client".to_string()));
                self.interrupt(&session).await?;
            }
            return Ok(());
        }

        // Not in flight: cancel it in the queue.
        let Some(id) = task_id else {
            return Err(EngineError::TaskNotFound(TaskId::from_string("")));
        };
        let task = self.deps.store.task(id)?.ok_or(EngineError::TaskNotFound(id))?;
        if task.status == TaskStatus::Pending {
            session.cancelled_pending.lock().insert(id);
            self.deps
                .store
                .mark_cancelled(id, "cancelled before execution", self.deps.clock.epoch_ms())?;
        }
        Ok(())
    }

    /// Answer a kernel `input()` request.
    pub async fn submit_input(&self, notebook: &Path, text: &str) -> Result<(), EngineError> {
        let notebook = self.canonicalize(notebook)?;
        let session = self.session(&notebook)?;
        session.waiting_for_input.store(false, Ordering::SeqCst);
        session.client.input_reply(text).await?;
        Ok(())
    }

    pub fn task_status(
        &self,
        notebook: &Path,
        task_id: TaskId,
    ) -> Result<TaskStatusReport, EngineError> {
        let task = self.deps.store.task(task_id)?.ok_or(EngineError::TaskNotFound(task_id))?;

        // In-flight record carries fresher streaming counters.
        let live = self
            .sessions
            .lock()
            .get(notebook)
            .and_then(|s| s.record_for_task(task_id))
            .map(|record| {
                let state = record.state.lock();
                (state.output_count, state.last_activity_ms)
            });

        let (outputs_count, last_activity_ms) = match live {
            Some((count, activity)) => (count, Some(activity)),
            None => {
                let stored = task
                    .outputs
                    .as_ref()
                    .and_then(|v| v.as_array().map(|a| a.len() as u64))
                    .unwrap_or(0);
                (stored, task.completed_at_ms)
            }
        };

        Ok(TaskStatusReport {
            task_id,
            status: task.status,
            outputs_count,
            last_activity_ms,
            execution_count: task.execution_count,
            error: task.error,
            failed_save: task.failed_save,
        })
    }

    pub fn detect_sync(
        &self,
        notebook: &Path,
        buffer_hashes: Option<&HashMap<i32, String>>,
    ) -> Result<DetectReport, EngineError> {
        let notebook = self.canonicalize(notebook)?;
        sync::detect(&notebook, buffer_hashes)
    }

    /// Re-run cells per the chosen strategy, queueing through the normal
    /// submit path.
    pub async fn resync(
        self: &Arc<Self>,
        notebook: &Path,
        strategy: SyncStrategy,
    ) -> Result<ResyncReport, EngineError> {
        let notebook = self.canonicalize(notebook)?;
        let session = self.session(&notebook)?;

        let (nb, _) = ink_notebook::read(&notebook)?;
        let total = nb.code_cells().count();
        let executed = session.executed_indices.lock().clone();
        let (cells, upstream_modified) = sync::plan(&nb, strategy, &executed);

        let mut queued = 0usize;
        let mut queue_full = false;
        for (cell_index, code) in cells {
            match self.submit(&notebook, cell_index, &code, None, None).await {
                Ok(_) => queued += 1,
                Err(EngineError::QueueFull { .. }) => {
                    warn!(cell = cell_index, "queue full during resync, stopping");
                    queue_full = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(ResyncReport {
            queued_count: queued,
            skipped_count: total - queued,
            strategy_used: strategy,
            upstream_modified,
            queue_full,
        })
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.lock().values().map(|s| self.session_info(s)).collect()
    }

    fn session_info(&self, session: &Arc<Session>) -> SessionInfo {
        SessionInfo {
            notebook_path: session.notebook.clone(),
            state: format!("{:?}", session.state()).to_lowercase(),
            env_name: session.env.env_name.clone(),
            interpreter: session.env.interpreter.clone(),
            started_at_ms: session.env.started_at_ms,
            session_uuid: session.env.session_uuid.clone(),
            execution_count: session.execution_counter.load(Ordering::SeqCst),
            queued: session.queued_len(),
            kernel_pid: session.pid,
            waiting_for_input: session.waiting_for_input.load(Ordering::SeqCst),
            last_probe_latency_ms: session.last_probe_latency_ms.load(Ordering::SeqCst),
            error: session.error.lock().clone(),
        }
    }

    /// Explicit asset GC for one notebook (client save, stop, restart).
    pub fn collect_garbage(&self, notebook: &Path) -> Result<usize, EngineError> {
        let notebook = self.canonicalize(notebook)?;
        Ok(collect_garbage(&self.deps.store, &notebook, self.deps.clock.epoch_ms()))
    }

    /// Flush deferred notebook writes for every session. The daemon calls
    /// this when the last subscriber disconnects.
    pub fn flush_all_dirty(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        for session in sessions {
            self.finalizer.flush_dirty(&session);
        }
    }

    /// Startup recovery: terminate zombies, re-attach surviving kernels,
    /// janitor stale assets, prune old terminal rows.
    pub async fn recover(self: &Arc<Self>) {
        let report =
            reconcile_zombies(&self.deps.config.sessions_dir(), std::process::id() as i32);

        for descriptor in report.attachable {
            match self.launcher.attach(&descriptor.connection_file).await {
                Ok(mut launched) => {
                    launched.interpreter = descriptor.env_info.interpreter.clone();
                    launched.env_name = descriptor.env_info.env_name.clone();
                    launched.pid = Some(descriptor.kernel_pid);
                    let spec = LaunchSpec {
                        notebook: descriptor.notebook_path.clone(),
                        cwd: descriptor
                            .notebook_path
                            .parent()
                            .map(Path::to_path_buf)
                            .unwrap_or_default(),
                        env_root: None,
                        connection_file: descriptor.connection_file.clone(),
                        start_timeout: self.deps.config.start_timeout,
                    };
                    let session =
                        self.build_session(&descriptor.notebook_path, launched, &spec, StartOptions::default());
                    self.persist_descriptor(&session);
                    self.spawn_session_tasks(&session);
                    self.requeue_pending(&session);
                    session.set_state(SessionState::Running);
                    self.sessions
                        .lock()
                        .insert(descriptor.notebook_path.clone(), session);
                    info!(
                        notebook = %descriptor.notebook_path.display(),
                        pid = descriptor.kernel_pid,
                        "re-attached session after restart"
                    );
                }
                Err(e) => {
                    warn!(
                        notebook = %descriptor.notebook_path.display(),
                        error = %e,
                        "re-attach failed, terminating surviving kernel"
                    );
                    let _ = ink_kernel::terminate_pid(descriptor.kernel_pid);
                    SessionDescriptor::remove(
                        &self.deps.config.sessions_dir(),
                        &descriptor.notebook_path,
                    );
                }
            }
        }

        crate::assets::startup_janitor(&self.deps.store, self.deps.clock.epoch_ms());

        if let Err(e) = self
            .deps
            .store
            .cleanup_completed(Duration::from_secs(24 * 3600), self.deps.clock.epoch_ms())
        {
            warn!(error = %e, "terminal-row cleanup failed");
        }
    }

    /// Graceful shutdown: stop every session (bounded), then checkpoint the
    /// store so the next startup skips WAL replay.
    pub async fn shutdown_all(self: &Arc<Self>) {
        let notebooks: Vec<PathBuf> = self.sessions.lock().keys().cloned().collect();
        for notebook in notebooks {
            let stop = tokio::time::timeout(Duration::from_secs(10), self.teardown(&notebook, false));
            if stop.await.is_err() {
                warn!(notebook = %notebook.display(), "session stop timed out during shutdown");
            }
        }
        if let Err(e) = self.deps.store.checkpoint() {
            warn!(error = %e, "final checkpoint failed");
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
