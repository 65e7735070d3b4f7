// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ink_core::{SystemClock, TaskId, TaskStatus};
use ink_notebook::Notebook;
use ink_storage::Store;

use crate::config::EngineConfig;
use crate::launcher::FakeLauncher;
use crate::manager::SessionManager;
use crate::notify::RecordingNotifier;

pub(crate) struct TestHarness {
    pub dir: tempfile::TempDir,
    pub manager: Arc<SessionManager<SystemClock>>,
    pub launcher: Arc<FakeLauncher>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<Store>,
}

impl TestHarness {
    pub fn config(&self) -> EngineConfig {
        self.manager.config().clone()
    }

    /// Write a notebook fixture with one code cell per source.
    pub fn notebook(&self, name: &str, sources: &[&str]) -> PathBuf {
        let path = self.dir.path().join(name);
        let nb = Notebook::with_code_cells(sources);
        ink_notebook::save(&nb, &path).unwrap();
        path
    }

    /// Poll the store until the task reaches `status` (or panic after 5s).
    pub async fn wait_status(&self, id: TaskId, status: TaskStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(task) = self.store.task(id).unwrap() {
                if task.status == status {
                    return;
                }
                assert!(
                    !task.status.is_terminal() || task.status == status,
                    "task {id} settled at {:?}, wanted {status:?}",
                    task.status
                );
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for task {id} to reach {status:?}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until the task is terminal, returning its final status.
    pub async fn wait_terminal(&self, id: TaskId) -> TaskStatus {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(task) = self.store.task(id).unwrap() {
                if task.status.is_terminal() {
                    return task.status;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for task {id} to settle"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn build(launcher: FakeLauncher, config_tweak: impl FnOnce(&mut EngineConfig)) -> TestHarness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig { data_dir: dir.path().to_path_buf(), ..Default::default() };
    config_tweak(&mut config);

    let store = Arc::new(
        Store::open(&config.wal_path(), &config.snapshot_path()).unwrap(),
    );
    let notifier = Arc::new(RecordingNotifier::new());
    let launcher = Arc::new(launcher);
    let manager = SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&notifier) as Arc<dyn crate::notify::Notifier>,
        Arc::clone(&launcher) as Arc<dyn crate::launcher::KernelLauncher>,
        config,
        SystemClock,
    );

    TestHarness { dir, manager, launcher, notifier, store }
}

/// Harness over auto-executing fake kernels.
pub(crate) fn harness() -> TestHarness {
    build(FakeLauncher::new(), |_| {})
}

pub(crate) fn harness_with(config_tweak: impl FnOnce(&mut EngineConfig)) -> TestHarness {
    build(FakeLauncher::new(), config_tweak)
}

/// Harness whose fake kernels never respond on their own.
pub(crate) fn manual_harness() -> TestHarness {
    build(FakeLauncher::manual(), |_| {})
}

/// Store opened over an arbitrary directory (no manager).
pub(crate) fn open_store(dir: &Path) -> Arc<Store> {
    Arc::new(
        Store::open(&dir.join("wal").join("events.wal"), &dir.join("snapshot.json")).unwrap(),
    )
}

/// A session wired directly over a fake transport, bypassing the manager.
/// For multiplexer/finalizer tests that drive iopub by hand.
pub(crate) struct BareSession {
    pub session: Arc<crate::session::Session>,
    pub deps: Arc<crate::deps::Deps<SystemClock>>,
    pub finalizer: Arc<crate::finalize::Finalizer<SystemClock>>,
    pub transport: ink_kernel::FakeTransport,
    pub notifier: Arc<RecordingNotifier>,
}

pub(crate) fn bare_session(
    dir: &Path,
    notebook: PathBuf,
    config_tweak: impl FnOnce(&mut EngineConfig),
) -> BareSession {
    use crate::session::{EnvInfo, Session};
    use ink_kernel::KernelClient;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64};

    let mut config = EngineConfig { data_dir: dir.to_path_buf(), ..Default::default() };
    config_tweak(&mut config);

    let store = open_store(dir);
    let notifier = Arc::new(RecordingNotifier::new());
    let deps = Arc::new(crate::deps::Deps {
        store,
        notifier: Arc::clone(&notifier) as Arc<dyn crate::notify::Notifier>,
        config,
        clock: SystemClock,
    });
    let finalizer = Arc::new(crate::finalize::Finalizer::new(Arc::clone(&deps)));

    let transport = ink_kernel::FakeTransport::new().manual();
    let client = KernelClient::new(Arc::new(transport.clone()));
    let (queue_tx, queue_rx) = tokio::sync::mpsc::channel(deps.config.queue_capacity);

    let session = Arc::new(Session {
        notebook,
        client,
        process: Mutex::new(None),
        env: EnvInfo {
            interpreter: PathBuf::from("python3"),
            env_name: "fake".to_string(),
            started_at_ms: 0,
            session_uuid: "sess-uuid".to_string(),
        },
        env_root: None,
        connection_file: dir.join("kernel-test.json"),
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
        execution_timeout: Mutex::new(Duration::from_secs(300)),
        state: Mutex::new(crate::session::SessionState::Running),
        error: Mutex::new(None),
        queue_tx,
        queue_rx: Mutex::new(Some(queue_rx)),
        queue_capacity: deps.config.queue_capacity,
        cancel: tokio_util::sync::CancellationToken::new(),
        tasks: Mutex::new(Vec::new()),
        pid: None,
    });

    BareSession { session, deps, finalizer, transport, notifier }
}
