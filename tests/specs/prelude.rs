// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared spec fixtures: a manager over fake kernels in a temp data dir.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ink_core::{SystemClock, TaskId, TaskStatus};
use ink_engine::{EngineConfig, FakeLauncher, RecordingNotifier, SessionManager};
use ink_notebook::Notebook;
use ink_storage::Store;

pub struct Server {
    pub manager: Arc<SessionManager<SystemClock>>,
    pub store: Arc<Store>,
    pub launcher: Arc<FakeLauncher>,
    pub notifier: Arc<RecordingNotifier>,
}

pub struct World {
    pub dir: tempfile::TempDir,
}

impl World {
    pub fn new() -> Self {
        Self { dir: tempfile::tempdir().expect("tempdir") }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    /// Boot a server instance against this world's data dir. Call again
    /// after dropping the previous one to simulate a restart.
    pub fn boot(&self) -> Server {
        self.boot_with(|_| {})
    }

    /// Boot over fake kernels that never respond on their own; specs drive
    /// iopub by hand.
    pub fn boot_manual(&self) -> Server {
        self.boot_inner(FakeLauncher::manual(), |_| {})
    }

    pub fn boot_with(&self, tweak: impl FnOnce(&mut EngineConfig)) -> Server {
        self.boot_inner(FakeLauncher::new(), tweak)
    }

    fn boot_inner(
        &self,
        launcher: FakeLauncher,
        tweak: impl FnOnce(&mut EngineConfig),
    ) -> Server {
        let mut config = EngineConfig { data_dir: self.data_dir(), ..Default::default() };
        tweak(&mut config);

        let store = Arc::new(
            Store::open(&config.wal_path(), &config.snapshot_path()).expect("store open"),
        );
        let launcher = Arc::new(launcher);
        let notifier = Arc::new(RecordingNotifier::new());
        let manager = SessionManager::new(
            Arc::clone(&store),
            Arc::clone(&notifier) as _,
            Arc::clone(&launcher) as _,
            config,
            SystemClock,
        );
        Server { manager, store, launcher, notifier }
    }

    pub fn notebook(&self, name: &str, sources: &[&str]) -> PathBuf {
        let path = self.dir.path().join(name);
        ink_notebook::save(&Notebook::with_code_cells(sources), &path).expect("write notebook");
        std::fs::canonicalize(&path).expect("canonicalize")
    }
}

pub async fn wait_terminal(store: &Arc<Store>, id: TaskId) -> TaskStatus {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(task) = store.task(id).expect("store read") {
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

/// Wait until the notebook on disk satisfies `check`.
pub async fn wait_notebook(path: &Path, check: impl Fn(&Notebook) -> bool) -> Notebook {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok((nb, _)) = ink_notebook::read(path) {
            if check(&nb) {
                return nb;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "notebook {} never reached the expected state",
            path.display()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
