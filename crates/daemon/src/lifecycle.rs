// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, recovery, shutdown.

use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use ink_core::SystemClock;
use ink_engine::{EngineConfig, SessionManager, ZmqLauncher};
use ink_storage::Store;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::info;

use crate::rpc::{DaemonManager, RpcCtx};
use crate::subscribers::ConnectionManager;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/inkpot)
    pub data_dir: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Engine configuration derived from the environment
    pub engine: EngineConfig,
}

impl Config {
    pub fn load(data_dir: PathBuf) -> Self {
        Self {
            lock_path: data_dir.join("daemon.pid"),
            log_path: data_dir.join("daemon.log"),
            engine: crate::env::engine_config(data_dir.clone()),
            data_dir,
        }
    }
}

/// Daemon state during operation.
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub manager: Arc<DaemonManager>,
    pub connections: Arc<ConnectionManager>,
    pub start_time: Instant,
    pub shutdown: Arc<Notify>,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] ink_storage::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon: lock, open the store, wire the engine, run recovery.
pub async fn startup(config: Config) -> Result<DaemonState, LifecycleError> {
    std::fs::create_dir_all(&config.data_dir)?;

    // Acquire the lock FIRST. Open without truncating so a failed lock
    // attempt cannot wipe the running daemon's PID.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;

    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    let store = Arc::new(Store::open(
        &config.engine.wal_path(),
        &config.engine.snapshot_path(),
    )?);

    let connections = Arc::new(ConnectionManager::new());
    let manager: Arc<DaemonManager> = SessionManager::new(
        Arc::clone(&store),
        Arc::clone(&connections) as _,
        Arc::new(ZmqLauncher) as _,
        config.engine.clone(),
        SystemClock,
    );

    // Zombie reconciliation, kernel re-attach, asset janitor, row cleanup.
    manager.recover().await;

    info!(data_dir = %config.data_dir.display(), "daemon started");

    Ok(DaemonState {
        config,
        lock_file,
        manager,
        connections,
        start_time: Instant::now(),
        shutdown: Arc::new(Notify::new()),
    })
}

impl DaemonState {
    pub fn rpc_ctx(&self) -> Arc<RpcCtx> {
        Arc::new(RpcCtx {
            manager: Arc::clone(&self.manager),
            start_time: self.start_time,
            shutdown: Arc::clone(&self.shutdown),
        })
    }

    /// Graceful shutdown: stop sessions with their grace windows, write the
    /// final snapshot, release the lock file.
    pub async fn shutdown(self) {
        info!("shutting down daemon...");
        self.manager.shutdown_all().await;

        if self.config.lock_path.exists() {
            let _ = std::fs::remove_file(&self.config.lock_path);
        }
        info!("daemon shutdown complete");
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
