// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Inkpot engine: sessions, scheduling, I/O routing, finalization.
//!
//! One [`SessionManager`] owns the session table and wires the pieces
//! together per session: a queue worker, an iopub listener, a stdin
//! listener, a health probe and a kernel-exit monitor. Cross-component
//! references are callback-shaped (notifier, launcher, store) -- no
//! back-pointers.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod assets;
mod config;
mod deps;
mod finalize;
mod launcher;
mod manager;
mod multiplexer;
mod notify;
mod reap;
mod record;
mod sanitize;
mod scheduler;
mod secrets;
mod session;
mod sync;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use assets::{check_asset_limits, collect_garbage, ensure_assets_ignored, startup_janitor};
pub use config::EngineConfig;
pub use launcher::{KernelLauncher, LaunchSpec, LaunchedKernel, ZmqLauncher};
pub use manager::{SessionInfo, SessionManager, StartOptions, TaskStatusReport};
pub use notify::{NullNotifier, Notifier};
pub use reap::{reconcile_zombies, EnvDescriptor, ReapReport, SessionDescriptor};
pub use record::ExecutionRecord;
pub use session::{Session, SessionState};
pub use sync::{DetectReport, ResyncReport, SyncStrategy};

#[cfg(any(test, feature = "test-support"))]
pub use launcher::FakeLauncher;
#[cfg(any(test, feature = "test-support"))]
pub use notify::RecordingNotifier;

use std::path::PathBuf;

use ink_core::TaskId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] ink_storage::StoreError),

    #[error("kernel error: {0}")]
    Kernel(#[from] ink_kernel::KernelError),

    #[error("notebook error: {0}")]
    Notebook(#[from] ink_notebook::NotebookError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no active session for {0}")]
    SessionNotFound(PathBuf),

    #[error("session for {0} is stopping; retry shortly")]
    SessionStopping(PathBuf),

    #[error("kernel cap reached ({max} running); stop a session (e.g. {suggestion}) and retry")]
    KernelCapReached { max: usize, suggestion: String },

    #[error("execution queue full ({capacity} queued); retry later")]
    QueueFull { capacity: usize },

    #[error("invalid cell index {0}")]
    InvalidCellIndex(i32),

    #[error("invalid notebook path: {0}")]
    InvalidPath(String),

    #[error("unknown task {0}")]
    TaskNotFound(TaskId),
}
