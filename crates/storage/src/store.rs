// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable store facade: execution queue + asset leases.
//!
//! Every mutation appends one event to the WAL, flushes it to disk, and then
//! applies it to the materialized state -- commit-before-acknowledge. Nothing
//! here is held across kernel I/O; callers treat each method as one short
//! synchronous transaction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ink_core::{AssetLease, Event, TaskId, TaskRecord, TaskStatus};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use crate::checkpoint::{load_snapshot, Checkpointer};
use crate::snapshot::SnapshotError;
use crate::state::{MaterializedState, StoreStats};
use crate::wal::{Wal, WalError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("illegal status transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

struct Inner {
    wal: Wal,
    state: MaterializedState,
}

/// Thread-safe durable store. Cheap to share behind an `Arc`.
pub struct Store {
    inner: Mutex<Inner>,
    snapshot_path: PathBuf,
}

impl Store {
    /// Open the store: load the latest snapshot (if any), open the WAL at
    /// the snapshot's sequence, and replay newer entries.
    pub fn open(wal_path: &Path, snapshot_path: &Path) -> Result<Self, StoreError> {
        let (mut state, processed_seq) = match load_snapshot(snapshot_path)? {
            Some(snapshot) => {
                info!(
                    seq = snapshot.seq,
                    tasks = snapshot.state.tasks.len(),
                    leases = snapshot.state.leases.len(),
                    "loaded store snapshot"
                );
                (snapshot.state, snapshot.seq)
            }
            None => (MaterializedState::default(), 0),
        };

        let wal = Wal::open(wal_path, processed_seq)?;
        let replay = wal.entries_after(processed_seq)?;
        let replay_count = replay.len();
        for entry in replay {
            state.apply_event(&entry.event);
        }
        if replay_count > 0 {
            info!(count = replay_count, after = processed_seq, "replayed WAL entries");
        }

        Ok(Self {
            inner: Mutex::new(Inner { wal, state }),
            snapshot_path: snapshot_path.to_path_buf(),
        })
    }

    /// Append, flush, apply: the single commit path for every mutation.
    fn commit(&self, event: Event) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let seq = inner.wal.append(&event)?;
        inner.wal.flush()?;
        inner.state.apply_event(&event);
        inner.wal.mark_processed(seq);
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&MaterializedState) -> R) -> R {
        f(&self.inner.lock().state)
    }

    /// Insert a pending row. Idempotent on `task_id`: re-enqueueing an
    /// existing id atomically overwrites the row.
    pub fn enqueue(
        &self,
        notebook: &Path,
        cell_index: i32,
        code: &str,
        task_id: Option<TaskId>,
        now_ms: u64,
    ) -> Result<TaskId, StoreError> {
        let id = task_id.unwrap_or_default();
        self.commit(Event::TaskEnqueued {
            id,
            notebook: notebook.to_path_buf(),
            cell_index,
            code: code.to_string(),
            created_at_ms: now_ms,
        })?;
        Ok(id)
    }

    /// Pending rows ordered by `created_at` ascending; `None` spans all
    /// notebooks (startup recovery).
    pub fn pending_tasks(&self, notebook: Option<&Path>) -> Result<Vec<TaskRecord>, StoreError> {
        Ok(self.read(|s| s.pending_tasks(notebook)))
    }

    pub fn task(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        Ok(self.read(|s| s.tasks.get(&id).cloned()))
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(self.read(MaterializedState::stats))
    }

    fn check_transition(&self, id: TaskId, to: TaskStatus) -> Result<(), StoreError> {
        let from = self
            .read(|s| s.tasks.get(&id).map(|t| t.status))
            .ok_or(StoreError::UnknownTask(id))?;
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition { id, from, to });
        }
        Ok(())
    }

    pub fn mark_running(&self, id: TaskId, now_ms: u64) -> Result<(), StoreError> {
        self.check_transition(id, TaskStatus::Running)?;
        self.commit(Event::TaskStarted { id, started_at_ms: now_ms })
    }

    pub fn mark_complete(
        &self,
        id: TaskId,
        outputs: Option<serde_json::Value>,
        execution_count: Option<i32>,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.check_transition(id, TaskStatus::Completed)?;
        self.commit(Event::TaskCompleted { id, outputs, execution_count, completed_at_ms: now_ms })
    }

    pub fn mark_failed(&self, id: TaskId, error: &str, now_ms: u64) -> Result<(), StoreError> {
        self.check_transition(id, TaskStatus::Failed)?;
        self.commit(Event::TaskFailed { id, error: error.to_string(), completed_at_ms: now_ms })
    }

    pub fn mark_cancelled(&self, id: TaskId, reason: &str, now_ms: u64) -> Result<(), StoreError> {
        self.check_transition(id, TaskStatus::Cancelled)?;
        self.commit(Event::TaskCancelled { id, reason: reason.to_string(), completed_at_ms: now_ms })
    }

    pub fn mark_timeout(&self, id: TaskId, error: &str, now_ms: u64) -> Result<(), StoreError> {
        self.check_transition(id, TaskStatus::TimedOut)?;
        self.commit(Event::TaskTimedOut { id, error: error.to_string(), completed_at_ms: now_ms })
    }

    /// Record a notebook-write failure without changing the terminal status.
    pub fn mark_save_failed(&self, id: TaskId, error: &str) -> Result<(), StoreError> {
        if self.read(|s| !s.tasks.contains_key(&id)) {
            return Err(StoreError::UnknownTask(id));
        }
        self.commit(Event::TaskSaveFailed { id, error: error.to_string() })
    }

    /// Create or renew an asset lease: `last_seen = now`,
    /// `lease_expires = now + ttl`, `created_at` untouched on renewal.
    pub fn renew_lease(
        &self,
        asset: &Path,
        notebook: &Path,
        ttl: Duration,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.commit(Event::LeaseRenewed {
            asset: asset.to_path_buf(),
            notebook: notebook.to_path_buf(),
            last_seen_ms: now_ms,
            lease_expires_ms: now_ms + ttl.as_millis() as u64,
        })
    }

    /// Leases with `lease_expires < now`.
    pub fn expired_assets(&self, now_ms: u64) -> Result<Vec<AssetLease>, StoreError> {
        Ok(self.read(|s| s.expired_leases(now_ms)))
    }

    pub fn drop_lease(&self, asset: &Path) -> Result<(), StoreError> {
        self.commit(Event::LeaseDropped { asset: asset.to_path_buf() })
    }

    /// Delete terminal-status rows older than `age`. Returns how many were
    /// pruned.
    pub fn cleanup_completed(&self, age: Duration, now_ms: u64) -> Result<usize, StoreError> {
        let cutoff = now_ms.saturating_sub(age.as_millis() as u64);
        let stale: Vec<TaskId> = self.read(|s| {
            s.tasks
                .values()
                .filter(|t| t.is_terminal())
                .filter(|t| t.completed_at_ms.unwrap_or(t.created_at_ms) < cutoff)
                .map(|t| t.id)
                .collect()
        });
        for id in &stale {
            self.commit(Event::TaskPruned { id: *id })?;
        }
        Ok(stale.len())
    }

    /// Snapshot current state and truncate the WAL behind it.
    pub fn checkpoint(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        inner.wal.flush()?;
        let seq = inner.wal.processed_seq();
        if seq == 0 {
            return Ok(0);
        }
        let checkpointer = Checkpointer::new(self.snapshot_path.clone());
        let result = checkpointer.checkpoint_sync(seq, &inner.state)?;
        inner.wal.truncate_before(seq + 1)?;
        info!(seq = result.seq, size_bytes = result.size_bytes, "store checkpoint");
        Ok(seq)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
