// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay

mod leases;
mod tasks;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ink_core::{AssetLease, Event, TaskId, TaskRecord, TaskStatus};
use serde::{Deserialize, Serialize};

/// Materialized state built from WAL operations.
///
/// Two maps stand in for the two durable tables: the execution queue and
/// the asset leases.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MaterializedState {
    pub tasks: HashMap<TaskId, TaskRecord>,
    pub leases: HashMap<PathBuf, AssetLease>,
}

/// Row counts by status, for the status surface.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub timeout: usize,
    pub active_leases: usize,
}

impl MaterializedState {
    /// Apply an event to derive state changes.
    ///
    /// This is the event-sourcing approach where state is derived from events.
    /// Events are facts about what happened; state is derived from those facts.
    ///
    /// # Idempotency Requirement
    ///
    /// **All event handlers MUST be idempotent.** Applying the same event
    /// twice must produce the same state as applying it once, because events
    /// are applied once at commit time and again during WAL replay after a
    /// crash. Guidelines:
    ///
    /// - Use assignment (`=`) instead of mutation (`+=`, `-=`)
    /// - Guard increments with status checks (only increment on transition)
    /// - Guard inserts with existence checks where insertion is not an
    ///   overwrite by design
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::TaskEnqueued { .. }
            | Event::TaskStarted { .. }
            | Event::TaskCompleted { .. }
            | Event::TaskFailed { .. }
            | Event::TaskCancelled { .. }
            | Event::TaskTimedOut { .. }
            | Event::TaskSaveFailed { .. }
            | Event::TaskPruned { .. } => tasks::apply(self, event),

            Event::LeaseRenewed { .. } | Event::LeaseDropped { .. } => {
                leases::apply(self, event)
            }
        }
    }

    /// Pending tasks ordered by `created_at` ascending (id as tiebreaker so
    /// the order is total). `notebook = None` returns pending tasks across
    /// every notebook -- used by startup recovery.
    pub fn pending_tasks(&self, notebook: Option<&Path>) -> Vec<TaskRecord> {
        let mut rows: Vec<TaskRecord> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| notebook.is_none_or(|nb| t.notebook == nb))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        rows
    }

    /// Leases whose expiry has passed.
    pub fn expired_leases(&self, now_ms: u64) -> Vec<AssetLease> {
        self.leases.values().filter(|l| l.is_expired(now_ms)).cloned().collect()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats { active_leases: self.leases.len(), ..Default::default() };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
                TaskStatus::TimedOut => stats.timeout += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
#[path = "../state_tests.rs"]
mod tests;
