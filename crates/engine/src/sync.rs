// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel ↔ notebook sync detection and recovery.
//!
//! A cell is "in sync" when the hash of its current source matches the
//! execution hash stored in its provenance block. `detect` reports drift;
//! `plan` picks which cells a resync should re-run for a given strategy.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use ink_notebook::{execution_hash, Notebook};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Only run cells never executed; refuse when an executed upstream cell
    /// changed (ask for a stronger strategy instead).
    MinimalAppend,
    /// Changed cells plus cells that read names the changed cells assign.
    Smart,
    /// From the first changed cell to the end.
    Incremental,
    /// Every code cell, from scratch.
    Full,
    /// Like `Full`, but also overrides the minimal-append refusal.
    Force,
}

impl Default for SyncStrategy {
    fn default() -> Self {
        SyncStrategy::MinimalAppend
    }
}

impl std::str::FromStr for SyncStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal_append" => Ok(SyncStrategy::MinimalAppend),
            "smart" => Ok(SyncStrategy::Smart),
            "incremental" => Ok(SyncStrategy::Incremental),
            "full" => Ok(SyncStrategy::Full),
            "force" => Ok(SyncStrategy::Force),
            other => Err(format!("unknown sync strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectReport {
    pub sync_needed: bool,
    pub reason: String,
    pub changed_cells: Vec<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResyncReport {
    pub queued_count: usize,
    pub skipped_count: usize,
    pub strategy_used: SyncStrategy,
    /// Minimal-append refused because an already-executed cell changed.
    pub upstream_modified: bool,
    /// Submission stopped early on queue backpressure.
    pub queue_full: bool,
}

/// Compare current cell hashes against stored provenance hashes.
///
/// `buffer_hashes` (editor buffer state, keyed by cell index) wins over the
/// on-disk source when provided.
pub fn detect(
    notebook_path: &Path,
    buffer_hashes: Option<&HashMap<i32, String>>,
) -> Result<DetectReport, EngineError> {
    let (nb, migrated) = ink_notebook::read(notebook_path)?;
    if migrated {
        // First read of a pre-4.5 notebook: persist the fresh cell ids so
        // they stay stable across sessions.
        ink_notebook::save(&nb, notebook_path)?;
    }

    let mut changed = Vec::new();
    for (index, cell) in nb.code_cells() {
        let index = index as i32;
        let current = match buffer_hashes {
            Some(hashes) => match hashes.get(&index) {
                Some(hash) => hash.clone(),
                None => execution_hash(&cell.source.as_string()),
            },
            None => execution_hash(&cell.source.as_string()),
        };
        match cell.stored_execution_hash() {
            Some(stored) if stored == current => {}
            _ => changed.push(index),
        }
    }

    let sync_needed = !changed.is_empty();
    Ok(DetectReport {
        reason: if sync_needed {
            format!("content mismatch in {} cells", changed.len())
        } else {
            "content matches execution history".to_string()
        },
        sync_needed,
        changed_cells: changed,
    })
}

/// The cells (index, source) a resync should submit, in execution order.
///
/// `executed` is the set of indices the session already ran; `upstream
/// modified` is flagged when minimal-append finds drift in one of them.
pub fn plan(
    nb: &Notebook,
    strategy: SyncStrategy,
    executed: &HashSet<i32>,
) -> (Vec<(i32, String)>, bool) {
    let cells: Vec<(i32, String, bool)> = nb
        .code_cells()
        .map(|(index, cell)| {
            let source = cell.source.as_string();
            let changed = match cell.stored_execution_hash() {
                Some(stored) => stored != execution_hash(&source),
                None => true,
            };
            (index as i32, source, changed)
        })
        .collect();

    match strategy {
        SyncStrategy::Full | SyncStrategy::Force => {
            (cells.into_iter().map(|(i, s, _)| (i, s)).collect(), false)
        }

        SyncStrategy::Incremental => {
            let first_changed = cells.iter().find(|(_, _, changed)| *changed).map(|(i, _, _)| *i);
            match first_changed {
                Some(first) => (
                    cells.into_iter().filter(|(i, _, _)| *i >= first).map(|(i, s, _)| (i, s)).collect(),
                    false,
                ),
                None => (Vec::new(), false),
            }
        }

        SyncStrategy::MinimalAppend => {
            // Refuse when an executed cell's content drifted: replaying only
            // new cells on top of stale upstream state is how hidden-state
            // bugs are born.
            let upstream_modified =
                cells.iter().any(|(i, _, changed)| *changed && executed.contains(i));
            if upstream_modified {
                return (Vec::new(), true);
            }
            (
                cells
                    .into_iter()
                    .filter(|(i, _, changed)| *changed && !executed.contains(i))
                    .map(|(i, s, _)| (i, s))
                    .collect(),
                false,
            )
        }

        SyncStrategy::Smart => (smart_plan(&cells), false),
    }
}

/// Changed cells plus downstream cells that read names the changed cells
/// assign, propagated transitively. A light, name-based approximation of
/// dataflow.
fn smart_plan(cells: &[(i32, String, bool)]) -> Vec<(i32, String)> {
    let assign_re = Regex::new(r"(?m)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=[^=]");

    let mut rerun: HashSet<i32> = cells
        .iter()
        .filter(|(_, _, changed)| *changed)
        .map(|(i, _, _)| *i)
        .collect();
    let mut tainted: HashSet<String> = HashSet::new();

    if let Ok(assign_re) = assign_re {
        for (index, source, _) in cells {
            let reads_tainted = tainted.iter().any(|name| mentions_name(source, name));
            if rerun.contains(index) || reads_tainted {
                rerun.insert(*index);
                for captures in assign_re.captures_iter(source) {
                    if let Some(name) = captures.get(1) {
                        tainted.insert(name.as_str().to_string());
                    }
                }
            }
        }
    }

    cells
        .iter()
        .filter(|(i, _, _)| rerun.contains(i))
        .map(|(i, s, _)| (*i, s.clone()))
        .collect()
}

fn mentions_name(source: &str, name: &str) -> bool {
    source
        .match_indices(name)
        .any(|(at, _)| {
            let before = source[..at].chars().next_back();
            let after = source[at + name.len()..].chars().next();
            let boundary =
                |c: Option<char>| c.is_none_or(|c| !(c.is_alphanumeric() || c == '_'));
            boundary(before) && boundary(after)
        })
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
