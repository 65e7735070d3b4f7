// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal `.ipynb` document model (nbformat 4.5).
//!
//! Only what the finalizer and sync detection need: read/migrate, atomic
//! write, cell output updates with provenance metadata, and the
//! whitespace-normalized execution hash.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod document;
mod hash;
mod output;
mod write;

pub use document::{Cell, CellType, Notebook, SourceText, PROVENANCE_KEY};
pub use hash::execution_hash;
pub use output::Output;
pub use write::atomic_write;

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotebookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid notebook JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cell index {index} out of range ({len} cells)")]
    CellIndexOutOfRange { index: i32, len: usize },
}

/// Read a notebook, migrating it to 4.5 (stable cell ids) in memory.
/// Returns the document and whether a migration happened; callers persist
/// migrated documents atomically so fresh ids survive.
pub fn read(path: &Path) -> Result<(Notebook, bool), NotebookError> {
    let raw = std::fs::read(path)?;
    let mut nb: Notebook = serde_json::from_slice(&raw)?;
    let migrated = nb.ensure_cell_ids();
    Ok((nb, migrated))
}

/// Write a notebook atomically (tempfile in the same directory + rename).
pub fn save(nb: &Notebook, path: &Path) -> Result<(), NotebookError> {
    let payload = serde_json::to_vec_pretty(nb)?;
    atomic_write(path, &payload)?;
    Ok(())
}

/// Update one cell's outputs, execution count and provenance block, writing
/// the file atomically. The provenance block lands under the stable
/// [`PROVENANCE_KEY`] cell-metadata key.
pub fn save_cell_execution(
    path: &Path,
    index: i32,
    outputs: &[Output],
    execution_count: Option<i32>,
    provenance: Option<serde_json::Value>,
) -> Result<(), NotebookError> {
    let (mut nb, _) = read(path)?;
    let len = nb.cells.len();
    let slot = usize::try_from(index)
        .ok()
        .and_then(|i| nb.cells.get_mut(i))
        .ok_or(NotebookError::CellIndexOutOfRange { index, len })?;

    slot.outputs = outputs.to_vec();
    slot.execution_count = execution_count;
    if let Some(provenance) = provenance {
        let meta = slot.metadata.as_object_mut();
        if let Some(meta) = meta {
            match meta.get_mut(PROVENANCE_KEY).and_then(|v| v.as_object_mut()) {
                Some(existing) => {
                    if let Some(update) = provenance.as_object() {
                        for (k, v) in update {
                            existing.insert(k.clone(), v.clone());
                        }
                    }
                }
                None => {
                    meta.insert(PROVENANCE_KEY.to_string(), provenance);
                }
            }
        }
    }

    save(&nb, path)
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
