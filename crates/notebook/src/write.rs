// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic file replacement.

use std::io::Write;
use std::path::Path;

/// Write `payload` to `path` atomically: a named tempfile in the same
/// directory (same filesystem, so the rename cannot cross devices), fsync,
/// then rename into place. A crash mid-write leaves either the old file or
/// the new one, never a torn mix.
pub fn atomic_write(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(
            ".{}.",
            path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
        ))
        .suffix(".tmp")
        .tempfile_in(dir)?;

    tmp.write_all(payload)?;
    tmp.flush()?;
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
#[path = "write_tests.rs"]
mod tests;
