// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Writing and loading zstd-compressed snapshots.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::snapshot::{rotate_bak_path, Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
use crate::state::MaterializedState;

const ZSTD_LEVEL: i32 = 3;

/// Result of a checkpoint write.
#[derive(Debug)]
pub struct CheckpointResult {
    pub seq: u64,
    pub size_bytes: u64,
}

/// Writes snapshots atomically (tempfile + rename) with zstd compression.
pub struct Checkpointer {
    path: PathBuf,
}

impl Checkpointer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Write a snapshot of `state` at WAL sequence `seq`.
    pub fn checkpoint_sync(
        &self,
        seq: u64,
        state: &MaterializedState,
    ) -> Result<CheckpointResult, SnapshotError> {
        let snapshot = Snapshot {
            version: CURRENT_SNAPSHOT_VERSION,
            seq,
            state: state.clone(),
            created_at: Utc::now(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp)?;
            let mut encoder = zstd::Encoder::new(file, ZSTD_LEVEL)?;
            serde_json::to_writer(&mut encoder, &snapshot)?;
            let mut file = encoder.finish()?;
            file.flush()?;
            file.sync_data()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        let size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(CheckpointResult { seq, size_bytes })
    }
}

/// Load the snapshot at `path`, if one exists.
///
/// A snapshot that fails to parse is rotated to `.bak` and treated as
/// absent -- recovery then replays the full WAL instead of failing startup.
pub fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let parsed: Result<Snapshot, SnapshotError> = (|| {
        let mut decoder = zstd::Decoder::new(file)?;
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;
        Ok(serde_json::from_slice(&raw)?)
    })();

    match parsed {
        Ok(snapshot) => {
            if snapshot.version > CURRENT_SNAPSHOT_VERSION {
                return Err(SnapshotError::UnsupportedVersion(snapshot.version));
            }
            Ok(Some(snapshot))
        }
        Err(e) => {
            let bak = rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak.display(),
                error = %e,
                "unreadable snapshot, rotating and replaying full WAL"
            );
            let _ = std::fs::rename(path, &bak);
            Ok(None)
        }
    }
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
