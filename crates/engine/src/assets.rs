// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Asset directory upkeep: storage quota, explicit garbage collection,
//! ignore-file maintenance.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ink_storage::Store;
use tracing::{info, warn};

/// Pruning targets 80% of the cap to avoid thrashing at the boundary.
const PRUNE_TARGET_RATIO: f64 = 0.8;

/// Reactive quota enforcement, called after asset writes. Deletes oldest
/// files by mtime until the directory is back under 80% of `cap_bytes`;
/// undeletable files are skipped and logged.
pub fn check_asset_limits(assets_dir: &Path, cap_bytes: u64) {
    let Ok(entries) = std::fs::read_dir(assets_dir) else {
        return;
    };

    let mut files: Vec<(PathBuf, u64, std::time::SystemTime)> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let meta = entry.metadata().ok()?;
            if !meta.is_file() {
                return None;
            }
            Some((entry.path(), meta.len(), meta.modified().ok()?))
        })
        .collect();

    let mut total: u64 = files.iter().map(|(_, size, _)| size).sum();
    if total <= cap_bytes {
        return;
    }

    let target = (cap_bytes as f64 * PRUNE_TARGET_RATIO) as u64;
    files.sort_by_key(|(_, _, mtime)| *mtime);

    for (path, size, _) in files {
        if total <= target {
            break;
        }
        if safe_unlink(&path) {
            total = total.saturating_sub(size);
        } else {
            warn!(file = %path.display(), "could not delete asset over quota, skipping");
        }
    }
}

/// Delete with bounded retries; viewers occasionally hold files open.
pub(crate) fn safe_unlink(path: &Path) -> bool {
    for attempt in 0..3u32 {
        match std::fs::remove_file(path) {
            Ok(()) => return true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
            Err(_) if attempt < 2 => {
                std::thread::sleep(Duration::from_millis(100 * (1 << attempt)));
            }
            Err(_) => return false,
        }
    }
    false
}

/// Explicit asset GC for one notebook: delete assets whose lease expired
/// AND which the notebook on disk no longer references. Returns how many
/// files were removed.
pub fn collect_garbage(store: &Arc<Store>, notebook: &Path, now_ms: u64) -> usize {
    let expired = match store.expired_assets(now_ms) {
        Ok(expired) => expired,
        Err(e) => {
            warn!(error = %e, "asset GC could not read leases");
            return 0;
        }
    };

    // Reference check against the serialized notebook: content-addressed
    // filenames are unique enough to search for directly.
    let notebook_text = std::fs::read_to_string(notebook).unwrap_or_default();

    let mut removed = 0;
    for lease in expired.iter().filter(|l| l.notebook == notebook) {
        let referenced = lease
            .asset_path
            .file_name()
            .map(|name| notebook_text.contains(&name.to_string_lossy().into_owned()))
            .unwrap_or(false);
        if referenced {
            continue;
        }
        if safe_unlink(&lease.asset_path) {
            if let Err(e) = store.drop_lease(&lease.asset_path) {
                warn!(asset = %lease.asset_path.display(), error = %e, "failed to drop lease");
            }
            removed += 1;
        }
    }

    if removed > 0 {
        info!(notebook = %notebook.display(), removed, "asset GC removed expired assets");
    }
    removed
}

/// Startup pass: prune expired-and-unreferenced assets across every lease
/// in the store. A hard kill can leave quota enforcement unrun; this keeps
/// stale files from living forever.
pub fn startup_janitor(store: &Arc<Store>, now_ms: u64) -> usize {
    let expired = match store.expired_assets(now_ms) {
        Ok(expired) => expired,
        Err(_) => return 0,
    };

    let mut removed = 0;
    let mut by_notebook: std::collections::HashMap<PathBuf, String> = Default::default();
    for lease in expired {
        let text = by_notebook
            .entry(lease.notebook.clone())
            .or_insert_with(|| std::fs::read_to_string(&lease.notebook).unwrap_or_default());
        let referenced = lease
            .asset_path
            .file_name()
            .map(|name| text.contains(&name.to_string_lossy().into_owned()))
            .unwrap_or(false);
        if referenced {
            continue;
        }
        if safe_unlink(&lease.asset_path) && store.drop_lease(&lease.asset_path).is_ok() {
            removed += 1;
        }
    }

    if removed > 0 {
        info!(removed, "startup janitor removed stale assets");
    }
    removed
}

/// Add `assets/` to the project's ignore file, if the project has one.
/// Walks up from the notebook directory looking for a `.gitignore`.
pub fn ensure_assets_ignored(notebook_dir: &Path) {
    let mut current = notebook_dir;
    for _ in 0..10 {
        let gitignore = current.join(".gitignore");
        if gitignore.exists() {
            let content = std::fs::read_to_string(&gitignore).unwrap_or_default();
            let already = content.lines().any(|line| {
                let line = line.trim();
                line == "assets/" || line == "assets" || line == "**/assets/"
            });
            if !already {
                let mut updated = content;
                if !updated.is_empty() && !updated.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push_str("assets/\n");
                if let Err(e) = std::fs::write(&gitignore, updated) {
                    warn!(file = %gitignore.display(), error = %e, "could not update ignore file");
                }
            }
            return;
        }
        if current.join(".git").exists() {
            return;
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return,
        }
    }
}

#[cfg(test)]
#[path = "assets_tests.rs"]
mod tests;
