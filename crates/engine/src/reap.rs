// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Zombie kernel reconciliation.
//!
//! Each running session persists a descriptor file so a restarted server
//! can find kernels the previous instance left behind. A kernel is a
//! zombie iff its owning server is dead OR its connection file is
//! missing/invalid. Kernels owned by a *different live server* are never
//! touched.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ink_kernel::{pid_alive, ConnectionInfo};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// One persisted session descriptor, one file per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub notebook_path: PathBuf,
    pub connection_file: PathBuf,
    pub kernel_pid: i32,
    pub server_pid: i32,
    pub env_info: EnvDescriptor,
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvDescriptor {
    pub interpreter: PathBuf,
    pub env_name: String,
}

impl SessionDescriptor {
    /// Descriptor filename: hash of the notebook path, so special
    /// characters never leak into the filesystem.
    pub fn path_for(sessions_dir: &Path, notebook: &Path) -> PathBuf {
        let digest = hex::encode(Sha256::digest(notebook.to_string_lossy().as_bytes()));
        sessions_dir.join(format!("session_{}.json", &digest[..16]))
    }

    pub fn write(&self, sessions_dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(sessions_dir)?;
        let path = Self::path_for(sessions_dir, &self.notebook_path);
        let payload = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, payload)
    }

    pub fn remove(sessions_dir: &Path, notebook: &Path) {
        let _ = std::fs::remove_file(Self::path_for(sessions_dir, notebook));
    }

    /// Whether the connection file still exists and parses.
    pub fn connection_valid(&self) -> bool {
        ConnectionInfo::read(&self.connection_file).is_ok()
    }
}

/// Outcome of startup reconciliation.
#[derive(Debug, Default)]
pub struct ReapReport {
    /// Kernel PIDs terminated as zombies.
    pub killed: Vec<i32>,
    /// Stale descriptor files deleted.
    pub cleaned: usize,
    /// Descriptors whose kernel is alive and re-attachable by this server.
    pub attachable: Vec<SessionDescriptor>,
    /// Descriptors owned by other live servers, left alone.
    pub foreign: usize,
}

/// Scan persisted descriptors and terminate zombie kernels.
///
/// `own_pid` is this server's PID (descriptors written by a previous
/// incarnation carry a dead server_pid and are fair game).
pub fn reconcile_zombies(sessions_dir: &Path, own_pid: i32) -> ReapReport {
    let mut report = ReapReport::default();

    let Ok(entries) = std::fs::read_dir(sessions_dir) else {
        return report;
    };

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let descriptor: SessionDescriptor = match std::fs::read(&path)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
        {
            Some(descriptor) => descriptor,
            None => {
                // Unparseable descriptor: drop the file, leave processes be.
                let _ = std::fs::remove_file(&path);
                report.cleaned += 1;
                continue;
            }
        };

        let server_alive = pid_alive(descriptor.server_pid) && descriptor.server_pid != own_pid;
        let connection_valid = descriptor.connection_valid();
        let kernel_alive = pid_alive(descriptor.kernel_pid);

        // Zombie iff the owning server is dead OR its connection file is
        // missing/invalid. Anything else belongs to another live server:
        // fratricide prevention, hands off.
        if server_alive && connection_valid {
            report.foreign += 1;
            continue;
        }

        if !server_alive && kernel_alive && connection_valid {
            // Previous server died but its kernel survived with a valid
            // connection file: candidate for re-attach.
            report.attachable.push(descriptor);
            continue;
        }

        if kernel_alive {
            info!(
                pid = descriptor.kernel_pid,
                notebook = %descriptor.notebook_path.display(),
                "terminating zombie kernel"
            );
            terminate_with_grace(descriptor.kernel_pid);
            report.killed.push(descriptor.kernel_pid);
        }

        let _ = std::fs::remove_file(&path);
        report.cleaned += 1;
    }

    if !report.killed.is_empty() || report.cleaned > 0 {
        info!(
            killed = report.killed.len(),
            cleaned = report.cleaned,
            attachable = report.attachable.len(),
            foreign = report.foreign,
            "zombie reconciliation complete"
        );
    }

    report
}

/// SIGTERM, short grace, then SIGKILL if still alive.
fn terminate_with_grace(pid: i32) {
    if let Err(e) = ink_kernel::terminate_pid(pid) {
        warn!(pid, error = %e, "SIGTERM failed");
    }
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if !pid_alive(pid) {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    if pid_alive(pid) {
        let _ = ink_kernel::kill_pid(pid);
    }
}

#[cfg(test)]
#[path = "reap_tests.rs"]
mod tests;
