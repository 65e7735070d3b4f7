// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel subprocess spawning and signalling.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{info, warn};
use uuid::Uuid;

use crate::connection::ConnectionInfo;
use crate::KernelError;

/// Environment variable carrying the per-kernel UUID. Zombie reconciliation
/// correlates child processes through it.
pub const KERNEL_ID_ENV: &str = "INK_KERNEL_ID";

/// How a kernel should be launched.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Working directory for the kernel process.
    pub cwd: PathBuf,
    /// Optional environment root (venv/conda prefix) to resolve the
    /// interpreter from.
    pub env_root: Option<PathBuf>,
    /// Where to write the connection file.
    pub connection_file: PathBuf,
}

/// Resolve the Python interpreter for a kernel.
///
/// Prefers the explicit env root (`bin/python` on POSIX,
/// `Scripts\python.exe` on Windows) and falls back to `python3` on PATH.
/// Returns the interpreter path and a human-readable environment name.
pub fn resolve_interpreter(env_root: Option<&Path>) -> (PathBuf, String) {
    if let Some(root) = env_root {
        let candidates = [root.join("bin").join("python"), root.join("Scripts").join("python.exe")];
        for candidate in candidates {
            if candidate.exists() {
                let env_name = root
                    .file_name()
                    .map(|n| format!("venv:{}", n.to_string_lossy()))
                    .unwrap_or_else(|| "venv".to_string());
                return (candidate, env_name);
            }
        }
        warn!(root = %root.display(), "no interpreter under env root, falling back to PATH");
    }
    (PathBuf::from("python3"), "system".to_string())
}

/// A spawned kernel subprocess.
pub struct KernelProcess {
    child: Option<Child>,
    pid: i32,
    pub connection_file: PathBuf,
    pub interpreter: PathBuf,
    pub env_name: String,
    /// UUID injected into the child env under [`KERNEL_ID_ENV`].
    pub kernel_uuid: String,
}

impl KernelProcess {
    /// Write the connection file and spawn
    /// `<interpreter> -m ipykernel_launcher -f <connection_file>`.
    pub async fn spawn(info: &ConnectionInfo, opts: &SpawnOptions) -> Result<Self, KernelError> {
        info.write(&opts.connection_file)?;

        let (interpreter, env_name) = resolve_interpreter(opts.env_root.as_deref());
        let kernel_uuid = Uuid::new_v4().to_string();

        std::fs::create_dir_all(&opts.cwd)?;

        let mut cmd = Command::new(&interpreter);
        cmd.arg("-m")
            .arg("ipykernel_launcher")
            .arg("-f")
            .arg(&opts.connection_file)
            .current_dir(&opts.cwd)
            .env(KERNEL_ID_ENV, &kernel_uuid)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            KernelError::Startup(format!("failed to spawn {}: {e}", interpreter.display()))
        })?;

        let pid = child.id().map(|p| p as i32).unwrap_or(-1);

        // Keep the kernel's own chatter out of our stdio (which may be a
        // JSON-RPC channel); forward it to the log instead.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "kernel", "{line}");
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "kernel", "{line}");
                }
            });
        }

        info!(pid, interpreter = %interpreter.display(), env = %env_name, "kernel spawned");

        Ok(Self {
            child: Some(child),
            pid,
            connection_file: opts.connection_file.clone(),
            interpreter,
            env_name,
            kernel_uuid,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Hand the child to an exit monitor. Subsequent calls return `None`;
    /// signalling still works through the recorded pid.
    pub fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }

    /// SIGINT -- the kernel raises KeyboardInterrupt in user code.
    pub fn interrupt(&self) -> Result<(), KernelError> {
        signal_pid(self.pid, Signal::Interrupt)
    }

    /// SIGTERM -- graceful termination request.
    pub fn terminate(&self) -> Result<(), KernelError> {
        signal_pid(self.pid, Signal::Terminate)
    }

    /// SIGKILL -- last resort after the grace window.
    pub fn kill(&self) -> Result<(), KernelError> {
        signal_pid(self.pid, Signal::Kill)
    }

    /// Remove the connection file (on stop or when the kernel is confirmed
    /// dead).
    pub fn remove_connection_file(&self) {
        let _ = std::fs::remove_file(&self.connection_file);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Signal {
    Interrupt,
    Terminate,
    Kill,
}

/// SIGTERM an arbitrary pid (zombie reconciliation).
pub fn terminate_pid(pid: i32) -> Result<(), KernelError> {
    signal_pid(pid, Signal::Terminate)
}

/// SIGKILL an arbitrary pid (zombie reconciliation, shutdown stragglers).
pub fn kill_pid(pid: i32) -> Result<(), KernelError> {
    signal_pid(pid, Signal::Kill)
}

/// Whether a process with this pid is currently alive.
pub fn pid_alive(pid: i32) -> bool {
    #[cfg(unix)]
    {
        if pid <= 0 {
            return false;
        }
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

pub(crate) fn signal_pid(pid: i32, signal: Signal) -> Result<(), KernelError> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal as NixSignal};
        use nix::unistd::Pid;

        if pid <= 0 {
            return Err(KernelError::Signal(format!("invalid pid {pid}")));
        }
        let sig = match signal {
            Signal::Interrupt => NixSignal::SIGINT,
            Signal::Terminate => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        };
        kill(Pid::from_raw(pid), sig).map_err(|e| KernelError::Signal(e.to_string()))
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
        Err(KernelError::Signal("signals unsupported on this platform".into()))
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
