// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel launching seam: the real ZeroMQ/subprocess path and a fake for
//! tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ink_kernel::{
    ConnectionInfo, KernelClient, KernelError, KernelProcess, SpawnOptions, ZmqTransport,
};
use tracing::{info, warn};

use crate::EngineError;

/// Everything needed to start one kernel.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub notebook: PathBuf,
    pub cwd: PathBuf,
    pub env_root: Option<PathBuf>,
    pub connection_file: PathBuf,
    pub start_timeout: Duration,
}

/// A started (or re-attached) kernel.
pub struct LaunchedKernel {
    pub client: KernelClient,
    pub process: Option<KernelProcess>,
    pub interpreter: PathBuf,
    pub env_name: String,
    pub kernel_uuid: String,
    pub pid: Option<i32>,
}

#[async_trait]
pub trait KernelLauncher: Send + Sync + 'static {
    /// Spawn a fresh kernel and wait until it answers a kernel-info probe.
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedKernel, EngineError>;

    /// Attach to a surviving kernel through its connection file
    /// (startup re-attach path).
    async fn attach(&self, connection_file: &Path) -> Result<LaunchedKernel, EngineError>;
}

/// Production launcher: subprocess + ZeroMQ channels.
#[derive(Default)]
pub struct ZmqLauncher;

const SPAWN_ATTEMPTS: usize = 3;

#[async_trait]
impl KernelLauncher for ZmqLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedKernel, EngineError> {
        let mut last_error = None;
        for attempt in 1..=SPAWN_ATTEMPTS {
            match try_launch(spec).await {
                Ok(kernel) => return Ok(kernel),
                Err(e) => {
                    warn!(attempt, error = %e, "kernel launch attempt failed");
                    let _ = std::fs::remove_file(&spec.connection_file);
                    last_error = Some(e);
                }
            }
        }
        let error = last_error.unwrap_or(KernelError::Timeout);
        Err(EngineError::Kernel(startup_hint(error)))
    }

    async fn attach(&self, connection_file: &Path) -> Result<LaunchedKernel, EngineError> {
        let info = ConnectionInfo::read(connection_file)?;
        let transport = ZmqTransport::connect(&info).await?;
        let client = KernelClient::new(Arc::new(transport));
        client.wait_ready(Duration::from_secs(15)).await?;
        info!(file = %connection_file.display(), "re-attached to surviving kernel");
        Ok(LaunchedKernel {
            client,
            process: None,
            interpreter: PathBuf::new(),
            env_name: "unknown".to_string(),
            kernel_uuid: String::new(),
            pid: None,
        })
    }
}

async fn try_launch(spec: &LaunchSpec) -> Result<LaunchedKernel, KernelError> {
    let info = ConnectionInfo::localhost("python3").await?;
    let process = KernelProcess::spawn(
        &info,
        &SpawnOptions {
            cwd: spec.cwd.clone(),
            env_root: spec.env_root.clone(),
            connection_file: spec.connection_file.clone(),
        },
    )
    .await?;

    let transport = ZmqTransport::connect(&info).await?;
    let client = KernelClient::new(Arc::new(transport));

    if let Err(e) = client.wait_ready(spec.start_timeout).await {
        client.close();
        let _ = process.kill();
        process.remove_connection_file();
        return Err(e);
    }

    Ok(LaunchedKernel {
        client,
        interpreter: process.interpreter.clone(),
        env_name: process.env_name.clone(),
        kernel_uuid: process.kernel_uuid.clone(),
        pid: Some(process.pid()),
        // The child stays inside the handle; the exit monitor takes it.
        process: Some(process),
    })
}

/// Wrap bind-flavored startup failures with actionable remediation.
fn startup_hint(error: KernelError) -> KernelError {
    let text = error.to_string().to_lowercase();
    let bindy = ["zmq", "bind", "address already in use", "cannot assign requested address"]
        .iter()
        .any(|needle| text.contains(needle));
    if bindy {
        KernelError::Startup(format!(
            "port conflict starting kernel: another kernel instance may be running or \
             ephemeral ports are exhausted. Stop stale kernels, check listeners, or wait \
             ~30s for ports to release. Details: {error}"
        ))
    } else {
        error
    }
}

/// Test launcher over [`ink_kernel::FakeTransport`]. Each launch gets its own
/// simulated kernel; tests can reach the transports afterwards.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeLauncher {
    transports: parking_lot::Mutex<Vec<(PathBuf, ink_kernel::FakeTransport)>>,
    manual: bool,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeLauncher {
    /// Auto-executing fake kernels (the default).
    pub fn new() -> Self {
        Self { transports: parking_lot::Mutex::new(Vec::new()), manual: false }
    }

    /// Fake kernels that never respond on their own; tests push iopub
    /// messages by hand.
    pub fn manual() -> Self {
        Self { transports: parking_lot::Mutex::new(Vec::new()), manual: true }
    }

    /// Transport of the most recent launch for `notebook`.
    pub fn transport_for(&self, notebook: &Path) -> Option<ink_kernel::FakeTransport> {
        self.transports
            .lock()
            .iter()
            .rev()
            .find(|(nb, _)| nb == notebook)
            .map(|(_, t)| t.clone())
    }

    pub fn launch_count(&self) -> usize {
        self.transports.lock().len()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for FakeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl KernelLauncher for FakeLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedKernel, EngineError> {
        let transport = if self.manual {
            ink_kernel::FakeTransport::new().manual()
        } else {
            ink_kernel::FakeTransport::new()
        };
        self.transports.lock().push((spec.notebook.clone(), transport.clone()));
        let client = KernelClient::new(Arc::new(transport));
        Ok(LaunchedKernel {
            client,
            process: None,
            interpreter: PathBuf::from("python3"),
            env_name: "fake".to_string(),
            kernel_uuid: uuid::Uuid::new_v4().to_string(),
            pid: None,
        })
    }

    async fn attach(&self, _connection_file: &Path) -> Result<LaunchedKernel, EngineError> {
        self.launch(&LaunchSpec {
            notebook: PathBuf::new(),
            cwd: PathBuf::new(),
            env_root: None,
            connection_file: PathBuf::new(),
            start_timeout: Duration::from_secs(1),
        })
        .await
    }
}
