// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kernel connection files and port selection.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::KernelError;

/// Contents of a Jupyter connection file. The kernel reads this to learn
/// which ports to bind and which HMAC key to sign with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub transport: String,
    pub ip: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,
    pub key: String,
    pub signature_scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_name: Option<String>,
}

impl ConnectionInfo {
    /// Build a localhost connection over freshly peeked ports with a random
    /// signing key.
    pub async fn localhost(kernel_name: &str) -> Result<Self, KernelError> {
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let ports = peek_ports(ip).await?;
        Ok(Self {
            transport: "tcp".to_string(),
            ip: ip.to_string(),
            shell_port: ports[0],
            iopub_port: ports[1],
            stdin_port: ports[2],
            control_port: ports[3],
            hb_port: ports[4],
            key: Uuid::new_v4().to_string(),
            signature_scheme: "hmac-sha256".to_string(),
            kernel_name: Some(kernel_name.to_string()),
        })
    }

    pub fn endpoint(&self, port: u16) -> String {
        format!("{}://{}:{}", self.transport, self.ip, port)
    }

    /// Write the connection file the kernel will be pointed at.
    pub fn write(&self, path: &Path) -> Result<(), KernelError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, payload)?;
        Ok(())
    }

    /// Read a persisted connection file (reconnect path). Fails on missing
    /// or unparseable files -- the caller treats that as an invalid session.
    pub fn read(path: &Path) -> Result<Self, KernelError> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Find five open ports by binding listeners with port 0 and reading the
/// assigned addresses. The listeners close when they go out of scope;
/// there is an inherent race between that and the kernel binding, which is
/// baked into the Jupyter protocol.
pub async fn peek_ports(ip: IpAddr) -> Result<[u16; 5], KernelError> {
    let addr = SocketAddr::new(ip, 0);
    let mut ports = [0u16; 5];
    let mut listeners = Vec::with_capacity(5);
    for port in &mut ports {
        let listener = TcpListener::bind(addr).await?;
        *port = listener.local_addr()?.port();
        // Hold all five open until the end so we never hand out duplicates.
        listeners.push(listener);
    }
    Ok(ports)
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
