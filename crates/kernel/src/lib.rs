// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Jupyter kernel wire protocol and subprocess management.
//!
//! See the [Messaging in Jupyter](https://jupyter-client.readthedocs.io/en/stable/messaging.html)
//! page for the protocol this implements. Messages travel over five ZeroMQ
//! channels (shell, iopub, stdin, control, heartbeat); we drive the first
//! four and leave heartbeat to the health probe's kernel-info round-trips.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod connection;
mod message;
mod process;
mod transport;
mod zmq;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use client::KernelClient;
pub use connection::{peek_ports, ConnectionInfo};
pub use message::{
    ClearOutput, ErrorContent, ExecuteRequest, ExecuteResult, Header, InputRequest, KernelMessage,
    KernelStatus, MessageType, Status, StreamOutput,
};
pub use process::{
    kill_pid, pid_alive, resolve_interpreter, terminate_pid, KernelProcess, SpawnOptions,
    KERNEL_ID_ENV,
};
pub use transport::KernelTransport;
pub use zmq::ZmqTransport;

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeTransport;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("kernel channel closed")]
    Disconnected,

    #[error("timed out waiting for kernel")]
    Timeout,

    #[error("bad wire message: {0}")]
    Malformed(String),

    #[error("signature mismatch on kernel message")]
    BadSignature,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("kernel startup failed: {0}")]
    Startup(String),

    #[error("failed to signal kernel process: {0}")]
    Signal(String),
}
