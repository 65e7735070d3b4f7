// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport seam between the client and a concrete channel driver.

use async_trait::async_trait;

use crate::message::KernelMessage;
use crate::KernelError;

/// The four kernel channels we drive.
///
/// `recv_iopub` and `recv_stdin` are single-consumer streams (the I/O
/// multiplexer owns them); `recv_reply` merges shell and control replies and
/// is consumed by the client's reply pump.
#[async_trait]
pub trait KernelTransport: Send + Sync + 'static {
    async fn send_shell(&self, msg: KernelMessage) -> Result<(), KernelError>;

    async fn send_control(&self, msg: KernelMessage) -> Result<(), KernelError>;

    async fn send_stdin(&self, msg: KernelMessage) -> Result<(), KernelError>;

    /// Next broadcast message (status, outputs, clear_output, ...).
    async fn recv_iopub(&self) -> Result<KernelMessage, KernelError>;

    /// Next stdin-channel request (`input_request`).
    async fn recv_stdin(&self) -> Result<KernelMessage, KernelError>;

    /// Next shell or control reply.
    async fn recv_reply(&self) -> Result<KernelMessage, KernelError>;

    /// Tear down the channels. Subsequent operations fail with
    /// [`KernelError::Disconnected`].
    fn close(&self);
}
