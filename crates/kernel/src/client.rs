// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! High-level kernel client: execute, probe, interrupt, shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::message::{ExecuteRequest, KernelMessage, MessageType};
use crate::transport::KernelTransport;
use crate::KernelError;

/// Client over an abstract transport. One per kernel; cheap to clone.
#[derive(Clone)]
pub struct KernelClient {
    transport: Arc<dyn KernelTransport>,
    /// Client session id, stamped into every outgoing header.
    session: Arc<str>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<KernelMessage>>>>,
    _reply_pump: Arc<JoinHandle<()>>,
}

impl KernelClient {
    /// Wrap a transport and start the reply pump that resolves shell/control
    /// round-trips by parent msg_id.
    pub fn new(transport: Arc<dyn KernelTransport>) -> Self {
        let session: Arc<str> = Uuid::new_v4().to_string().into();
        let pending: Arc<Mutex<HashMap<String, oneshot::Sender<KernelMessage>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let pump = {
            let transport = Arc::clone(&transport);
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                loop {
                    let reply = match transport.recv_reply().await {
                        Ok(reply) => reply,
                        Err(_) => break,
                    };
                    let Some(parent) = reply.parent_id().map(str::to_string) else {
                        continue;
                    };
                    let waiter = pending.lock().remove(&parent);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(reply);
                        }
                        None => debug!(parent, "unclaimed kernel reply"),
                    }
                }
            })
        };

        Self { transport, session, pending, _reply_pump: Arc::new(pump) }
    }

    pub fn transport(&self) -> &Arc<dyn KernelTransport> {
        &self.transport
    }

    /// Submit code for execution. Returns the kernel-assigned message id the
    /// iopub stream will use as parent for everything this execution emits.
    pub async fn execute(&self, code: &str) -> Result<String, KernelError> {
        let msg = KernelMessage::new(
            MessageType::ExecuteRequest,
            &self.session,
            serde_json::to_value(ExecuteRequest::new(code))?,
        );
        let msg_id = msg.header.msg_id.clone();
        self.transport.send_shell(msg).await?;
        Ok(msg_id)
    }

    /// Round-trip a kernel_info probe; returns the latency on success.
    pub async fn kernel_info(&self, timeout: Duration) -> Result<Duration, KernelError> {
        let msg = KernelMessage::new(MessageType::KernelInfoRequest, &self.session, json!({}));
        let started = std::time::Instant::now();
        self.call_shell(msg, timeout).await?;
        Ok(started.elapsed())
    }

    /// Wait until the kernel answers a kernel_info probe, bounded by
    /// `timeout`. Used right after spawn while the kernel binds its ports.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), KernelError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.kernel_info(Duration::from_secs(2)).await {
                Ok(_) => return Ok(()),
                Err(KernelError::Disconnected) => return Err(KernelError::Disconnected),
                Err(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(KernelError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Message-based interrupt on the control channel. Used when we did not
    /// spawn the process ourselves and cannot signal it.
    pub async fn interrupt_request(&self) -> Result<(), KernelError> {
        let msg = KernelMessage::new(MessageType::InterruptRequest, &self.session, json!({}));
        self.transport.send_control(msg).await
    }

    /// Graceful shutdown request on the control channel.
    pub async fn shutdown_request(&self, restart: bool) -> Result<(), KernelError> {
        let msg = KernelMessage::new(
            MessageType::ShutdownRequest,
            &self.session,
            json!({ "restart": restart }),
        );
        self.transport.send_control(msg).await
    }

    /// Answer a pending `input_request`.
    pub async fn input_reply(&self, text: &str) -> Result<(), KernelError> {
        let msg =
            KernelMessage::new(MessageType::InputReply, &self.session, json!({ "value": text }));
        self.transport.send_stdin(msg).await
    }

    pub async fn recv_iopub(&self) -> Result<KernelMessage, KernelError> {
        self.transport.recv_iopub().await
    }

    pub async fn recv_stdin(&self) -> Result<KernelMessage, KernelError> {
        self.transport.recv_stdin().await
    }

    pub fn close(&self) {
        self._reply_pump.abort();
        self.transport.close();
    }

    /// Send on shell and await the matching reply.
    async fn call_shell(
        &self,
        msg: KernelMessage,
        timeout: Duration,
    ) -> Result<KernelMessage, KernelError> {
        let msg_id = msg.header.msg_id.clone();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(msg_id.clone(), tx);

        if let Err(e) = self.transport.send_shell(msg).await {
            self.pending.lock().remove(&msg_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().remove(&msg_id);
                Err(KernelError::Disconnected)
            }
            Err(_) => {
                self.pending.lock().remove(&msg_id);
                Err(KernelError::Timeout)
            }
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
