// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory transport that simulates a tiny kernel for tests.
//!
//! With auto-execute on (the default), each `execute_request` produces a
//! busy → outputs → idle sequence derived from the code text:
//!
//! - `print("...")` / `print('...')` emits a stdout stream
//! - `raise Name("msg")` emits an error output
//! - `time.sleep(N)` delays before idle and aborts on interrupt
//! - `input(...)` emits an `input_request` and waits for the reply
//!
//! Everything else completes silently. Tests needing exact control can turn
//! auto-execute off and push iopub messages by hand.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{mpsc, Notify};

use crate::message::{ExecuteRequest, Header, KernelMessage, MessageType};
use crate::transport::KernelTransport;
use crate::KernelError;

type Rx = tokio::sync::Mutex<mpsc::UnboundedReceiver<KernelMessage>>;

struct FakeInner {
    sent_shell: Mutex<Vec<KernelMessage>>,
    sent_control: Mutex<Vec<KernelMessage>>,
    sent_stdin: Mutex<Vec<KernelMessage>>,
    iopub_tx: mpsc::UnboundedSender<KernelMessage>,
    iopub_rx: Rx,
    stdin_tx: mpsc::UnboundedSender<KernelMessage>,
    stdin_rx: Rx,
    reply_tx: mpsc::UnboundedSender<KernelMessage>,
    reply_rx: Rx,
    input_tx: mpsc::UnboundedSender<KernelMessage>,
    input_rx: Rx,
    exec_count: AtomicI32,
    auto_execute: AtomicBool,
    interrupt: Notify,
    closed: AtomicBool,
    closed_notify: Notify,
}

/// Cheap to clone; all state lives behind one `Arc`.
#[derive(Clone)]
pub struct FakeTransport {
    inner: Arc<FakeInner>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTransport {
    pub fn new() -> Self {
        let (iopub_tx, iopub_rx) = mpsc::unbounded_channel();
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(FakeInner {
                sent_shell: Mutex::new(Vec::new()),
                sent_control: Mutex::new(Vec::new()),
                sent_stdin: Mutex::new(Vec::new()),
                iopub_tx,
                iopub_rx: tokio::sync::Mutex::new(iopub_rx),
                stdin_tx,
                stdin_rx: tokio::sync::Mutex::new(stdin_rx),
                reply_tx,
                reply_rx: tokio::sync::Mutex::new(reply_rx),
                input_tx,
                input_rx: tokio::sync::Mutex::new(input_rx),
                exec_count: AtomicI32::new(0),
                auto_execute: AtomicBool::new(true),
                interrupt: Notify::new(),
                closed: AtomicBool::new(false),
                closed_notify: Notify::new(),
            }),
        }
    }

    /// Disable the built-in execute simulation; tests drive iopub manually.
    pub fn manual(self) -> Self {
        self.inner.auto_execute.store(false, Ordering::SeqCst);
        self
    }

    /// Inject an iopub message as if the kernel emitted it.
    pub fn push_iopub(&self, msg: KernelMessage) {
        let _ = self.inner.iopub_tx.send(msg);
    }

    /// Inject a stdin-channel message (e.g. an `input_request`).
    pub fn push_stdin(&self, msg: KernelMessage) {
        let _ = self.inner.stdin_tx.send(msg);
    }

    pub fn sent_shell(&self) -> Vec<KernelMessage> {
        self.inner.sent_shell.lock().clone()
    }

    pub fn sent_control(&self) -> Vec<KernelMessage> {
        self.inner.sent_control.lock().clone()
    }

    pub fn sent_stdin(&self) -> Vec<KernelMessage> {
        self.inner.sent_stdin.lock().clone()
    }

    /// Build an iopub message with the given parent header.
    pub fn iopub_message(
        parent: &Header,
        msg_type: MessageType,
        content: serde_json::Value,
    ) -> KernelMessage {
        let mut msg = KernelMessage::new(msg_type, &parent.session, content);
        msg.parent_header = Some(parent.clone());
        msg
    }

    fn emit(&self, parent: &Header, msg_type: MessageType, content: serde_json::Value) {
        let _ = self.inner.iopub_tx.send(Self::iopub_message(parent, msg_type, content));
    }

    async fn simulate_execute(self, request: KernelMessage) {
        let parent = request.header.clone();
        let Ok(exec) = request.content_as::<ExecuteRequest>() else {
            return;
        };
        let code = exec.code;

        self.emit(&parent, MessageType::Status, json!({ "execution_state": "busy" }));

        let count = self.inner.exec_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(
            &parent,
            MessageType::ExecuteInput,
            json!({ "code": code, "execution_count": count }),
        );

        let mut interrupted = false;

        if let Some(seconds) = parse_sleep(&code) {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => {}
                _ = self.inner.interrupt.notified() => { interrupted = true; }
            }
        }

        if !interrupted && code.contains("input(") {
            let mut msg = KernelMessage::new(
                MessageType::InputRequest,
                &parent.session,
                json!({ "prompt": "", "password": false }),
            );
            msg.parent_header = Some(parent.clone());
            let _ = self.inner.stdin_tx.send(msg);

            let reply = {
                let mut rx = self.inner.input_rx.lock().await;
                tokio::select! {
                    reply = rx.recv() => reply,
                    _ = self.inner.interrupt.notified() => { interrupted = true; None }
                }
            };
            if let Some(reply) = reply {
                let value = reply.content["value"].as_str().unwrap_or_default().to_string();
                self.emit(
                    &parent,
                    MessageType::Stream,
                    json!({ "name": "stdout", "text": format!("{value}\n") }),
                );
            }
        }

        if interrupted {
            self.emit(
                &parent,
                MessageType::Error,
                json!({
                    "ename": "KeyboardInterrupt",
                    "evalue": "",
                    "traceback": ["KeyboardInterrupt"],
                }),
            );
        } else if let Some((ename, evalue)) = parse_raise(&code) {
            self.emit(
                &parent,
                MessageType::Error,
                json!({
                    "ename": ename,
                    "evalue": evalue,
                    "traceback": [
                        "Traceback (most recent call last):",
                        "  File \"<cell>\", line 1, in <module>".to_string(),
                        format!("{ename}: {evalue}"),
                    ],
                }),
            );
        } else if let Some(text) = parse_print(&code) {
            self.emit(
                &parent,
                MessageType::Stream,
                json!({ "name": "stdout", "text": format!("{text}\n") }),
            );
        }

        self.emit(&parent, MessageType::Status, json!({ "execution_state": "idle" }));
    }
}

impl FakeTransport {
    async fn recv_from(&self, rx: &Rx) -> Result<KernelMessage, KernelError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(KernelError::Disconnected);
        }
        let mut guard = rx.lock().await;
        tokio::select! {
            msg = guard.recv() => msg.ok_or(KernelError::Disconnected),
            _ = self.inner.closed_notify.notified() => Err(KernelError::Disconnected),
        }
    }
}

#[async_trait::async_trait]
impl KernelTransport for FakeTransport {
    async fn send_shell(&self, msg: KernelMessage) -> Result<(), KernelError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(KernelError::Disconnected);
        }
        self.inner.sent_shell.lock().push(msg.clone());

        match msg.msg_type() {
            MessageType::KernelInfoRequest => {
                let mut reply = KernelMessage::new(
                    MessageType::KernelInfoReply,
                    &msg.header.session,
                    json!({ "status": "ok", "implementation": "fake" }),
                );
                reply.parent_header = Some(msg.header.clone());
                let _ = self.inner.reply_tx.send(reply);
            }
            MessageType::ExecuteRequest if self.inner.auto_execute.load(Ordering::SeqCst) => {
                tokio::spawn(self.clone().simulate_execute(msg));
            }
            _ => {}
        }
        Ok(())
    }

    async fn send_control(&self, msg: KernelMessage) -> Result<(), KernelError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(KernelError::Disconnected);
        }
        self.inner.sent_control.lock().push(msg.clone());
        if matches!(msg.msg_type(), MessageType::InterruptRequest) {
            self.inner.interrupt.notify_waiters();
        }
        Ok(())
    }

    async fn send_stdin(&self, msg: KernelMessage) -> Result<(), KernelError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(KernelError::Disconnected);
        }
        self.inner.sent_stdin.lock().push(msg.clone());
        let _ = self.inner.input_tx.send(msg);
        Ok(())
    }

    async fn recv_iopub(&self) -> Result<KernelMessage, KernelError> {
        self.recv_from(&self.inner.iopub_rx).await
    }

    async fn recv_stdin(&self) -> Result<KernelMessage, KernelError> {
        self.recv_from(&self.inner.stdin_rx).await
    }

    async fn recv_reply(&self) -> Result<KernelMessage, KernelError> {
        self.recv_from(&self.inner.reply_rx).await
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.closed_notify.notify_waiters();
        self.inner.interrupt.notify_waiters();
    }
}

fn parse_print(code: &str) -> Option<String> {
    let start = code.find("print(")? + "print(".len();
    let rest = &code[start..];
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    Some(inner[..end].to_string())
}

fn parse_raise(code: &str) -> Option<(String, String)> {
    let start = code.find("raise ")? + "raise ".len();
    let rest = &code[start..];
    let paren = rest.find('(')?;
    let ename = rest[..paren].trim().to_string();
    let inner = &rest[paren + 1..];
    let evalue = match inner.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let body = &inner[1..];
            body.find(q).map(|end| body[..end].to_string()).unwrap_or_default()
        }
        _ => String::new(),
    };
    Some((ename, evalue))
}

fn parse_sleep(code: &str) -> Option<f64> {
    let start = code.find("time.sleep(")? + "time.sleep(".len();
    let rest = &code[start..];
    let end = rest.find(')')?;
    rest[..end].trim().parse().ok()
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
