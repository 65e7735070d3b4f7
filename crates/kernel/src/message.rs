// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed kernel message model.
//!
//! Every message is a `{header, parent_header, metadata, content, buffers}`
//! tuple. Dispatch keys off the closed [`MessageType`] set; unrecognized
//! types are preserved as [`MessageType::Other`] and ignored by routing.

use bytes::Bytes;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::KernelError;

/// Message types the server sends or routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ExecuteRequest,
    ExecuteReply,
    ExecuteInput,
    ExecuteResult,
    KernelInfoRequest,
    KernelInfoReply,
    ShutdownRequest,
    ShutdownReply,
    InterruptRequest,
    InterruptReply,
    Stream,
    DisplayData,
    UpdateDisplayData,
    Error,
    Status,
    ClearOutput,
    InputRequest,
    InputReply,
    /// Any message type we do not handle.
    #[serde(untagged)]
    Other(String),
}

/// Header of a message, part of the five-frame tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Unique per message, typically a UUID.
    pub msg_id: String,
    /// Unique per client session.
    pub session: String,
    pub username: String,
    /// ISO 8601 creation timestamp. Kept as a string: kernels disagree on
    /// sub-second precision and timezone suffixes.
    pub date: String,
    pub msg_type: MessageType,
    /// Message protocol version.
    pub version: String,
}

/// A message sent to or received from a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelMessage {
    pub header: Header,
    pub parent_header: Option<Header>,
    pub metadata: Value,
    pub content: Value,
    /// Raw binary frames appended after the JSON frames (extensions only).
    pub buffers: Vec<Bytes>,
}

impl KernelMessage {
    /// Create a message originating from our client session.
    pub fn new(msg_type: MessageType, session: &str, content: Value) -> Self {
        Self {
            header: Header {
                msg_id: Uuid::new_v4().to_string(),
                session: session.to_string(),
                username: "inkpot".to_string(),
                date: Utc::now().to_rfc3339(),
                msg_type,
                version: "5.4".to_string(),
            },
            parent_header: None,
            metadata: Value::Object(Default::default()),
            content,
            buffers: Vec::new(),
        }
    }

    /// The msg_id of the request that caused this message, if any.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_header.as_ref().map(|h| h.msg_id.as_str())
    }

    pub fn msg_type(&self) -> &MessageType {
        &self.header.msg_type
    }

    /// Deserialize the content into a specific shape.
    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, KernelError> {
        serde_json::from_value(self.content.clone())
            .map_err(|e| KernelError::Malformed(format!("{}: {e}", self.header.msg_id)))
    }
}

/// Execute code on behalf of the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    #[serde(default)]
    pub user_expressions: serde_json::Map<String, Value>,
    pub allow_stdin: bool,
    pub stop_on_error: bool,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: true,
            user_expressions: Default::default(),
            allow_stdin: true,
            // The scheduler owns the stop-on-error cascade; the kernel-side
            // abort would race with our durable queue.
            stop_on_error: false,
        }
    }
}

/// Stdout/stderr text from the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOutput {
    /// One of "stdout" or "stderr".
    pub name: String,
    pub text: String,
}

/// A mime-bundle result of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub execution_count: i32,
    pub data: serde_json::Map<String, Value>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

/// A raised exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    pub traceback: Vec<String>,
}

/// Kernel execution state announcements on iopub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelStatus {
    Starting,
    Idle,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub execution_state: KernelStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearOutput {
    /// When true the frontend should defer the clear until the next output.
    pub wait: bool,
}

/// The kernel is blocked on `input()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub password: bool,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
