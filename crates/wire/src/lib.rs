// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 protocol for client communication.
//!
//! Wire format: one JSON-RPC message per line (newline-delimited) on stdio;
//! the WebSocket surface carries the same payloads, one message per frame.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod codec;
mod request;
mod response;

pub use codec::{read_message, write_message, ProtocolError, MAX_MESSAGE_BYTES};
pub use request::{Notification, RpcRequest};
pub use response::{error_codes, RpcError, RpcResponse};

#[cfg(test)]
mod property_tests;
