// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inkpot daemon library: lifecycle, listeners, and RPC dispatch.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod env;
pub mod lifecycle;
pub mod listener;
pub mod rpc;
pub mod subscribers;

pub use lifecycle::{startup, Config, DaemonState, LifecycleError};
pub use rpc::{DaemonManager, RpcCtx};
pub use subscribers::ConnectionManager;
