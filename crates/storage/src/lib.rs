// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable storage for Inkpot: the execution queue and asset leases.
//!
//! Persistence is an append-only write-ahead log of [`ink_core::Event`]
//! records plus periodic zstd-compressed snapshots of the materialized
//! state. Recovery loads the latest snapshot and replays WAL entries after
//! its sequence number, so a torn write can never corrupt prior committed
//! state.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod checkpoint;
mod snapshot;
mod state;
mod store;
mod wal;

pub use checkpoint::{load_snapshot, Checkpointer};
pub use snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use state::{MaterializedState, StoreStats};
pub use store::{Store, StoreError};
pub use wal::{Wal, WalEntry, WalError};
