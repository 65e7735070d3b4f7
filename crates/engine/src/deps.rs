// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared dependencies injected into per-session tasks.

use std::sync::Arc;

use ink_core::Clock;
use ink_storage::Store;

use crate::config::EngineConfig;
use crate::notify::Notifier;

pub(crate) struct Deps<C: Clock> {
    pub store: Arc<Store>,
    pub notifier: Arc<dyn Notifier>,
    pub config: EngineConfig,
    pub clock: C,
}
