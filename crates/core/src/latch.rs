// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Set-once async event.
//!
//! The scheduler and the I/O multiplexer synchronize through two of these per
//! execution: the completion latch (set by the multiplexer when the kernel
//! reports idle) and the finalization latch (set by the scheduler after the
//! terminal status is committed to the store).

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A one-shot flag that tasks can await. `set` is sticky: waiters that arrive
/// after the latch was set return immediately.
#[derive(Debug, Default)]
pub struct Latch {
    set: AtomicBool,
    notify: Notify,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.set.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    /// Wait until the latch is set. Returns immediately if already set.
    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after registering: set() may have raced with us.
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[path = "latch_tests.rs"]
mod tests;
