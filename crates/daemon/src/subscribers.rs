// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber registry and notification fan-out.
//!
//! Each connected client holds an unbounded outbound channel: a send never
//! blocks the engine on a slow subscriber, and a subscriber whose channel
//! closed is dropped from the registry on the next send.

use std::sync::atomic::{AtomicU64, Ordering};

use ink_engine::Notifier;
use ink_wire::Notification;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

pub struct Subscriber {
    pub id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// Connected clients interested in `notebook/*` notifications.
#[derive(Default)]
pub struct ConnectionManager {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client; the returned receiver yields serialized
    /// notification lines until unsubscribed.
    pub fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.subscribers.lock().push(Subscriber { id, tx });
        debug!(subscriber = id, "client subscribed");
        (id, rx)
    }

    /// Remove a client. Returns how many remain.
    pub fn unsubscribe(&self, id: u64) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| s.id != id);
        subscribers.len()
    }
}

impl Notifier for ConnectionManager {
    fn notify(&self, method: &str, params: Value) {
        let notification = Notification::new(method, params);
        let Ok(payload) = serde_json::to_string(&notification) else {
            return;
        };
        // Unbounded sends cannot block; closed channels mark the subscriber
        // for removal.
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| s.tx.send(payload.clone()).is_ok());
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
#[path = "subscribers_tests.rs"]
mod tests;
