// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound notification seam.
//!
//! The engine publishes `notebook/output`, `notebook/status`,
//! `notebook/input_request` and `notebook/warning` through this trait; the
//! daemon's subscriber registry implements it with per-subscriber
//! non-blocking sends.

use serde_json::Value;

pub trait Notifier: Send + Sync + 'static {
    /// Fire-and-forget: implementations must not block the caller on slow
    /// subscribers.
    fn notify(&self, method: &str, params: Value);

    /// How many live subscribers are connected. The finalizer skips the
    /// on-disk notebook write while this is non-zero.
    fn subscriber_count(&self) -> usize;
}

/// Discards everything. Stdio-only deployments before any client subscribes,
/// and tests that don't care.
#[derive(Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _method: &str, _params: Value) {}

    fn subscriber_count(&self) -> usize {
        0
    }
}

/// Captures notifications for assertions.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: parking_lot::Mutex<Vec<(String, Value)>>,
    subscribers: std::sync::atomic::AtomicUsize,
}

#[cfg(any(test, feature = "test-support"))]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_subscribers(&self, n: usize) {
        self.subscribers.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn take(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.notifications.lock())
    }

    pub fn all(&self) -> Vec<(String, Value)> {
        self.notifications.lock().clone()
    }

    pub fn with_method(&self, method: &str) -> Vec<Value> {
        self.notifications
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Notifier for RecordingNotifier {
    fn notify(&self, method: &str, params: Value) {
        self.notifications.lock().push((method.to_string(), params));
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.load(std::sync::atomic::Ordering::SeqCst)
    }
}
