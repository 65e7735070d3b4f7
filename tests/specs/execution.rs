// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end execution scenarios: error cascade, timeout, cancellation,
//! input handling.

use super::prelude::*;
use ink_core::TaskStatus;
use std::time::Duration;

#[tokio::test]
async fn stop_on_error_cascade_spares_future_submissions() {
    let world = World::new();
    let server = world.boot();
    let nb = world.notebook("nb.ipynb", &["a", "b", "c", "d"]);

    server.manager.start_session(&nb, Default::default()).await.unwrap();

    let t1 = server.manager.submit(&nb, 0, "x=1", None, Some(true)).await.unwrap();
    let t2 = server.manager.submit(&nb, 1, "y=2", None, None).await.unwrap();
    let t3 = server.manager.submit(&nb, 2, "raise ValueError(\"e\")", None, None).await.unwrap();

    assert_eq!(wait_terminal(&server.store, t1).await, TaskStatus::Completed);
    assert_eq!(wait_terminal(&server.store, t2).await, TaskStatus::Completed);
    assert_eq!(wait_terminal(&server.store, t3).await, TaskStatus::Failed);

    // First two got counts 1 and 2; the error cell got 3
    assert_eq!(server.store.task(t1).unwrap().unwrap().execution_count, Some(1));
    assert_eq!(server.store.task(t2).unwrap().unwrap().execution_count, Some(2));

    // A fourth task submitted after the cascade executes normally
    let t4 = server.manager.submit(&nb, 3, "print(\"x+y\")", None, None).await.unwrap();
    assert_eq!(wait_terminal(&server.store, t4).await, TaskStatus::Completed);
    assert_eq!(server.store.task(t4).unwrap().unwrap().execution_count, Some(4));
}

#[tokio::test]
async fn error_task_is_a_result_not_a_transport_failure() {
    let world = World::new();
    let server = world.boot();
    let nb = world.notebook("nb.ipynb", &["bad"]);

    server.manager.start_session(&nb, Default::default()).await.unwrap();

    // User code raising is a successful task with terminal status `failed`
    let id = server
        .manager
        .submit(&nb, 0, "raise RuntimeError(\"broken\")", None, None)
        .await
        .unwrap();
    assert_eq!(wait_terminal(&server.store, id).await, TaskStatus::Failed);

    let row = server.store.task(id).unwrap().unwrap();
    assert_eq!(row.error.as_deref(), Some("RuntimeError: broken"));
}

#[tokio::test]
async fn timeout_leaves_kernel_alive() {
    let world = World::new();
    let server = world.boot();
    let nb = world.notebook("nb.ipynb", &["slow", "fast"]);

    server
        .manager
        .start_session(
            &nb,
            ink_engine::StartOptions {
                timeout: Some(Duration::from_millis(250)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let started = std::time::Instant::now();
    let slow = server
        .manager
        .submit(&nb, 0, "import time; time.sleep(10)", None, None)
        .await
        .unwrap();
    assert_eq!(wait_terminal(&server.store, slow).await, TaskStatus::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5), "timeout must fire promptly");

    // Kernel still alive: next submit works
    let fast = server.manager.submit(&nb, 1, "x = 1", None, None).await.unwrap();
    assert_eq!(wait_terminal(&server.store, fast).await, TaskStatus::Completed);
}

#[tokio::test]
async fn cancel_running_task_settles_cancelled() {
    let world = World::new();
    let server = world.boot();
    let nb = world.notebook("nb.ipynb", &["slow"]);

    server.manager.start_session(&nb, Default::default()).await.unwrap();

    let id = server
        .manager
        .submit(&nb, 0, "import time; time.sleep(30)", None, None)
        .await
        .unwrap();

    // Let it reach the kernel, then cancel
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(row) = server.store.task(id).unwrap() {
            if row.status == TaskStatus::Running {
                break;
            }
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    server.manager.cancel_task(&nb, Some(id)).await.unwrap();
    assert_eq!(wait_terminal(&server.store, id).await, TaskStatus::Cancelled);
}

#[tokio::test]
async fn input_request_notification_and_reply() {
    let world = World::new();
    let server = world.boot();
    let nb = world.notebook("nb.ipynb", &["ask"]);

    server.manager.start_session(&nb, Default::default()).await.unwrap();

    let id = server
        .manager
        .submit(&nb, 0, "name = input(\"who? \")", None, None)
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while server.notifier.with_method("notebook/input_request").is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "input request never surfaced");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    server.manager.submit_input(&nb, "ada").await.unwrap();
    assert_eq!(wait_terminal(&server.store, id).await, TaskStatus::Completed);
}

#[tokio::test]
async fn status_notifications_accompany_every_terminal_task() {
    let world = World::new();
    let server = world.boot();
    let nb = world.notebook("nb.ipynb", &["a", "b"]);

    server.manager.start_session(&nb, Default::default()).await.unwrap();

    let ok = server.manager.submit(&nb, 0, "x = 1", None, None).await.unwrap();
    let bad = server.manager.submit(&nb, 1, "raise ValueError(\"e\")", None, None).await.unwrap();
    wait_terminal(&server.store, ok).await;
    wait_terminal(&server.store, bad).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let statuses = server.notifier.with_method("notebook/status");
        if statuses.len() >= 2 {
            let kinds: Vec<&str> =
                statuses.iter().filter_map(|s| s["status"].as_str()).collect();
            assert!(kinds.contains(&"completed"));
            assert!(kinds.contains(&"failed"));
            break;
        }
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
