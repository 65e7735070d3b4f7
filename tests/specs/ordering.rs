// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-session ordering: execution counts are strictly monotone and follow
//! `created_at` order, for any interleaving of submissions.

use super::prelude::*;
use ink_core::TaskStatus;

#[tokio::test]
async fn execution_counts_follow_submission_order() {
    let world = World::new();
    let server = world.boot();
    let nb = world.notebook("nb.ipynb", &["a", "b", "c", "d", "e"]);

    server.manager.start_session(&nb, Default::default()).await.unwrap();

    // Interleave submissions with tiny pauses so created_at stamps differ
    let mut ids = Vec::new();
    for i in 0..5 {
        let id = server
            .manager
            .submit(&nb, i, &format!("x = {i}"), None, None)
            .await
            .unwrap();
        ids.push(id);
        if i % 2 == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        }
    }

    for id in &ids {
        assert_eq!(wait_terminal(&server.store, *id).await, TaskStatus::Completed);
    }

    let rows: Vec<_> = ids
        .iter()
        .map(|id| server.store.task(*id).unwrap().unwrap())
        .collect();

    // Strictly monotone execution counts, in created_at order
    let counts: Vec<i32> = rows.iter().map(|r| r.execution_count.unwrap()).collect();
    assert_eq!(counts, vec![1, 2, 3, 4, 5]);
    assert!(rows.windows(2).all(|w| w[0].created_at_ms <= w[1].created_at_ms));
    assert!(rows.windows(2).all(|w| w[0].started_at_ms <= w[1].started_at_ms));
}

#[tokio::test]
async fn sessions_do_not_share_counters() {
    let world = World::new();
    let server = world.boot();
    let nb_a = world.notebook("a.ipynb", &["x"]);
    let nb_b = world.notebook("b.ipynb", &["x"]);

    server.manager.start_session(&nb_a, Default::default()).await.unwrap();
    server.manager.start_session(&nb_b, Default::default()).await.unwrap();

    let a = server.manager.submit(&nb_a, 0, "x = 1", None, None).await.unwrap();
    let b = server.manager.submit(&nb_b, 0, "x = 1", None, None).await.unwrap();

    wait_terminal(&server.store, a).await;
    wait_terminal(&server.store, b).await;

    // Each session assigns counts independently, starting from 1
    assert_eq!(server.store.task(a).unwrap().unwrap().execution_count, Some(1));
    assert_eq!(server.store.task(b).unwrap().unwrap().execution_count, Some(1));
}
