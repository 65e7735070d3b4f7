// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durability: submitted work survives a crash; notebooks are never left
//! half-written.

use super::prelude::*;
use ink_core::TaskStatus;

#[tokio::test]
async fn pending_task_survives_restart_and_reruns() {
    let world = World::new();
    let nb_path;
    let task_id;

    // First server life: session up, task accepted but kernel never answers,
    // then the process "dies" (we just drop everything).
    {
        let server = world.boot();
        nb_path = world.notebook("nb.ipynb", &["print(\"recovered\")"]);

        // Enqueue directly: the row is durable the moment submit returns
        task_id = server
            .store
            .enqueue(&nb_path, 0, "print(\"recovered\")", None, 42)
            .unwrap();

        let pending = server.store.pending_tasks(None).unwrap();
        assert_eq!(pending.len(), 1);
        drop(server);
    }

    // Second life: exactly one pending record, picked up on session start
    let server = world.boot();
    let pending = server.store.pending_tasks(None).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, task_id);
    assert_eq!(pending[0].code, "print(\"recovered\")");

    server.manager.start_session(&nb_path, Default::default()).await.unwrap();
    assert_eq!(wait_terminal(&server.store, task_id).await, TaskStatus::Completed);

    // And the notebook reflects the run
    let nb = wait_notebook(&nb_path, |nb| !nb.cells[0].outputs.is_empty()).await;
    assert_eq!(nb.cells[0].execution_count, Some(1));
}

#[tokio::test]
async fn running_task_survives_restart_as_reenqueue_target() {
    let world = World::new();
    let nb_path;
    let task_id;

    {
        let server = world.boot();
        nb_path = world.notebook("nb.ipynb", &["x = 1"]);
        task_id = server.store.enqueue(&nb_path, 0, "x = 1", None, 1).unwrap();
        server.store.mark_running(task_id, 2).unwrap();
        drop(server);
    }

    // After restart the store still shows the task as running (it was
    // mid-flight when the server died)...
    let server = world.boot();
    let row = server.store.task(task_id).unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Running);

    // ...and an idempotent re-enqueue of the same id resets it to pending
    // with the retry counter bumped once it had settled. Here it is still
    // running, so resync-style recovery re-enqueues it directly.
    server.store.enqueue(&nb_path, 0, "x = 1", Some(task_id), 3).unwrap();
    let row = server.store.task(task_id).unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Pending);

    server.manager.start_session(&nb_path, Default::default()).await.unwrap();
    assert_eq!(wait_terminal(&server.store, task_id).await, TaskStatus::Completed);
}

#[tokio::test]
async fn finalized_notebook_is_whole_and_leaves_no_temp_files() {
    let world = World::new();
    let server = world.boot();
    let nb_path = world.notebook("nb.ipynb", &["print(\"hi\")", "x = 1"]);

    server.manager.start_session(&nb_path, Default::default()).await.unwrap();
    let id = server.manager.submit(&nb_path, 0, "print(\"hi\")", None, None).await.unwrap();
    wait_terminal(&server.store, id).await;

    let nb = wait_notebook(&nb_path, |nb| !nb.cells[0].outputs.is_empty()).await;
    // The whole document parses and both cells are intact -- never a torn file
    assert_eq!(nb.cells.len(), 2);
    assert_eq!(nb.cells[1].source.as_string(), "x = 1");

    // Atomic replacement leaves no tempfile droppings next to the notebook
    let leftovers: Vec<_> = std::fs::read_dir(nb_path.parent().unwrap())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn checkpoint_shrinks_wal_and_preserves_state() {
    let world = World::new();
    let nb_path = world.notebook("nb.ipynb", &["x"]);
    let mut ids = Vec::new();

    {
        let server = world.boot();
        server.manager.start_session(&nb_path, Default::default()).await.unwrap();
        for i in 0..10 {
            let id = server.manager.submit(&nb_path, 0, &format!("x = {i}"), None, None).await.unwrap();
            ids.push(id);
        }
        for id in &ids {
            wait_terminal(&server.store, *id).await;
        }
        server.manager.shutdown_all().await;
    }

    // Restart recovers everything from the snapshot
    let server = world.boot();
    for id in &ids {
        assert_eq!(
            server.store.task(*id).unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }
}
