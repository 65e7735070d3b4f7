// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart recovery: zombie reconciliation safety and pending-task pickup.

use super::prelude::*;
use ink_core::TaskStatus;
use ink_engine::{reconcile_zombies, EnvDescriptor, SessionDescriptor};
use std::path::PathBuf;

fn write_connection_file(dir: &std::path::Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(
        &path,
        serde_json::json!({
            "transport": "tcp",
            "ip": "127.0.0.1",
            "shell_port": 1, "iopub_port": 2, "stdin_port": 3,
            "control_port": 4, "hb_port": 5,
            "key": "k", "signature_scheme": "hmac-sha256",
        })
        .to_string(),
    )
    .unwrap();
    path
}

fn descriptor(notebook: &str, kernel_pid: i32, server_pid: i32, conn: PathBuf) -> SessionDescriptor {
    SessionDescriptor {
        notebook_path: PathBuf::from(notebook),
        connection_file: conn,
        kernel_pid,
        server_pid,
        env_info: EnvDescriptor {
            interpreter: PathBuf::from("python3"),
            env_name: "system".to_string(),
        },
        created_at_ms: 0,
    }
}

/// Two servers A and B share a machine. B's startup reconciliation must not
/// terminate kernels owned by A (verified by PID-liveness check).
#[test]
fn reconciliation_never_kills_another_live_servers_kernels() {
    let world = World::new();
    let sessions = world.data_dir().join("sessions");
    let conn = write_connection_file(world.dir.path(), "kernel-a.json");

    // Server A is pid 1 (always alive); its kernel is our own pid, also
    // alive. Both liveness checks must pass for the record to be foreign.
    let own = std::process::id() as i32;
    descriptor("/nb/owned-by-a.ipynb", own, 1, conn).write(&sessions).unwrap();

    // Server B reconciles
    let report = reconcile_zombies(&sessions, own);

    assert!(report.killed.is_empty(), "fratricide: B must not touch A's kernels");
    assert_eq!(report.foreign, 1);
}

#[test]
fn reconciliation_cleans_dead_servers_records() {
    let world = World::new();
    let sessions = world.data_dir().join("sessions");
    let conn = write_connection_file(world.dir.path(), "kernel-b.json");

    let dead = i32::MAX - 23;
    descriptor("/nb/orphaned.ipynb", dead, dead, conn).write(&sessions).unwrap();

    let report = reconcile_zombies(&sessions, std::process::id() as i32);
    assert_eq!(report.cleaned, 1);
    assert!(report.killed.is_empty(), "dead kernel needs no signal");
}

#[tokio::test]
async fn restart_picks_up_pending_work_via_resync_path() {
    let world = World::new();
    let nb;
    let id;

    {
        let server = world.boot();
        nb = world.notebook("nb.ipynb", &["print(\"later\")"]);
        id = server.store.enqueue(&nb, 0, "print(\"later\")", None, 7).unwrap();
        // Server dies before any session existed for the notebook
        drop(server);
    }

    let server = world.boot();
    // recover() runs reconciliation and the janitor without touching the
    // pending row
    server.manager.recover().await;
    let pending = server.store.pending_tasks(None).unwrap();
    assert_eq!(pending.len(), 1);

    // Starting the session requeues it; it completes normally
    server.manager.start_session(&nb, Default::default()).await.unwrap();
    assert_eq!(wait_terminal(&server.store, id).await, TaskStatus::Completed);
}

#[tokio::test]
async fn recover_prunes_stale_terminal_rows() {
    let world = World::new();
    let nb;

    {
        let server = world.boot();
        nb = world.notebook("nb.ipynb", &["x"]);
        let id = server.store.enqueue(&nb, 0, "x = 1", None, 0).unwrap();
        server.store.mark_running(id, 1).unwrap();
        server.store.mark_complete(id, None, None, 2).unwrap();
        drop(server);
    }

    // Well past the 24h cleanup age by the time "now" rolls around
    let server = world.boot();
    server.manager.recover().await;

    // The completed row from epoch-ms 2 is ancient relative to wall clock
    let stats = server.store.stats().unwrap();
    assert_eq!(stats.completed, 0, "stale terminal rows are pruned at startup");
}
