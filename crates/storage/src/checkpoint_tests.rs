// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ink_core::{Event, TaskId};
use tempfile::tempdir;

fn sample_state() -> MaterializedState {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::TaskEnqueued {
        id: TaskId::from_string("tsk-a"),
        notebook: "/nb/a.ipynb".into(),
        cell_index: 0,
        code: "x = 1".to_string(),
        created_at_ms: 10,
    });
    state
}

#[test]
fn test_checkpoint_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.json");

    let state = sample_state();
    let checkpointer = Checkpointer::new(path.clone());
    let result = checkpointer.checkpoint_sync(7, &state).unwrap();
    assert_eq!(result.seq, 7);
    assert!(result.size_bytes > 0);

    let snapshot = load_snapshot(&path).unwrap().unwrap();
    assert_eq!(snapshot.seq, 7);
    assert_eq!(snapshot.version, CURRENT_SNAPSHOT_VERSION);
    assert_eq!(snapshot.state.tasks.len(), 1);
}

#[test]
fn test_load_missing_snapshot_is_none() {
    let dir = tempdir().unwrap();
    assert!(load_snapshot(&dir.path().join("absent.json")).unwrap().is_none());
}

#[test]
fn test_corrupt_snapshot_rotated_and_treated_as_absent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    std::fs::write(&path, b"definitely not zstd").unwrap();

    let loaded = load_snapshot(&path).unwrap();
    assert!(loaded.is_none());
    assert!(path.with_extension("bak").exists());
    assert!(!path.exists());
}

#[test]
fn test_checkpoint_overwrites_previous() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    let checkpointer = Checkpointer::new(path.clone());

    checkpointer.checkpoint_sync(1, &MaterializedState::default()).unwrap();
    checkpointer.checkpoint_sync(2, &sample_state()).unwrap();

    let snapshot = load_snapshot(&path).unwrap().unwrap();
    assert_eq!(snapshot.seq, 2);
    assert_eq!(snapshot.state.tasks.len(), 1);
}
