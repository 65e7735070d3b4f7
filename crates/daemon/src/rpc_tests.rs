// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ink_engine::{FakeLauncher, NullNotifier};
use ink_notebook::Notebook;
use ink_storage::Store;
use ink_wire::error_codes;
use serde_json::json;

struct Fixture {
    _dir: tempfile::TempDir,
    ctx: RpcCtx,
    dir_path: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = ink_engine::EngineConfig {
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let store = Arc::new(
        Store::open(&config.wal_path(), &config.snapshot_path()).unwrap(),
    );
    let manager = SessionManager::new(
        store,
        Arc::new(NullNotifier) as _,
        Arc::new(FakeLauncher::new()) as _,
        config,
        SystemClock,
    );
    Fixture {
        dir_path: dir.path().to_path_buf(),
        _dir: dir,
        ctx: RpcCtx {
            manager,
            start_time: Instant::now(),
            shutdown: Arc::new(Notify::new()),
        },
    }
}

fn write_notebook(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    ink_notebook::save(&Notebook::with_code_cells(&["x = 1"]), &path).unwrap();
    path
}

fn request(method: &str, params: Value) -> RpcRequest {
    RpcRequest::new(1, method, Some(params))
}

#[tokio::test]
async fn test_unknown_method() {
    let f = fixture();
    let response = dispatch(&f.ctx, request("frobnicate", json!({}))).await.unwrap();
    assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_version_rejected() {
    let f = fixture();
    let raw = RpcRequest {
        jsonrpc: "1.0".to_string(),
        id: Some(json!(1)),
        method: "list_sessions".to_string(),
        params: None,
    };
    let response = dispatch(&f.ctx, raw).await.unwrap();
    assert_eq!(response.error.unwrap().code, error_codes::INVALID_REQUEST);
}

#[tokio::test]
async fn test_missing_params_is_invalid_params() {
    let f = fixture();
    let response = dispatch(&f.ctx, request("submit", json!({}))).await.unwrap();
    assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
}

#[tokio::test]
async fn test_notification_gets_no_response() {
    let f = fixture();
    let notification = RpcRequest {
        jsonrpc: "2.0".to_string(),
        id: None,
        method: "list_sessions".to_string(),
        params: None,
    };
    assert!(dispatch(&f.ctx, notification).await.is_none());
}

#[tokio::test]
async fn test_start_submit_status_roundtrip() {
    let f = fixture();
    let nb = write_notebook(&f.dir_path, "a.ipynb");

    let response = dispatch(
        &f.ctx,
        request("start_session", json!({ "notebook_path": nb })),
    )
    .await
    .unwrap();
    assert!(response.is_ok(), "start failed: {:?}", response.error);

    let response = dispatch(
        &f.ctx,
        request(
            "submit",
            json!({ "notebook_path": nb, "cell_index": 0, "code": "x = 1" }),
        ),
    )
    .await
    .unwrap();
    assert!(response.is_ok());
    let task_id = response.result.unwrap()["task_id"].as_str().unwrap().to_string();

    // Status is queryable immediately
    let response = dispatch(
        &f.ctx,
        request("task_status", json!({ "notebook_path": nb, "task_id": task_id })),
    )
    .await
    .unwrap();
    assert!(response.is_ok());
    let status = response.result.unwrap()["status"].as_str().unwrap().to_string();
    assert!(["pending", "running", "completed"].contains(&status.as_str()));
}

#[tokio::test]
async fn test_caller_supplied_task_id_roundtrip() {
    let f = fixture();
    let nb = write_notebook(&f.dir_path, "a.ipynb");
    dispatch(&f.ctx, request("start_session", json!({ "notebook_path": nb })))
        .await
        .unwrap();

    let uuid = "2c5ea4c0-4067-11e9-8bad-9b1deb4d3b7d";
    let response = dispatch(
        &f.ctx,
        request(
            "submit",
            json!({ "notebook_path": nb, "cell_index": 0, "code": "x=1", "task_id": uuid }),
        ),
    )
    .await
    .unwrap();
    assert_eq!(response.result.unwrap()["task_id"], uuid);
}

#[tokio::test]
async fn test_overlong_task_id_is_invalid_params() {
    let f = fixture();
    let nb = write_notebook(&f.dir_path, "a.ipynb");
    dispatch(&f.ctx, request("start_session", json!({ "notebook_path": nb })))
        .await
        .unwrap();

    let response = dispatch(
        &f.ctx,
        request(
            "submit",
            json!({
                "notebook_path": nb,
                "cell_index": 0,
                "code": "x=1",
                "task_id": "x".repeat(64),
            }),
        ),
    )
    .await
    .unwrap();
    assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
}

#[tokio::test]
async fn test_submit_without_session_is_caller_error() {
    let f = fixture();
    let nb = write_notebook(&f.dir_path, "a.ipynb");

    let response = dispatch(
        &f.ctx,
        request("submit", json!({ "notebook_path": nb, "cell_index": 0, "code": "x" })),
    )
    .await
    .unwrap();
    assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
}

#[tokio::test]
async fn test_kernel_cap_maps_to_resource_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let config = ink_engine::EngineConfig {
        data_dir: dir.path().to_path_buf(),
        max_kernels: 1,
        ..Default::default()
    };
    let store = Arc::new(
        Store::open(&config.wal_path(), &config.snapshot_path()).unwrap(),
    );
    let manager = SessionManager::new(
        store,
        Arc::new(NullNotifier) as _,
        Arc::new(FakeLauncher::new()) as _,
        config,
        SystemClock,
    );
    let ctx = RpcCtx { manager, start_time: Instant::now(), shutdown: Arc::new(Notify::new()) };

    let a = write_notebook(dir.path(), "a.ipynb");
    let b = write_notebook(dir.path(), "b.ipynb");

    dispatch(&ctx, request("start_session", json!({ "notebook_path": a }))).await.unwrap();
    let response =
        dispatch(&ctx, request("start_session", json!({ "notebook_path": b }))).await.unwrap();

    let error = response.error.unwrap();
    assert_eq!(error.code, error_codes::RESOURCE_EXHAUSTED);
    let data = error.data.unwrap();
    assert!(data["suggestion"].is_string());
    assert!(data["retry_after_seconds"].is_number());
}

#[tokio::test]
async fn test_list_sessions_and_server_status() {
    let f = fixture();
    let nb = write_notebook(&f.dir_path, "a.ipynb");
    dispatch(&f.ctx, request("start_session", json!({ "notebook_path": nb })))
        .await
        .unwrap();

    let response = dispatch(&f.ctx, request("list_sessions", json!({}))).await.unwrap();
    assert_eq!(response.result.unwrap()["sessions"].as_array().unwrap().len(), 1);

    let response = dispatch(&f.ctx, request("server_status", json!({}))).await.unwrap();
    let result = response.result.unwrap();
    assert_eq!(result["sessions"], 1);
    assert!(result["store"].is_object());
}

#[tokio::test]
async fn test_bad_resync_strategy() {
    let f = fixture();
    let nb = write_notebook(&f.dir_path, "a.ipynb");
    dispatch(&f.ctx, request("start_session", json!({ "notebook_path": nb })))
        .await
        .unwrap();

    let response = dispatch(
        &f.ctx,
        request("resync", json!({ "notebook_path": nb, "strategy": "yolo" })),
    )
    .await
    .unwrap();
    assert_eq!(response.error.unwrap().code, error_codes::INVALID_PARAMS);
}

#[tokio::test]
async fn test_shutdown_signals_notify() {
    let f = fixture();
    let notified = {
        let shutdown = Arc::clone(&f.ctx.shutdown);
        tokio::spawn(async move { shutdown.notified().await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let response = dispatch(&f.ctx, request("shutdown", json!({}))).await.unwrap();
    assert!(response.is_ok());
    tokio::time::timeout(std::time::Duration::from_secs(1), notified)
        .await
        .unwrap()
        .unwrap();
}
