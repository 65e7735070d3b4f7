// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC method dispatch onto the engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ink_core::{SystemClock, TaskId};
use ink_engine::{EngineError, SessionManager, StartOptions, SyncStrategy};
use ink_wire::{error_codes, RpcError, RpcRequest, RpcResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::warn;

pub type DaemonManager = SessionManager<SystemClock>;

/// Shared context for request handlers.
pub struct RpcCtx {
    pub manager: Arc<DaemonManager>,
    pub start_time: Instant,
    /// Signalled to begin graceful daemon shutdown.
    pub shutdown: Arc<Notify>,
}

#[derive(Deserialize)]
struct StartParams {
    notebook_path: PathBuf,
    #[serde(default)]
    env_root: Option<PathBuf>,
    /// Per-task execution timeout in seconds.
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    agent_id: Option<String>,
}

#[derive(Deserialize)]
struct StopParams {
    notebook_path: PathBuf,
    #[serde(default)]
    cleanup_assets: bool,
}

#[derive(Deserialize)]
struct NotebookParams {
    notebook_path: PathBuf,
}

#[derive(Deserialize)]
struct SubmitParams {
    notebook_path: PathBuf,
    cell_index: i32,
    code: String,
    #[serde(default)]
    task_id: Option<String>,
    #[serde(default)]
    stop_on_error: Option<bool>,
}

#[derive(Deserialize)]
struct CancelParams {
    notebook_path: PathBuf,
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Deserialize)]
struct InputParams {
    notebook_path: PathBuf,
    text: String,
}

#[derive(Deserialize)]
struct TaskStatusParams {
    notebook_path: PathBuf,
    task_id: String,
}

#[derive(Deserialize)]
struct DetectParams {
    notebook_path: PathBuf,
    /// Editor-buffer hashes keyed by cell index (JSON keys are strings).
    #[serde(default)]
    buffer_hashes: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct ResyncParams {
    notebook_path: PathBuf,
    #[serde(default)]
    strategy: Option<String>,
}

/// Handle one request. `None` for notifications (no id → no response).
pub async fn dispatch(ctx: &RpcCtx, request: RpcRequest) -> Option<RpcResponse> {
    if !request.is_valid() {
        return Some(RpcResponse::err(Value::Null, RpcError::invalid_request()));
    }

    let id = request.id.clone();
    let result = handle(ctx, &request).await;

    let id = id?;
    Some(match result {
        Ok(value) => RpcResponse::ok(id, value),
        Err(error) => RpcResponse::err(id, error),
    })
}

async fn handle(ctx: &RpcCtx, request: &RpcRequest) -> Result<Value, RpcError> {
    match request.method.as_str() {
        "start_session" => {
            let p: StartParams = params(request)?;
            let info = ctx
                .manager
                .start_session(
                    &p.notebook_path,
                    StartOptions {
                        env_root: p.env_root,
                        timeout: p.timeout.map(Duration::from_secs),
                        agent_id: p.agent_id,
                    },
                )
                .await
                .map_err(engine_error)?;
            Ok(serde_json::to_value(info).map_err(|e| RpcError::internal(e))?)
        }

        "stop_session" => {
            let p: StopParams = params(request)?;
            ctx.manager
                .stop_session(&p.notebook_path, p.cleanup_assets)
                .await
                .map_err(engine_error)?;
            Ok(json!({ "stopped": true }))
        }

        "restart_session" => {
            let p: NotebookParams = params(request)?;
            let info =
                ctx.manager.restart_session(&p.notebook_path).await.map_err(engine_error)?;
            Ok(serde_json::to_value(info).map_err(|e| RpcError::internal(e))?)
        }

        "interrupt_session" => {
            let p: NotebookParams = params(request)?;
            ctx.manager.interrupt_session(&p.notebook_path).await.map_err(engine_error)?;
            Ok(json!({ "interrupted": true }))
        }

        "submit" => {
            let p: SubmitParams = params(request)?;
            let task_id = p.task_id.map(|raw| parse_task_id(&raw)).transpose()?;
            let id = ctx
                .manager
                .submit(&p.notebook_path, p.cell_index, &p.code, task_id, p.stop_on_error)
                .await
                .map_err(engine_error)?;
            Ok(json!({ "task_id": id }))
        }

        "cancel_task" => {
            let p: CancelParams = params(request)?;
            let task_id = p.task_id.map(|raw| parse_task_id(&raw)).transpose()?;
            ctx.manager.cancel_task(&p.notebook_path, task_id).await.map_err(engine_error)?;
            Ok(json!({ "cancelled": true }))
        }

        "submit_input" => {
            let p: InputParams = params(request)?;
            ctx.manager.submit_input(&p.notebook_path, &p.text).await.map_err(engine_error)?;
            Ok(json!({ "submitted": true }))
        }

        "task_status" => {
            let p: TaskStatusParams = params(request)?;
            let report = ctx
                .manager
                .task_status(&p.notebook_path, parse_task_id(&p.task_id)?)
                .map_err(engine_error)?;
            Ok(serde_json::to_value(report).map_err(|e| RpcError::internal(e))?)
        }

        "detect_sync" => {
            let p: DetectParams = params(request)?;
            let buffer_hashes = p
                .buffer_hashes
                .map(|raw| {
                    raw.into_iter()
                        .map(|(k, v)| {
                            k.parse::<i32>()
                                .map(|k| (k, v))
                                .map_err(|_| RpcError::invalid_params("buffer_hashes keys"))
                        })
                        .collect::<Result<HashMap<i32, String>, RpcError>>()
                })
                .transpose()?;
            let report = ctx
                .manager
                .detect_sync(&p.notebook_path, buffer_hashes.as_ref())
                .map_err(engine_error)?;
            Ok(serde_json::to_value(report).map_err(|e| RpcError::internal(e))?)
        }

        "resync" => {
            let p: ResyncParams = params(request)?;
            let strategy = match p.strategy.as_deref() {
                None => SyncStrategy::default(),
                Some(raw) => raw.parse().map_err(RpcError::invalid_params)?,
            };
            let report =
                ctx.manager.resync(&p.notebook_path, strategy).await.map_err(engine_error)?;
            Ok(serde_json::to_value(report).map_err(|e| RpcError::internal(e))?)
        }

        "list_sessions" => {
            let sessions = ctx.manager.list_sessions();
            Ok(json!({ "sessions": sessions }))
        }

        "collect_garbage" => {
            let p: NotebookParams = params(request)?;
            let removed = ctx.manager.collect_garbage(&p.notebook_path).map_err(engine_error)?;
            Ok(json!({ "removed": removed }))
        }

        "server_status" => {
            let stats = ctx.manager.store().stats().map_err(|e| RpcError::internal(e))?;
            Ok(json!({
                "uptime_seconds": ctx.start_time.elapsed().as_secs(),
                "sessions": ctx.manager.list_sessions().len(),
                "store": stats,
            }))
        }

        "shutdown" => {
            ctx.shutdown.notify_one();
            Ok(json!({ "shutting_down": true }))
        }

        other => Err(RpcError::method_not_found(other)),
    }
}

fn params<T: serde::de::DeserializeOwned>(request: &RpcRequest) -> Result<T, RpcError> {
    let raw = request.params.clone().unwrap_or(Value::Null);
    serde_json::from_value(raw).map_err(|e| RpcError::invalid_params(e))
}

fn parse_task_id(raw: &str) -> Result<TaskId, RpcError> {
    if raw.is_empty() || raw.len() > ink_core::id::ID_MAX_LEN {
        return Err(RpcError::invalid_params(format!("task_id {raw:?}")));
    }
    Ok(TaskId::from_string(raw))
}

/// Map engine errors to the protocol's error-kind taxonomy.
fn engine_error(error: EngineError) -> RpcError {
    match &error {
        // Caller errors -- never fatal, never retried
        EngineError::InvalidPath(_)
        | EngineError::InvalidCellIndex(_)
        | EngineError::SessionNotFound(_)
        | EngineError::TaskNotFound(_)
        | EngineError::Notebook(_) => RpcError::invalid_params(error),

        // Resource exhaustion -- retryable with suggestion
        EngineError::KernelCapReached { suggestion, .. } => RpcError::with_data(
            error_codes::RESOURCE_EXHAUSTED,
            error.to_string(),
            json!({ "suggestion": suggestion, "retry_after_seconds": 5 }),
        ),
        EngineError::QueueFull { .. } => RpcError::with_data(
            error_codes::RESOURCE_EXHAUSTED,
            error.to_string(),
            json!({ "retry_after_seconds": 2 }),
        ),
        EngineError::SessionStopping(_) => RpcError::with_data(
            error_codes::RESOURCE_EXHAUSTED,
            error.to_string(),
            json!({ "retry_after_seconds": 1 }),
        ),

        // Kernel startup failures carry their diagnostic hints
        EngineError::Kernel(ink_kernel::KernelError::Startup(_)) => {
            RpcError::new(error_codes::KERNEL_STARTUP, error.to_string())
        }

        other => {
            warn!(error = %other, "internal error handling request");
            RpcError::internal(other)
        }
    }
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
