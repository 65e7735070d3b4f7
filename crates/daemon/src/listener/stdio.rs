// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stdio transport: one JSON-RPC message per line on stdin/stdout.
//!
//! Responses and server notifications share stdout through a single writer
//! task, so frames never interleave. Pipe EOF is the client hanging up:
//! the daemon shuts down gracefully, kernels included.

use std::sync::Arc;

use ink_wire::{ProtocolError, RpcError, RpcRequest, RpcResponse};
use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::rpc::{self, RpcCtx};
use crate::subscribers::ConnectionManager;

/// Run the stdio loop until EOF or a shutdown request.
pub async fn run_stdio(ctx: Arc<RpcCtx>, connections: Arc<ConnectionManager>) {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);

    // Single stdout writer: responses and notifications both queue here.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    // The stdio client is a subscriber: notifications stream to stdout.
    let (subscriber_id, mut notifications) = connections.subscribe();
    let forward = {
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(payload) = notifications.recv().await {
                if out_tx.send(payload).is_err() {
                    break;
                }
            }
        })
    };

    loop {
        let request: Result<RpcRequest, ProtocolError> =
            ink_wire::read_message(&mut reader, None).await;

        let request = match request {
            Ok(request) => request,
            Err(ProtocolError::ConnectionClosed) => {
                info!("stdin closed, shutting down");
                ctx.shutdown.notify_one();
                break;
            }
            Err(ProtocolError::Json(e)) => {
                debug!(error = %e, "unparseable request");
                let response = RpcResponse::err(Value::Null, RpcError::parse_error(e));
                send(&out_tx, &response);
                continue;
            }
            Err(e) => {
                warn!(error = %e, "stdio read error");
                ctx.shutdown.notify_one();
                break;
            }
        };

        if let Some(response) = rpc::dispatch(&ctx, request).await {
            send(&out_tx, &response);
        }
    }

    connections.unsubscribe(subscriber_id);
    forward.abort();
    drop(out_tx);
    let _ = writer.await;
}

fn send(out_tx: &mpsc::UnboundedSender<String>, response: &RpcResponse) {
    if let Ok(payload) = serde_json::to_string(response) {
        let _ = out_tx.send(payload);
    }
}
