// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport: the stdio protocol, one JSON-RPC message per frame.
//!
//! An optional bearer token (`?token=...`) is checked against the
//! configured secret; mismatches close with the policy-violation code.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use ink_engine::Notifier;
use ink_wire::{RpcError, RpcRequest, RpcResponse};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{Request as WsRequest, Response as WsResponse};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::rpc::{self, RpcCtx};
use crate::subscribers::ConnectionManager;

/// Accept WebSocket clients until shutdown.
pub async fn run_websocket(
    listener: TcpListener,
    ctx: Arc<RpcCtx>,
    connections: Arc<ConnectionManager>,
    token: Option<String>,
    idle_timeout: Option<Duration>,
) {
    info!(addr = ?listener.local_addr().ok(), "websocket listener started");

    if let Some(idle) = idle_timeout {
        tokio::spawn(idle_watchdog(Arc::clone(&ctx), Arc::clone(&connections), idle));
    }

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept error");
                continue;
            }
        };
        debug!(%addr, "websocket connection");
        let ctx = Arc::clone(&ctx);
        let connections = Arc::clone(&connections);
        let token = token.clone();
        tokio::spawn(async move {
            handle_connection(stream, ctx, connections, token).await;
        });
    }
}

/// Auto-exit when no clients have been connected for the idle window.
async fn idle_watchdog(ctx: Arc<RpcCtx>, connections: Arc<ConnectionManager>, idle: Duration) {
    let mut last_activity = tokio::time::Instant::now();
    loop {
        tokio::time::sleep(Duration::from_secs(5)).await;
        if connections.subscriber_count() > 0 {
            last_activity = tokio::time::Instant::now();
        } else if last_activity.elapsed() >= idle {
            info!(idle_seconds = idle.as_secs(), "no clients connected, exiting");
            ctx.shutdown.notify_one();
            return;
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    ctx: Arc<RpcCtx>,
    connections: Arc<ConnectionManager>,
    token: Option<String>,
) {
    // Pull the token out of the query string during the handshake.
    let mut supplied_token: Option<String> = None;
    let callback = |request: &WsRequest, response: WsResponse| {
        supplied_token = request
            .uri()
            .query()
            .and_then(|query| {
                query.split('&').find_map(|pair| pair.strip_prefix("token=").map(str::to_string))
            });
        Ok(response)
    };

    let mut socket = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!(error = %e, "websocket handshake failed");
            return;
        }
    };

    if let Some(expected) = &token {
        if supplied_token.as_deref() != Some(expected.as_str()) {
            warn!("websocket client rejected: bad token");
            let _ = socket
                .close(Some(CloseFrame {
                    code: CloseCode::Policy,
                    reason: "invalid token".into(),
                }))
                .await;
            return;
        }
    }

    let (subscriber_id, mut notifications) = connections.subscribe();
    let (mut sink, mut source) = socket.split();

    // Outbound: responses and notifications funnel through one channel so
    // writes never interleave.
    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let sender = tokio::spawn(async move {
        while let Some(payload) = out_rx.recv().await {
            if sink.send(Message::text(payload)).await.is_err() {
                break;
            }
        }
    });
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

    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let response = match serde_json::from_str::<RpcRequest>(&frame) {
            Ok(request) => rpc::dispatch(&ctx, request).await,
            Err(e) => Some(RpcResponse::err(Value::Null, RpcError::parse_error(e))),
        };
        if let Some(response) = response {
            if let Ok(payload) = serde_json::to_string(&response) {
                let _ = out_tx.send(payload);
            }
        }
    }

    let remaining = connections.unsubscribe(subscriber_id);
    if remaining == 0 {
        // Last client gone: deferred notebook writes reach disk now.
        ctx.manager.flush_all_dirty();
    }
    forward.abort();
    sender.abort();
    debug!(subscriber = subscriber_id, "websocket client disconnected");
}
