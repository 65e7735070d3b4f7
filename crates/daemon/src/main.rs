// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `inkd` -- the Inkpot notebook kernel daemon.
//!
//! Default mode serves newline-delimited JSON-RPC on stdio (stdout stays a
//! clean protocol channel; logs go to the daemon log file and stderr).
//! `--ws-port` additionally serves the same protocol over WebSocket.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ink_daemon::{lifecycle, listener, Config};
use tokio::net::TcpListener;
use tracing::error;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "inkd", about = "Notebook kernel orchestration daemon")]
struct Args {
    /// State directory (overrides DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Also listen for WebSocket clients on this port
    #[arg(long)]
    ws_port: Option<u16>,

    /// WebSocket only; do not serve JSON-RPC on stdio
    #[arg(long, requires = "ws_port")]
    no_stdio: bool,
}

fn init_tracing(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(
        config.log_path.parent().unwrap_or(&config.data_dir),
        "daemon.log",
    );
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(file_writer.and(std::io::stderr))
        .with_ansi(false)
        .init();
    guard
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let data_dir = args.data_dir.unwrap_or_else(ink_daemon::env::data_dir);
    let config = Config::load(data_dir);

    let _log_guard = init_tracing(&config);

    let state = match lifecycle::startup(config).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "daemon startup failed");
            eprintln!("inkd: {e}");
            std::process::exit(1);
        }
    };

    let ctx = state.rpc_ctx();
    let connections = Arc::clone(&state.connections);
    let shutdown = Arc::clone(&state.shutdown);

    if let Some(port) = args.ws_port {
        let addr = format!("127.0.0.1:{port}");
        match TcpListener::bind(&addr).await {
            Ok(tcp) => {
                tokio::spawn(listener::run_websocket(
                    tcp,
                    Arc::clone(&ctx),
                    Arc::clone(&connections),
                    ink_daemon::env::session_token(),
                    ink_daemon::env::idle_timeout(),
                ));
            }
            Err(e) => {
                error!(addr, error = %e, "could not bind websocket listener");
                eprintln!("inkd: could not bind {addr}: {e}");
                std::process::exit(1);
            }
        }
    }

    if !args.no_stdio {
        tokio::spawn(listener::run_stdio(Arc::clone(&ctx), Arc::clone(&connections)));
    }

    // Park until a listener (EOF, shutdown request, idle timeout) or a
    // signal asks us to stop.
    tokio::select! {
        _ = shutdown.notified() => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    state.shutdown().await;
}
