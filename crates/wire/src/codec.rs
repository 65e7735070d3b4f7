// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Newline-delimited JSON codec for the stdio surface.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single framed message. A line longer than this is a
/// protocol violation, not a payload we should buffer.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("read timeout")]
    Timeout,

    #[error("message exceeds {MAX_MESSAGE_BYTES} bytes")]
    TooLarge,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one newline-delimited JSON message.
///
/// `timeout = None` waits indefinitely (the stdio loop blocks on the client).
/// EOF maps to `ConnectionClosed`, which the caller treats as a graceful
/// shutdown signal.
pub async fn read_message<R, T>(reader: &mut R, timeout: Option<Duration>) -> Result<T, ProtocolError>
where
    R: AsyncBufReadExt + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line);
    let n = match timeout {
        Some(t) => tokio::time::timeout(t, read).await.map_err(|_| ProtocolError::Timeout)??,
        None => read.await?,
    };
    if n == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if n > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge);
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Write one message followed by a newline and flush.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_MESSAGE_BYTES {
        return Err(ProtocolError::TooLarge);
    }
    payload.push(b'\n');
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
