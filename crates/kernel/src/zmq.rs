// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ZeroMQ channel driver.
//!
//! Shell, control and stdin are DEALER sockets; iopub is a SUB socket with a
//! blanket subscription. Each socket is owned by one pump task; the transport
//! talks to the pumps over bounded channels.

use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

use crate::connection::ConnectionInfo;
use crate::message::{Header, KernelMessage};
use crate::transport::KernelTransport;
use crate::KernelError;

const DELIMITER: &[u8] = b"<IDS|MSG>";
const CHANNEL_DEPTH: usize = 128;

/// A connected set of kernel channels.
pub struct ZmqTransport {
    shell_tx: mpsc::Sender<KernelMessage>,
    control_tx: mpsc::Sender<KernelMessage>,
    stdin_tx: mpsc::Sender<KernelMessage>,
    iopub_rx: Mutex<mpsc::Receiver<KernelMessage>>,
    stdin_rx: Mutex<mpsc::Receiver<KernelMessage>>,
    reply_rx: Mutex<mpsc::Receiver<KernelMessage>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ZmqTransport {
    /// Connect all four channels described by the connection file.
    pub async fn connect(info: &ConnectionInfo) -> Result<Self, KernelError> {
        let key = info.key.clone();

        let mut shell = DealerSocket::new();
        shell
            .connect(&info.endpoint(info.shell_port))
            .await
            .map_err(|e| KernelError::Transport(e.to_string()))?;

        let mut control = DealerSocket::new();
        control
            .connect(&info.endpoint(info.control_port))
            .await
            .map_err(|e| KernelError::Transport(e.to_string()))?;

        let mut stdin = DealerSocket::new();
        stdin
            .connect(&info.endpoint(info.stdin_port))
            .await
            .map_err(|e| KernelError::Transport(e.to_string()))?;

        let mut iopub = SubSocket::new();
        iopub
            .connect(&info.endpoint(info.iopub_port))
            .await
            .map_err(|e| KernelError::Transport(e.to_string()))?;
        iopub
            .subscribe("")
            .await
            .map_err(|e| KernelError::Transport(e.to_string()))?;

        let (shell_tx, shell_out) = mpsc::channel(CHANNEL_DEPTH);
        let (control_tx, control_out) = mpsc::channel(CHANNEL_DEPTH);
        let (stdin_tx, stdin_out) = mpsc::channel(CHANNEL_DEPTH);
        let (iopub_in, iopub_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (stdin_in, stdin_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (reply_in, reply_rx) = mpsc::channel(CHANNEL_DEPTH);

        let tasks = vec![
            tokio::spawn(dealer_pump(shell, shell_out, reply_in.clone(), key.clone(), "shell")),
            tokio::spawn(dealer_pump(control, control_out, reply_in, key.clone(), "control")),
            tokio::spawn(dealer_pump(stdin, stdin_out, stdin_in, key.clone(), "stdin")),
            tokio::spawn(iopub_pump(iopub, iopub_in, key)),
        ];

        Ok(Self {
            shell_tx,
            control_tx,
            stdin_tx,
            iopub_rx: Mutex::new(iopub_rx),
            stdin_rx: Mutex::new(stdin_rx),
            reply_rx: Mutex::new(reply_rx),
            tasks,
        })
    }
}

#[async_trait::async_trait]
impl KernelTransport for ZmqTransport {
    async fn send_shell(&self, msg: KernelMessage) -> Result<(), KernelError> {
        self.shell_tx.send(msg).await.map_err(|_| KernelError::Disconnected)
    }

    async fn send_control(&self, msg: KernelMessage) -> Result<(), KernelError> {
        self.control_tx.send(msg).await.map_err(|_| KernelError::Disconnected)
    }

    async fn send_stdin(&self, msg: KernelMessage) -> Result<(), KernelError> {
        self.stdin_tx.send(msg).await.map_err(|_| KernelError::Disconnected)
    }

    async fn recv_iopub(&self) -> Result<KernelMessage, KernelError> {
        self.iopub_rx.lock().await.recv().await.ok_or(KernelError::Disconnected)
    }

    async fn recv_stdin(&self) -> Result<KernelMessage, KernelError> {
        self.stdin_rx.lock().await.recv().await.ok_or(KernelError::Disconnected)
    }

    async fn recv_reply(&self) -> Result<KernelMessage, KernelError> {
        self.reply_rx.lock().await.recv().await.ok_or(KernelError::Disconnected)
    }

    fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for ZmqTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// One step of a duplex pump.
enum Step {
    Outgoing(KernelMessage),
    Incoming(ZmqMessage),
    Closed,
}

/// Pump one DEALER socket: outgoing messages from `out`, inbound replies
/// into `inbound`.
///
/// The select arms only map values; socket effects run afterwards so the
/// recv future's borrow of the socket has ended by the time we send on it.
async fn dealer_pump(
    mut socket: DealerSocket,
    mut out: mpsc::Receiver<KernelMessage>,
    inbound: mpsc::Sender<KernelMessage>,
    key: String,
    channel: &'static str,
) {
    loop {
        let step = tokio::select! {
            outgoing = out.recv() => match outgoing {
                Some(msg) => Step::Outgoing(msg),
                None => Step::Closed,
            },
            incoming = socket.recv() => match incoming {
                Ok(raw) => Step::Incoming(raw),
                Err(e) => {
                    warn!(channel, error = %e, "kernel recv failed");
                    Step::Closed
                }
            },
        };

        match step {
            Step::Outgoing(msg) => {
                let frames = match wire_encode(&msg, &key) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!(channel, error = %e, "failed to encode kernel message");
                        continue;
                    }
                };
                if let Err(e) = socket.send(frames).await {
                    warn!(channel, error = %e, "kernel send failed");
                    break;
                }
            }
            Step::Incoming(raw) => match wire_decode(raw, &key) {
                Ok(msg) => {
                    if inbound.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(e) => debug!(channel, error = %e, "dropping malformed kernel message"),
            },
            Step::Closed => break,
        }
    }
}

/// Pump the SUB socket into the iopub channel.
async fn iopub_pump(mut socket: SubSocket, inbound: mpsc::Sender<KernelMessage>, key: String) {
    loop {
        let raw = match socket.recv().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "iopub recv failed");
                break;
            }
        };
        match wire_decode(raw, &key) {
            Ok(msg) => {
                if inbound.send(msg).await.is_err() {
                    break;
                }
            }
            Err(e) => debug!(error = %e, "dropping malformed iopub message"),
        }
    }
}

fn sign(key: &str, frames: [&[u8]; 4]) -> Result<String, KernelError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| KernelError::Transport(e.to_string()))?;
    for frame in frames {
        mac.update(frame);
    }
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Serialize to the wire frames: delimiter, signature, then the four JSON
/// frames and any raw buffers.
fn wire_encode(msg: &KernelMessage, key: &str) -> Result<ZmqMessage, KernelError> {
    let header = serde_json::to_vec(&msg.header)?;
    let parent = match &msg.parent_header {
        Some(parent) => serde_json::to_vec(parent)?,
        None => b"{}".to_vec(),
    };
    let metadata = serde_json::to_vec(&msg.metadata)?;
    let content = serde_json::to_vec(&msg.content)?;

    let signature = sign(key, [&header, &parent, &metadata, &content])?;

    let mut frames: Vec<Bytes> = vec![
        Bytes::from_static(DELIMITER),
        Bytes::from(signature.into_bytes()),
        Bytes::from(header),
        Bytes::from(parent),
        Bytes::from(metadata),
        Bytes::from(content),
    ];
    frames.extend(msg.buffers.iter().cloned());

    ZmqMessage::try_from(frames).map_err(|e| KernelError::Transport(e.to_string()))
}

/// Parse wire frames back into a message, verifying the signature.
fn wire_decode(raw: ZmqMessage, key: &str) -> Result<KernelMessage, KernelError> {
    let frames: Vec<Bytes> = raw.into_vec();

    // ROUTER peers prepend identity frames; find the delimiter.
    let delim = frames
        .iter()
        .position(|f| f.as_ref() == DELIMITER)
        .ok_or_else(|| KernelError::Malformed("missing <IDS|MSG> delimiter".into()))?;

    if frames.len() < delim + 6 {
        return Err(KernelError::Malformed("truncated message".into()));
    }

    let signature = &frames[delim + 1];
    let header = &frames[delim + 2];
    let parent = &frames[delim + 3];
    let metadata = &frames[delim + 4];
    let content = &frames[delim + 5];
    let buffers = frames[delim + 6..].to_vec();

    let expected = sign(key, [header, parent, metadata, content])?;
    if expected.as_bytes() != signature.as_ref() {
        return Err(KernelError::BadSignature);
    }

    let header: Header = serde_json::from_slice(header)?;
    let parent: Value = serde_json::from_slice(parent)?;
    let parent_header = match &parent {
        Value::Object(map) if map.is_empty() => None,
        _ => Some(serde_json::from_value(parent)?),
    };

    Ok(KernelMessage {
        header,
        parent_header,
        metadata: serde_json::from_slice(metadata)?,
        content: serde_json::from_slice(content)?,
        buffers,
    })
}

#[cfg(test)]
#[path = "zmq_tests.rs"]
mod tests;
