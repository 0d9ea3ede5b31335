// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command Dispatcher (C6, spec §4.6).
//!
//! The teacher's `transport/mod.rs` builds an axum HTTP/WebSocket router;
//! out of scope here since the wire protocol is line-delimited JSON over raw
//! TCP. The *organization* carries over — an accept loop handing each
//! connection to its own task, command handlers colocated above the loop,
//! an error-code/error-message envelope — retargeted onto
//! `tokio::net::TcpListener` with `AsyncBufReadExt::read_line` framing. The
//! single-logical-writer discipline (never hold a lock while sending a
//! frame) is grounded on `stop.rs`'s `RwLock<StopConfig>` /
//! `broadcast::Sender<StopEvent>` split, where the config lock is always
//! released before a `StopEvent` goes out on the broadcast channel.

use std::sync::Arc;

use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::hub::HubDelivery;
use crate::protocol::{ClientFrame, CommandPayload, ServerFrame};
use crate::state::DaemonState;

const OUTBOUND_QUEUE_LEN: usize = 1024;

/// Accept connections on `listener` until `shutdown` fires. Each connection
/// is handled on its own task (spec §5 "one dispatcher task per TCP
/// connection for inbound frames"); `state` is cheap to clone and carries
/// the registry/hub/event-log handles every connection needs.
pub async fn serve(
    listener: TcpListener,
    state: DaemonState,
    auth_token: Option<String>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let auth_token = Arc::new(auth_token);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("dispatcher accept loop stopping");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                let state = state.clone();
                let auth_token = Arc::clone(&auth_token);
                let conn_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    debug!(%peer, "connection accepted");
                    if let Err(e) = handle_connection(socket, state, auth_token, conn_shutdown).await {
                        debug!(%peer, error = %e, "connection closed with error");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    state: DaemonState,
    auth_token: Arc<Option<String>>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Single outbound queue per connection: both command replies and
    // forwarded subscription/output frames funnel through it, so the socket
    // is never written from two tasks concurrently (spec §4.6 "never
    // blocks the PTY reader on a slow subscriber" generalizes to "never
    // lets one writer starve another").
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(OUTBOUND_QUEUE_LEN);
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
    });

    if !authenticate(&mut lines, &out_tx, auth_token.as_ref()).await? {
        drop(out_tx);
        let _ = writer_task.await;
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => {
                match line? {
                    None => break,
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        if !handle_line(&line, &state, &out_tx).await {
                            break;
                        }
                    }
                }
            }
        }
    }

    drop(out_tx);
    let _ = writer_task.await;
    Ok(())
}

/// Reads exactly one `auth` frame and replies `auth.ok`/`auth.failed`. A
/// mismatched token or malformed first frame closes the connection after
/// `auth.failed` (spec §4.6).
async fn authenticate(
    lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    out_tx: &mpsc::Sender<ServerFrame>,
    required_token: &Option<String>,
) -> anyhow::Result<bool> {
    let Some(line) = lines.next_line().await? else {
        return Ok(false);
    };
    let frame: Result<ClientFrame, _> = serde_json::from_str(&line);
    let token = match frame {
        Ok(ClientFrame::Auth { token }) => token,
        _ => {
            let _ = out_tx
                .send(ServerFrame::AuthFailed { reason: "expected auth frame".into() })
                .await;
            return Ok(false);
        }
    };

    let ok = match required_token {
        None => true,
        Some(expected) => token.as_deref() == Some(expected.as_str()),
    };

    if ok {
        let _ = out_tx.send(ServerFrame::AuthOk).await;
        Ok(true)
    } else {
        let _ = out_tx.send(ServerFrame::AuthFailed { reason: "token mismatch".into() }).await;
        Ok(false)
    }
}

/// Parse and dispatch one `command` frame, returning `false` if the
/// connection should be closed (malformed frame shape, not a recoverable
/// `command.failed`).
async fn handle_line(line: &str, state: &DaemonState, out_tx: &mpsc::Sender<ServerFrame>) -> bool {
    let frame: Result<ClientFrame, _> = serde_json::from_str(line);
    let (command_id, payload) = match frame {
        Ok(ClientFrame::Command { command_id, payload }) => (command_id, payload),
        Ok(ClientFrame::Auth { .. }) => {
            let _ = out_tx
                .send(ServerFrame::CommandFailed {
                    command_id: String::new(),
                    error_code: ErrorCode::InvalidCommand.as_str().into(),
                    error: "unexpected auth frame after handshake".into(),
                })
                .await;
            return true;
        }
        Err(e) => {
            let _ = out_tx
                .send(ServerFrame::CommandFailed {
                    command_id: String::new(),
                    error_code: ErrorCode::InvalidCommand.as_str().into(),
                    error: format!("malformed command frame: {e}"),
                })
                .await;
            return true;
        }
    };

    let is_subscribe = matches!(payload, CommandPayload::StreamSubscribe { .. });
    match state.handle(payload).await {
        Ok(result) => {
            if is_subscribe {
                if let Some(subscription_id) = result.get("subscriptionId").and_then(|v| v.as_str()) {
                    spawn_subscription_forwarder(state.clone(), subscription_id.to_owned(), out_tx.clone()).await;
                }
            }
            let _ = out_tx.send(ServerFrame::CommandCompleted { command_id, result }).await;
        }
        Err(e) => {
            let _ = out_tx
                .send(ServerFrame::CommandFailed {
                    command_id,
                    error_code: e.code.as_str().into(),
                    error: e.message,
                })
                .await;
        }
    }
    true
}

/// Drains a subscription's delivery queue onto this connection's outbound
/// queue, translating `HubDelivery` into the wire's `stream.event`/
/// `pty.output` frames (spec §6.1 "Server-initiated frames").
async fn spawn_subscription_forwarder(state: DaemonState, subscription_id: String, out_tx: mpsc::Sender<ServerFrame>) {
    let Some(mut rx) = state.take_subscription_receiver(&subscription_id).await else {
        return;
    };
    tokio::spawn(async move {
        while let Some(delivery) = rx.recv().await {
            let frame = match delivery {
                HubDelivery::Event { row_id, event } => {
                    ServerFrame::StreamEvent { subscription_id: subscription_id.clone(), cursor: row_id, event }
                }
                HubDelivery::Output { session_id, cursor, data } => ServerFrame::PtyOutput {
                    session_id,
                    cursor,
                    chunk_base64: base64::engine::general_purpose::STANDARD.encode(&data),
                },
                HubDelivery::Terminated { reason } => {
                    warn!(subscription_id, %reason, "subscription terminated");
                    let _ = out_tx
                        .send(ServerFrame::CommandFailed {
                            command_id: subscription_id.clone(),
                            error_code: reason.as_str().into(),
                            error: format!("subscription terminated: {reason}"),
                        })
                        .await;
                    break;
                }
            };
            if out_tx.send(frame).await.is_err() {
                break;
            }
        }
    });
}

async fn write_frame(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    frame: &ServerFrame,
) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
