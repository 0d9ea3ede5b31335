// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::{DaemonConfig, LogFormat};
use crate::event_log::EventLog;
use crate::protocol::EventScope;

fn scope() -> EventScope {
    EventScope {
        tenant_id: "t".into(),
        user_id: "u".into(),
        workspace_id: "ws".into(),
        worktree_id: "wt".into(),
        conversation_id: "conv".into(),
        turn_id: None,
    }
}

async fn spawn_server(
    dir: &tempfile::TempDir,
    auth_token: Option<String>,
) -> (std::net::SocketAddr, CancellationToken) {
    let config = DaemonConfig {
        host: "127.0.0.1".into(),
        port: 0,
        auth_token: auth_token.clone(),
        workspace_root: dir.path().to_path_buf(),
        state_db_path: None,
        backlog_bytes: 64 * 1024,
        subscription_queue_len: 16,
        exit_grace_secs: 1,
        event_batch_ms: 5,
        event_batch_cap: 128,
        log_format: LogFormat::Text,
        tenant_id: "t".into(),
        user_id: Some("u".into()),
    };
    let event_log = EventLog::open(dir.path().join("events.sqlite"), Duration::from_millis(5), 128).unwrap();
    let state = DaemonState::new(config, event_log, scope());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        let _ = serve(listener, state, auth_token, shutdown_clone).await;
    });
    (addr, shutdown)
}

async fn connect(addr: std::net::SocketAddr) -> (BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (r, w) = stream.into_split();
    (BufReader::new(r), w)
}

async fn send_line(writer: &mut tokio::net::tcp::OwnedWriteHalf, value: serde_json::Value) {
    let mut line = value.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await.unwrap();
}

async fn read_frame(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> serde_json::Value {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for a frame")
        .unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn mismatched_token_is_rejected_and_connection_closes() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _shutdown) = spawn_server(&dir, Some("secret".into())).await;
    let (mut reader, mut writer) = connect(addr).await;

    send_line(&mut writer, serde_json::json!({"kind": "auth", "token": "wrong"})).await;
    let reply = read_frame(&mut reader).await;
    assert_eq!(reply["kind"], "auth.failed");

    let mut rest = String::new();
    let n = reader.read_line(&mut rest).await.unwrap();
    assert_eq!(n, 0, "connection should be closed after auth.failed");
}

#[tokio::test]
async fn matching_token_authenticates_and_commands_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _shutdown) = spawn_server(&dir, Some("secret".into())).await;
    let (mut reader, mut writer) = connect(addr).await;

    send_line(&mut writer, serde_json::json!({"kind": "auth", "token": "secret"})).await;
    assert_eq!(read_frame(&mut reader).await["kind"], "auth.ok");

    send_line(
        &mut writer,
        serde_json::json!({"kind": "command", "commandId": "c1", "command": "session.list"}),
    )
    .await;
    let reply = read_frame(&mut reader).await;
    assert_eq!(reply["kind"], "command.completed");
    assert_eq!(reply["commandId"], "c1");
    assert_eq!(reply["result"]["sessions"], serde_json::json!([]));
}

#[tokio::test]
async fn unauthenticated_mode_accepts_any_auth_frame() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _shutdown) = spawn_server(&dir, None).await;
    let (mut reader, mut writer) = connect(addr).await;

    send_line(&mut writer, serde_json::json!({"kind": "auth"})).await;
    assert_eq!(read_frame(&mut reader).await["kind"], "auth.ok");
}

#[tokio::test]
async fn unknown_command_returns_command_failed_not_a_closed_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _shutdown) = spawn_server(&dir, None).await;
    let (mut reader, mut writer) = connect(addr).await;

    send_line(&mut writer, serde_json::json!({"kind": "auth"})).await;
    assert_eq!(read_frame(&mut reader).await["kind"], "auth.ok");

    send_line(&mut writer, serde_json::json!({"kind": "command", "commandId": "bad", "command": "not.a.thing"})).await;
    let reply = read_frame(&mut reader).await;
    assert_eq!(reply["kind"], "command.failed");
    assert_eq!(reply["errorCode"], "invalid-command");

    send_line(
        &mut writer,
        serde_json::json!({"kind": "command", "commandId": "ok", "command": "session.list"}),
    )
    .await;
    let reply = read_frame(&mut reader).await;
    assert_eq!(reply["kind"], "command.completed");
}

#[tokio::test]
async fn subscribe_then_receive_session_control_event_over_the_wire() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _shutdown) = spawn_server(&dir, None).await;
    let (mut reader, mut writer) = connect(addr).await;

    send_line(&mut writer, serde_json::json!({"kind": "auth"})).await;
    assert_eq!(read_frame(&mut reader).await["kind"], "auth.ok");

    send_line(
        &mut writer,
        serde_json::json!({
            "kind": "command",
            "commandId": "start",
            "command": "pty.start",
            "sessionId": "s1",
            "args": ["/bin/cat"],
            "cols": 80,
            "rows": 24,
        }),
    )
    .await;
    assert_eq!(read_frame(&mut reader).await["kind"], "command.completed");

    send_line(
        &mut writer,
        serde_json::json!({"kind": "command", "commandId": "sub", "command": "stream.subscribe"}),
    )
    .await;
    let reply = read_frame(&mut reader).await;
    assert_eq!(reply["kind"], "command.completed");

    send_line(
        &mut writer,
        serde_json::json!({
            "kind": "command",
            "commandId": "claim",
            "command": "session.claim",
            "sessionId": "s1",
            "controllerId": "alice",
            "controllerType": "human",
        }),
    )
    .await;
    assert_eq!(read_frame(&mut reader).await["kind"], "command.completed");

    let event_frame = read_frame(&mut reader).await;
    assert_eq!(event_frame["kind"], "stream.event");
    assert_eq!(event_frame["event"]["type"], "session-control");
}
