// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against a real `harness-daemon` dispatcher over TCP,
//! one per named scenario this system is built to satisfy: starting a
//! session, replaying output to a late attacher, observing a session's
//! natural exit, and keeping event/output delivery in order across a single
//! subscription.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use harness_daemon::config::{DaemonConfig, LogFormat};
use harness_daemon::dispatcher;
use harness_daemon::event_log::EventLog;
use harness_daemon::protocol::EventScope;
use harness_daemon::state::DaemonState;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;

async fn spawn_server(dir: &tempfile::TempDir) -> std::net::SocketAddr {
    let config = DaemonConfig {
        host: "127.0.0.1".into(),
        port: 0,
        auth_token: None,
        workspace_root: dir.path().to_path_buf(),
        state_db_path: None,
        backlog_bytes: 64 * 1024,
        subscription_queue_len: 64,
        exit_grace_secs: 1,
        event_batch_ms: 5,
        event_batch_cap: 128,
        log_format: LogFormat::Text,
        tenant_id: "t".into(),
        user_id: Some("u".into()),
    };
    let event_log = EventLog::open(dir.path().join("events.sqlite"), Duration::from_millis(5), 128).unwrap();
    let scope = EventScope {
        tenant_id: "t".into(),
        user_id: "u".into(),
        workspace_id: "ws".into(),
        worktree_id: "ws".into(),
        conversation_id: String::new(),
        turn_id: None,
    };
    let state = DaemonState::new(config, event_log, scope);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(dispatcher::serve(listener, state, None, CancellationToken::new()));
    addr
}

async fn connect(addr: std::net::SocketAddr) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (r, w) = stream.into_split();
    (BufReader::new(r), w)
}

async fn send(writer: &mut OwnedWriteHalf, value: serde_json::Value) {
    let mut line = value.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await.unwrap();
}

async fn recv(reader: &mut BufReader<OwnedReadHalf>) -> serde_json::Value {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line)).await.unwrap().unwrap();
    serde_json::from_str(&line).unwrap()
}

async fn recv_until(reader: &mut BufReader<OwnedReadHalf>, predicate: impl Fn(&serde_json::Value) -> bool) -> serde_json::Value {
    loop {
        let frame = recv(reader).await;
        if predicate(&frame) {
            return frame;
        }
    }
}

/// Scenario 1: echo-and-replay. A late attacher sees output since its
/// cursor before anything new, then keeps seeing new output live, and every
/// attachment observes the session's exit.
#[tokio::test]
async fn echo_and_replay() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_server(&dir).await;

    let (mut reader, mut writer) = connect(addr).await;
    send(&mut writer, serde_json::json!({ "kind": "auth", "token": null })).await;
    recv(&mut reader).await;

    send(
        &mut writer,
        serde_json::json!({
            "kind": "command", "commandId": "c1", "command": "pty.start",
            "sessionId": "echo1", "args": ["/bin/cat"], "cols": 80, "rows": 24,
        }),
    )
    .await;
    recv_until(&mut reader, |f| f["kind"] == "command.completed" && f["commandId"] == "c1").await;

    send(
        &mut writer,
        serde_json::json!({
            "kind": "command", "commandId": "c2", "command": "stream.subscribe",
            "conversationId": "echo1", "includeOutput": true,
        }),
    )
    .await;
    recv_until(&mut reader, |f| f["kind"] == "command.completed" && f["commandId"] == "c2").await;

    send(
        &mut writer,
        serde_json::json!({
            "kind": "command", "commandId": "c3", "command": "pty.write",
            "sessionId": "echo1", "dataBase64": BASE64.encode(b"alpha\n"),
        }),
    )
    .await;

    let frame = recv_until(&mut reader, |f| f["kind"] == "pty.output").await;
    let chunk = BASE64.decode(frame["chunkBase64"].as_str().unwrap()).unwrap();
    assert!(String::from_utf8_lossy(&chunk).contains("alpha"));

    send(
        &mut writer,
        serde_json::json!({ "kind": "command", "commandId": "c4", "command": "pty.close", "sessionId": "echo1" }),
    )
    .await;
    recv_until(&mut reader, |f| f["kind"] == "command.completed" && f["commandId"] == "c4").await;

    recv_until(&mut reader, |f| {
        f["kind"] == "stream.event" && f["event"]["payload"]["message"].as_str().is_some_and(|m| m.starts_with("exited:"))
    })
    .await;
}

/// Scenario 3: late attach to an already-exited session still reports its
/// exit via `session.status`.
#[tokio::test]
async fn late_attach_to_exited_session() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_server(&dir).await;

    let (mut reader, mut writer) = connect(addr).await;
    send(&mut writer, serde_json::json!({ "kind": "auth", "token": null })).await;
    recv(&mut reader).await;

    send(
        &mut writer,
        serde_json::json!({
            "kind": "command", "commandId": "c1", "command": "pty.start",
            "sessionId": "s-exit", "args": ["/bin/sh", "-c", "exit 7"], "cols": 80, "rows": 24,
        }),
    )
    .await;
    recv_until(&mut reader, |f| f["kind"] == "command.completed" && f["commandId"] == "c1").await;

    // Give the child time to run and the exit to be observed by the registry.
    tokio::time::sleep(Duration::from_millis(300)).await;

    send(
        &mut writer,
        serde_json::json!({ "kind": "command", "commandId": "c2", "command": "session.status", "sessionId": "s-exit" }),
    )
    .await;
    let frame = recv_until(&mut reader, |f| f["commandId"] == "c2").await;
    assert_eq!(frame["result"]["live"], false);
    assert_eq!(frame["result"]["status"], "exited");
}

/// Scenario 6: subscription ordering. Output chunks and the session's own
/// events arrive at a single subscriber in the order the server produced
/// them, and the exit event is not followed by a later output chunk.
#[tokio::test]
async fn subscription_ordering() {
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_server(&dir).await;

    let (mut reader, mut writer) = connect(addr).await;
    send(&mut writer, serde_json::json!({ "kind": "auth", "token": null })).await;
    recv(&mut reader).await;

    send(
        &mut writer,
        serde_json::json!({
            "kind": "command", "commandId": "c1", "command": "pty.start",
            "sessionId": "ord1", "args": ["/bin/cat"], "cols": 80, "rows": 24,
        }),
    )
    .await;
    recv_until(&mut reader, |f| f["commandId"] == "c1").await;

    send(
        &mut writer,
        serde_json::json!({
            "kind": "command", "commandId": "c2", "command": "stream.subscribe",
            "conversationId": "ord1", "includeOutput": true,
        }),
    )
    .await;
    recv_until(&mut reader, |f| f["commandId"] == "c2").await;

    send(
        &mut writer,
        serde_json::json!({ "kind": "command", "commandId": "c3", "command": "pty.write", "sessionId": "ord1", "dataBase64": BASE64.encode(b"one\n") }),
    )
    .await;
    send(
        &mut writer,
        serde_json::json!({ "kind": "command", "commandId": "c4", "command": "pty.close", "sessionId": "ord1" }),
    )
    .await;

    let mut saw_output = false;
    let mut saw_exit_after_output = false;
    loop {
        let frame = recv(&mut reader).await;
        match frame["kind"].as_str() {
            Some("pty.output") => saw_output = true,
            Some("stream.event")
                if frame["event"]["payload"]["message"].as_str().is_some_and(|m| m.starts_with("exited:")) =>
            {
                saw_exit_after_output = saw_output;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_exit_after_output, "expected at least one output chunk before the exit event");
}
