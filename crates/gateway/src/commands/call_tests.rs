// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use harness_daemon::config::{DaemonConfig, LogFormat};
use harness_daemon::dispatcher;
use harness_daemon::event_log::EventLog;
use harness_daemon::lifecycle::{self, GatewayRecord, GATEWAY_RECORD_VERSION};
use harness_daemon::protocol::EventScope;
use harness_daemon::state::DaemonState;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::*;

async fn spawn_daemon_with_record(dir: &tempfile::TempDir) {
    let workspace_root = dir.path().to_path_buf();
    let config = DaemonConfig {
        host: "127.0.0.1".into(),
        port: 0,
        auth_token: None,
        workspace_root: workspace_root.clone(),
        state_db_path: None,
        backlog_bytes: 64 * 1024,
        subscription_queue_len: 16,
        exit_grace_secs: 1,
        event_batch_ms: 5,
        event_batch_cap: 128,
        log_format: LogFormat::Text,
        tenant_id: "local".into(),
        user_id: Some("tester".into()),
    };
    let event_log = EventLog::open(dir.path().join("events.sqlite"), Duration::from_millis(5), 128).unwrap();
    let scope = EventScope {
        tenant_id: "local".into(),
        user_id: "tester".into(),
        workspace_id: "ws".into(),
        worktree_id: "ws".into(),
        conversation_id: String::new(),
        turn_id: None,
    };
    let state = DaemonState::new(config, event_log, scope);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(dispatcher::serve(listener, state, None, CancellationToken::new()));

    let record = GatewayRecord {
        version: GATEWAY_RECORD_VERSION,
        pid: std::process::id(),
        host: addr.ip().to_string(),
        port: addr.port(),
        auth_token: None,
        state_db_path: workspace_root.join("control-plane.sqlite"),
        started_at: lifecycle::now_iso8601(),
        workspace_root: workspace_root.clone(),
        gateway_run_id: uuid::Uuid::new_v4().to_string(),
    };
    lifecycle::write_gateway_record(&support::gateway_record_path(&workspace_root), &record).unwrap();
}

#[tokio::test]
async fn call_without_a_record_is_an_operational_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = run(&dir.path().to_path_buf(), "session.list", "{}").await.unwrap_err();
    assert!(err.0.contains("no gateway record"));
}

#[tokio::test]
async fn call_forwards_result_for_a_known_command() {
    let dir = tempfile::tempdir().unwrap();
    spawn_daemon_with_record(&dir).await;

    let result = run(&dir.path().to_path_buf(), "session.list", "{}").await.unwrap();
    assert_eq!(result["sessions"], serde_json::json!([]));
}

#[tokio::test]
async fn call_rejects_non_object_fields() {
    let dir = tempfile::tempdir().unwrap();
    spawn_daemon_with_record(&dir).await;

    let err = run(&dir.path().to_path_buf(), "session.list", "[]").await.unwrap_err();
    assert!(err.0.contains("JSON object"));
}
