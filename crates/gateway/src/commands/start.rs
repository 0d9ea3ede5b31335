// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gateway start` (spec §4.7 "Startup"/"Adoption").

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::client::DaemonClient;
use crate::process;
use crate::support::{self, GatewayError};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct StartRequest {
    pub workspace_root: PathBuf,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub auth_token: Option<String>,
    pub state_db_path: Option<PathBuf>,
    pub force: bool,
}

#[derive(Debug)]
pub struct StartOutcome {
    pub host: String,
    pub port: u16,
    pub adopted: bool,
    pub already_running: bool,
}

pub async fn run(req: StartRequest) -> Result<StartOutcome, GatewayError> {
    let workspace_root = support::canonical_workspace_root(&req.workspace_root)?;

    if let Some(record) = support::read_record(&workspace_root)? {
        if support::connect_via_record(&record).await.is_some() {
            info!(host = %record.host, port = record.port, "daemon already running for this workspace");
            return Ok(StartOutcome { host: record.host, port: record.port, adopted: false, already_running: true });
        }
        if process::process_exists(record.pid) && !req.force {
            return Err(GatewayError(format!(
                "gateway record names live pid {} but its endpoint {}:{} is unreachable; rerun with --force to replace it",
                record.pid, record.host, record.port
            )));
        }
        info!(pid = record.pid, "stale gateway record, replacing");
    }

    // Adoption: an explicitly-named host/port may already have a daemon
    // listening that simply never wrote a record we could see (spec §4.7
    // "Adoption"). A single reachable candidate is adopted; ambiguity past
    // that point is out of scope without a broader process-table scan.
    if let (Some(host), Some(port)) = (req.host.as_deref(), req.port) {
        if DaemonClient::probe_reachable(host, port).await {
            if DaemonClient::connect(host, port, req.auth_token.as_deref()).await.is_ok() {
                info!(host, port, "adopting already-running daemon");
                return Ok(StartOutcome { host: host.to_owned(), port, adopted: true, already_running: false });
            }
        }
    }

    let host = req.host.clone().unwrap_or_else(|| "127.0.0.1".into());
    let auth_token = req.auth_token.clone().or_else(|| Some(Uuid::new_v4().to_string()));

    // Spec §4.7 "Startup": an explicit `--port` that collides falls back to
    // an ephemeral port, but only for a named session's own partition — a
    // top-level workspace's explicit port request still fails on collision.
    let port = match req.port {
        Some(port) if support::is_named_session_workspace(&workspace_root) && support::port_in_use(&host, port).await => {
            info!(requested_port = port, "requested port is in use for a named session, falling back to an ephemeral port");
            0
        }
        Some(port) => port,
        None => 0,
    };

    let mut args = vec![
        "--host".to_owned(),
        host.clone(),
        "--port".to_owned(),
        port.to_string(),
        "--workspace-root".to_owned(),
        workspace_root.to_string_lossy().into_owned(),
    ];
    if let Some(token) = &auth_token {
        args.push("--auth-token".into());
        args.push(token.clone());
    }
    if let Some(db) = &req.state_db_path {
        args.push("--state-db-path".into());
        args.push(db.to_string_lossy().into_owned());
    }

    process::spawn_daemon_background(&args)?;

    let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
    loop {
        tokio::time::sleep(READY_POLL_INTERVAL).await;
        if let Some(record) = support::read_record(&workspace_root)? {
            if let Some(mut client) = support::connect_via_record(&record).await {
                if client.call("session.list", serde_json::Map::new()).await.is_ok() {
                    return Ok(StartOutcome { host: record.host, port: record.port, adopted: false, already_running: false });
                }
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(GatewayError("daemon did not become ready within the startup timeout".into()));
        }
    }
}

#[cfg(test)]
#[path = "start_tests.rs"]
mod tests;
