// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness daemon: the control-plane process a `gateway` invocation starts,
//! adopts, or talks to (spec §2). Binds one TCP listener, owns one event
//! log, and serves the line-delimited JSON command protocol until asked to
//! stop.

pub mod backlog;
pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_log;
pub mod hub;
pub mod lifecycle;
pub mod protocol;
pub mod pty;
pub mod registry;
pub mod state;

use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::event_log::EventLog;
use crate::lifecycle::{GatewayRecord, Lock, GATEWAY_RECORD_VERSION};
use crate::protocol::EventScope;
use crate::state::DaemonState;

/// Runs the daemon until `shutdown` fires or a process signal asks it to
/// stop (spec §4.7 "Startup"/"Graceful shutdown").
pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    config.validate()?;

    let token = uuid::Uuid::new_v4().to_string();
    let lock = Lock::acquire(&config.lockfile_path(), &config.workspace_root, &token)?;

    let result = run_locked(config).await;

    lock.release();
    result
}

async fn run_locked(config: DaemonConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;
    let local_addr = listener.local_addr()?;

    let default_scope = EventScope {
        tenant_id: config.tenant_id.clone(),
        user_id: config.resolved_user_id(),
        workspace_id: config.resolved_workspace_id(),
        worktree_id: config.resolved_workspace_id(),
        conversation_id: String::new(),
        turn_id: None,
    };

    let state_db_path = config.state_db_path()?;
    let event_log = EventLog::open(
        state_db_path.clone(),
        Duration::from_millis(config.event_batch_ms),
        config.event_batch_cap,
    )?;

    let gateway_record_path = config.gateway_record_path();
    let record = GatewayRecord {
        version: GATEWAY_RECORD_VERSION,
        pid: std::process::id(),
        host: local_addr.ip().to_string(),
        port: local_addr.port(),
        auth_token: config.auth_token.clone(),
        state_db_path,
        started_at: crate::lifecycle::now_iso8601(),
        workspace_root: config.workspace_root.clone(),
        gateway_run_id: uuid::Uuid::new_v4().to_string(),
    };
    lifecycle::write_gateway_record(&gateway_record_path, &record)?;

    let auth_token = config.auth_token.clone();
    let exit_grace = Duration::from_secs(config.exit_grace_secs);
    let state = DaemonState::new(config, event_log, default_scope);

    let shutdown = CancellationToken::new();
    let gc_handle = tokio::spawn(state.clone().run_gc_loop(exit_grace));
    let shutdown_state = state.clone();
    let serve_handle = tokio::spawn(dispatcher::serve(listener, state, auth_token, shutdown.clone()));

    info!(%local_addr, "harness-daemon listening");
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping");

    shutdown_state.broadcast_shutdown().await;
    shutdown.cancel();
    gc_handle.abort();
    let _ = serve_handle.await;

    lifecycle::remove_gateway_record(&gateway_record_path);
    info!("harness-daemon stopped cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler, falling back to ctrl_c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = term.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
