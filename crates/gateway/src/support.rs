// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the `commands::*` handlers: resolving the workspace
//! root, reading the gateway record, and connecting a [`DaemonClient`] to
//! whatever daemon currently owns it.

use std::path::{Path, PathBuf};

use harness_daemon::lifecycle::{self, GatewayRecord};

use crate::client::{ClientError, DaemonClient};

/// Operational failures surfaced to `main` as exit code 1 (spec §6.3).
/// Argument errors are handled by clap itself (exit code 2) and never reach
/// this type.
#[derive(Debug)]
pub struct GatewayError(pub String);

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for GatewayError {}

impl From<anyhow::Error> for GatewayError {
    fn from(e: anyhow::Error) -> Self {
        Self(format!("{e:#}"))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

impl From<ClientError> for GatewayError {
    fn from(e: ClientError) -> Self {
        Self(e.to_string())
    }
}

pub fn canonical_workspace_root(root: &Path) -> Result<PathBuf, GatewayError> {
    std::fs::create_dir_all(root).map_err(GatewayError::from)?;
    std::fs::canonicalize(root).map_err(|e| GatewayError(format!("cannot resolve workspace root: {e}")))
}

pub fn gateway_record_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join("gateway.json")
}

/// True when `workspace_root` is itself a named session's own partition,
/// `<workspace>/sessions/<name>` (spec §4.7 glossary "Named session"), which
/// uses the identical runtime filenames a top-level workspace does and so is
/// a self-contained workspace root one level under a `sessions/` directory.
pub fn is_named_session_workspace(workspace_root: &Path) -> bool {
    workspace_root.parent().and_then(|p| p.file_name()).is_some_and(|name| name == "sessions")
}

/// Best-effort probe for spec §4.7 "Startup"'s named-session ephemeral-port
/// fallback ("if port collides and the session is a named session, pick an
/// ephemeral port"): whether `host:port` is already bound by something else.
pub async fn port_in_use(host: &str, port: u16) -> bool {
    tokio::net::TcpListener::bind((host, port)).await.is_err()
}

pub fn read_record(workspace_root: &Path) -> Result<Option<GatewayRecord>, GatewayError> {
    lifecycle::read_gateway_record(&gateway_record_path(workspace_root)).map_err(GatewayError::from)
}

/// Connect to the daemon a gateway record points at, returning `None` (not
/// an error) when there is no record or its endpoint is unreachable, so
/// callers can distinguish "nothing to talk to" from a hard failure.
pub async fn connect_via_record(record: &GatewayRecord) -> Option<DaemonClient> {
    DaemonClient::connect(&record.host, record.port, record.auth_token.as_deref()).await.ok()
}

#[cfg(test)]
#[path = "support_tests.rs"]
mod tests;
