// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gateway status`: report whether a daemon is running for this workspace
//! and, if so, its session count (spec §4.7, §6.1 `session.list`).

use std::path::PathBuf;

use serde::Serialize;

use crate::support::{self, GatewayError};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    #[serde(rename = "startedAt")]
    pub started_at: Option<String>,
    #[serde(rename = "sessionCount")]
    pub session_count: Option<usize>,
}

pub async fn run(workspace_root: &PathBuf) -> Result<StatusReport, GatewayError> {
    let workspace_root = support::canonical_workspace_root(workspace_root)?;
    let Some(record) = support::read_record(&workspace_root)? else {
        return Ok(StatusReport { running: false, host: None, port: None, pid: None, started_at: None, session_count: None });
    };

    let Some(mut client) = support::connect_via_record(&record).await else {
        return Ok(StatusReport {
            running: false,
            host: Some(record.host),
            port: Some(record.port),
            pid: Some(record.pid),
            started_at: Some(record.started_at),
            session_count: None,
        });
    };

    let session_count = client
        .call("session.list", serde_json::Map::new())
        .await
        .ok()
        .and_then(|result| result["sessions"].as_array().map(|a| a.len()));

    Ok(StatusReport {
        running: true,
        host: Some(record.host),
        port: Some(record.port),
        pid: Some(record.pid),
        started_at: Some(record.started_at),
        session_count,
    })
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
