// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gateway restart`: stop then start (spec §4.7 "Restart").

use std::path::PathBuf;

use crate::commands::{start, stop};
use crate::support::GatewayError;

pub struct RestartRequest {
    pub workspace_root: PathBuf,
    pub force: bool,
    pub timeout_ms: u64,
}

pub async fn run(req: RestartRequest) -> Result<start::StartOutcome, GatewayError> {
    stop::run(stop::StopRequest {
        workspace_root: req.workspace_root.clone(),
        force: req.force,
        timeout_ms: req.timeout_ms,
        cleanup_orphans: true,
    })
    .await?;

    start::run(start::StartRequest {
        workspace_root: req.workspace_root,
        host: None,
        port: None,
        auth_token: None,
        state_db_path: None,
        force: req.force,
    })
    .await
}

#[cfg(test)]
#[path = "restart_tests.rs"]
mod tests;
