// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gateway stop` (spec §4.7 "Stop").

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::process;
use crate::support::{self, GatewayError};

pub struct StopRequest {
    pub workspace_root: PathBuf,
    pub force: bool,
    pub timeout_ms: u64,
    pub cleanup_orphans: bool,
}

pub struct StopOutcome {
    pub stopped: bool,
    pub orphans_removed: Vec<u32>,
}

pub async fn run(req: StopRequest) -> Result<StopOutcome, GatewayError> {
    let workspace_root = support::canonical_workspace_root(&req.workspace_root)?;
    let record_path = support::gateway_record_path(&workspace_root);

    let Some(record) = support::read_record(&workspace_root)? else {
        return Ok(StopOutcome { stopped: false, orphans_removed: Vec::new() });
    };

    let reachable = support::connect_via_record(&record).await.is_some();
    if !reachable && process::process_exists(record.pid) && !req.force {
        return Err(GatewayError(format!(
            "daemon pid {} is alive but {}:{} is unreachable; rerun with --force to kill it",
            record.pid, record.host, record.port
        )));
    }

    if process::process_exists(record.pid) {
        process::terminate_process(record.pid, Duration::from_millis(req.timeout_ms), req.force).await;
    }

    lifecycle_remove(&record_path);
    info!(pid = record.pid, "daemon stopped");

    // Spec §4.7 "Stop": "remove the gateway record and (for named sessions)
    // associated artifacts." A named session's whole runtime tree lives
    // under `workspace_root` itself, so once its daemon is down the rest of
    // the partition (log, lock, event db) goes with it rather than waiting
    // for a later `gateway gc` sweep.
    if support::is_named_session_workspace(&workspace_root) {
        if let Err(e) = std::fs::remove_dir_all(&workspace_root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, path = %workspace_root.display(), "failed to remove named-session artifact tree");
            }
        } else {
            info!(path = %workspace_root.display(), "removed named-session artifact tree");
        }
    }

    let mut orphans_removed = Vec::new();
    if req.cleanup_orphans {
        let orphans = process::find_orphans(&workspace_root, &record.state_db_path, None);
        for orphan in orphans {
            process::terminate_process(orphan.pid, Duration::from_millis(req.timeout_ms), true).await;
            orphans_removed.push(orphan.pid);
        }
    }

    Ok(StopOutcome { stopped: true, orphans_removed })
}

fn lifecycle_remove(path: &std::path::Path) {
    harness_daemon::lifecycle::remove_gateway_record(path);
}

#[cfg(test)]
#[path = "stop_tests.rs"]
mod tests;
