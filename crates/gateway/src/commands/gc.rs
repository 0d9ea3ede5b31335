// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gateway gc`: sweep stale named-session artifact trees (spec §4.7 "GC").

use std::path::PathBuf;

use harness_daemon::lifecycle;

use crate::support::{self, GatewayError};

pub async fn run(workspace_root: &PathBuf, older_than_days: u64) -> Result<Vec<String>, GatewayError> {
    let workspace_root = support::canonical_workspace_root(workspace_root)?;
    let sessions_root = workspace_root.join("sessions");

    // The current session, if any, is excluded from the sweep; a bare
    // `gateway gc` run has no notion of "current session", so nothing is
    // excluded here (spec §4.7 names the exclusion for the in-process case).
    lifecycle::gc_named_sessions(&sessions_root, None, older_than_days).map_err(GatewayError::from)
}

#[cfg(test)]
#[path = "gc_tests.rs"]
mod tests;
