// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gateway list`: wrapper around `session.list` (spec §6.1).

use std::path::PathBuf;

use crate::commands::call;
use crate::support::GatewayError;

pub async fn run(workspace_root: &PathBuf) -> Result<serde_json::Value, GatewayError> {
    call::run(workspace_root, "session.list", "{}").await
}

#[cfg(test)]
#[path = "list_tests.rs"]
mod tests;
