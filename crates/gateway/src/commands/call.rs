// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gateway call`: send one raw command and print its result (spec §6.1).

use std::path::PathBuf;

use crate::support::{self, GatewayError};

pub async fn run(workspace_root: &PathBuf, command: &str, fields_json: &str) -> Result<serde_json::Value, GatewayError> {
    let workspace_root = support::canonical_workspace_root(workspace_root)?;
    let record = support::read_record(&workspace_root)?
        .ok_or_else(|| GatewayError("no gateway record for this workspace; is the daemon running?".into()))?;
    let mut client = support::connect_via_record(&record)
        .await
        .ok_or_else(|| GatewayError(format!("daemon recorded at {}:{} is unreachable", record.host, record.port)))?;

    let fields: serde_json::Value = serde_json::from_str(fields_json)
        .map_err(|e| GatewayError(format!("--fields must be a JSON object: {e}")))?;
    let serde_json::Value::Object(fields) = fields else {
        return Err(GatewayError("--fields must be a JSON object".into()));
    };

    client.call(command, fields).await.map_err(GatewayError::from)
}

#[cfg(test)]
#[path = "call_tests.rs"]
mod tests;
