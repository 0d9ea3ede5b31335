// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gateway run`: start a session and stream its output until it exits.
//!
//! This is intentionally non-interactive — no stdin is forwarded to the PTY.
//! Interactive attach belongs to the TUI layer, which is out of scope here
//! (spec §1 lists "the TUI rendering loop" and "the terminal emulator used
//! by the TUI" as external collaborators, not something this crate serves).

use std::io::Write;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::support::{self, GatewayError};

pub struct RunRequest {
    pub workspace_root: PathBuf,
    pub session_id: Option<String>,
    pub argv: Vec<String>,
}

pub async fn run(req: RunRequest) -> Result<i32, GatewayError> {
    let workspace_root = support::canonical_workspace_root(&req.workspace_root)?;
    let record = support::read_record(&workspace_root)?
        .ok_or_else(|| GatewayError("no gateway record for this workspace; run `gateway start` first".into()))?;
    let mut client = support::connect_via_record(&record)
        .await
        .ok_or_else(|| GatewayError(format!("daemon recorded at {}:{} is unreachable", record.host, record.port)))?;

    let session_id = req.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut fields = serde_json::Map::new();
    fields.insert("sessionId".into(), serde_json::json!(session_id));
    fields.insert("args".into(), serde_json::json!(req.argv));
    fields.insert("env".into(), serde_json::json!({}));
    fields.insert("cwd".into(), serde_json::Value::Null);
    fields.insert("cols".into(), serde_json::json!(80));
    fields.insert("rows".into(), serde_json::json!(24));
    client.call("pty.start", fields).await.map_err(GatewayError::from)?;

    let mut subscribe_fields = serde_json::Map::new();
    subscribe_fields.insert("conversationId".into(), serde_json::json!(session_id));
    subscribe_fields.insert("includeOutput".into(), serde_json::json!(true));
    client.call("stream.subscribe", subscribe_fields).await.map_err(GatewayError::from)?;

    let stdout = std::io::stdout();
    loop {
        let frame = client.next_frame().await.map_err(GatewayError::from)?;
        match frame["kind"].as_str() {
            Some("pty.output") if frame["sessionId"].as_str() == Some(session_id.as_str()) => {
                if let Some(chunk) = frame["chunkBase64"].as_str() {
                    if let Ok(bytes) = BASE64.decode(chunk) {
                        let _ = stdout.lock().write_all(&bytes);
                        let _ = stdout.lock().flush();
                    }
                }
            }
            Some("stream.event") => {
                let event = &frame["event"];
                let is_exit = event["type"] == "session-status"
                    && event["scope"]["conversationId"].as_str() == Some(session_id.as_str())
                    && event["payload"]["message"].as_str().is_some_and(|m| m == format!("exited:{session_id}"));
                if is_exit {
                    return Ok(0);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
