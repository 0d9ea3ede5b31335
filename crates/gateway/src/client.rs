// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire client for the line-delimited JSON command protocol (spec §6.1),
//! grounded on `groblegark-oddjobs`'s `client.rs` (connect-then-send-with-
//! timeout shape, a closed `ClientError` enum), retargeted from that crate's
//! length-prefixed Unix-socket framing onto `harness-daemon`'s newline-
//! delimited TCP frames.

use std::fmt;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub enum ClientError {
    NotReachable(String),
    AuthFailed(String),
    Rejected { code: String, message: String },
    Protocol(String),
    Timeout,
    Io(std::io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReachable(msg) => write!(f, "daemon not reachable: {msg}"),
            Self::AuthFailed(msg) => write!(f, "daemon rejected auth: {msg}"),
            Self::Rejected { code, message } => write!(f, "command failed ({code}): {message}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Timeout => write!(f, "timed out waiting for a reply"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// A single connection to a running daemon, authenticated once at connect
/// time (spec §4.6 "client MUST send exactly one `auth` frame").
#[derive(Debug)]
pub struct DaemonClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl DaemonClient {
    pub async fn connect(host: &str, port: u16, auth_token: Option<&str>) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(DEFAULT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(|e| ClientError::NotReachable(e.to_string()))?;
        let (read_half, write_half) = stream.into_split();
        let mut client = Self { reader: BufReader::new(read_half), writer: write_half };

        client.send(json!({ "kind": "auth", "token": auth_token })).await?;
        let reply = client.read_frame().await?;
        match reply["kind"].as_str() {
            Some("auth.ok") => Ok(client),
            Some("auth.failed") => {
                Err(ClientError::AuthFailed(reply["reason"].as_str().unwrap_or("unknown").to_owned()))
            }
            other => Err(ClientError::Protocol(format!("unexpected frame after auth: {other:?}"))),
        }
    }

    /// True if a bare TCP connect succeeds — used by `status`/`gc`/adoption
    /// to check reachability without needing the right auth token.
    pub async fn probe_reachable(host: &str, port: u16) -> bool {
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await.is_ok()
    }

    async fn send(&mut self, value: Value) -> Result<(), ClientError> {
        let mut line = value.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Read and parse exactly one newline-delimited frame.
    pub async fn next_frame(&mut self) -> Result<Value, ClientError> {
        self.read_frame().await
    }

    async fn read_frame(&mut self) -> Result<Value, ClientError> {
        let mut line = String::new();
        let n = tokio::time::timeout(DEFAULT_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .map_err(|_| ClientError::Timeout)??;
        if n == 0 {
            return Err(ClientError::Protocol("connection closed by daemon".into()));
        }
        serde_json::from_str(&line).map_err(|e| ClientError::Protocol(format!("malformed frame: {e}")))
    }

    /// Send one command and wait for its matching `command.completed` /
    /// `command.failed`. Frames belonging to a different `commandId` (there
    /// should be none on a connection used only for `call`) are dropped
    /// rather than buffered.
    pub async fn call(&mut self, command: &str, mut fields: serde_json::Map<String, Value>) -> Result<Value, ClientError> {
        let command_id = uuid::Uuid::new_v4().to_string();
        fields.insert("kind".into(), json!("command"));
        fields.insert("commandId".into(), json!(command_id));
        fields.insert("command".into(), json!(command));
        self.send(Value::Object(fields)).await?;

        loop {
            let frame = self.read_frame().await?;
            match frame["kind"].as_str() {
                Some("command.completed") if frame["commandId"].as_str() == Some(command_id.as_str()) => {
                    return Ok(frame["result"].clone());
                }
                Some("command.failed") if frame["commandId"].as_str() == Some(command_id.as_str()) => {
                    return Err(ClientError::Rejected {
                        code: frame["errorCode"].as_str().unwrap_or("internal").to_owned(),
                        message: frame["error"].as_str().unwrap_or("").to_owned(),
                    });
                }
                _ => continue,
            }
        }
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
