// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types for the line-delimited JSON-over-TCP command protocol (spec §6.1).
//!
//! Every frame is a single line of UTF-8 JSON. Unknown fields are ignored on
//! deserialization (the default for `serde`'s derived `Deserialize` unless a
//! `deny_unknown_fields` attribute is added, which none of these carry).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A frame sent by a client, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        token: Option<String>,
    },
    Command {
        #[serde(rename = "commandId")]
        command_id: String,
        #[serde(flatten)]
        payload: CommandPayload,
    },
}

/// The command-specific portion of a `Command` frame, tagged by `command`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandPayload {
    #[serde(rename = "session.list")]
    SessionList { limit: Option<u32> },
    #[serde(rename = "session.status")]
    SessionStatus { #[serde(rename = "sessionId")] session_id: String },
    #[serde(rename = "session.claim")]
    SessionClaim {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "controllerId")]
        controller_id: String,
        #[serde(rename = "controllerType")]
        controller_type: ControllerType,
    },
    #[serde(rename = "pty.start")]
    PtyStart {
        #[serde(rename = "sessionId")]
        session_id: String,
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        cwd: Option<String>,
        cols: u16,
        rows: u16,
        #[serde(rename = "terminalForegroundHex")]
        terminal_foreground_hex: Option<String>,
        #[serde(rename = "terminalBackgroundHex")]
        terminal_background_hex: Option<String>,
    },
    #[serde(rename = "pty.write")]
    PtyWrite {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "dataBase64")]
        data_base64: String,
    },
    #[serde(rename = "pty.resize")]
    PtyResize {
        #[serde(rename = "sessionId")]
        session_id: String,
        cols: u16,
        rows: u16,
    },
    #[serde(rename = "pty.close")]
    PtyClose { #[serde(rename = "sessionId")] session_id: String },
    #[serde(rename = "stream.subscribe")]
    StreamSubscribe {
        #[serde(rename = "tenantId")]
        tenant_id: Option<String>,
        #[serde(rename = "userId")]
        user_id: Option<String>,
        #[serde(rename = "workspaceId")]
        workspace_id: Option<String>,
        #[serde(rename = "directoryId")]
        directory_id: Option<String>,
        #[serde(rename = "conversationId")]
        conversation_id: Option<String>,
        #[serde(rename = "includeOutput", default)]
        include_output: bool,
        #[serde(rename = "afterCursor", default)]
        after_cursor: u64,
    },
    #[serde(rename = "stream.unsubscribe")]
    StreamUnsubscribe { #[serde(rename = "subscriptionId")] subscription_id: String },
}

/// A frame sent by the server, tagged by `kind`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    #[serde(rename = "auth.ok")]
    AuthOk,
    #[serde(rename = "auth.failed")]
    AuthFailed { reason: String },
    #[serde(rename = "command.accepted")]
    CommandAccepted { #[serde(rename = "commandId")] command_id: String },
    #[serde(rename = "command.completed")]
    CommandCompleted {
        #[serde(rename = "commandId")]
        command_id: String,
        result: serde_json::Value,
    },
    #[serde(rename = "command.failed")]
    CommandFailed {
        #[serde(rename = "commandId")]
        command_id: String,
        #[serde(rename = "errorCode")]
        error_code: String,
        error: String,
    },
    #[serde(rename = "stream.event")]
    StreamEvent {
        #[serde(rename = "subscriptionId")]
        subscription_id: String,
        cursor: u64,
        event: EventEnvelope,
    },
    #[serde(rename = "pty.output")]
    PtyOutput {
        #[serde(rename = "sessionId")]
        session_id: String,
        cursor: u64,
        #[serde(rename = "chunkBase64")]
        chunk_base64: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerType {
    Human,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Codex,
    Claude,
    Cursor,
    Terminal,
    Critique,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Attention,
    Exited,
    Closing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusModel {
    pub phase: String,
    #[serde(rename = "detailText")]
    pub detail_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Controller {
    #[serde(rename = "controllerId")]
    pub controller_id: String,
    #[serde(rename = "controllerType")]
    pub controller_type: ControllerType,
    #[serde(rename = "controllerLabel")]
    pub controller_label: Option<String>,
    #[serde(rename = "claimedAt")]
    pub claimed_at: String,
}

// -- Normalized event envelope (C3, spec §3) --------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Provider,
    Meta,
}

/// The closed set of event `type` values from spec §6.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    ProviderThreadStarted,
    ProviderTurnStarted,
    ProviderTurnCompleted,
    ProviderTurnFailed,
    ProviderTurnInterrupted,
    ProviderDiffUpdated,
    ProviderTextDelta,
    ProviderToolCallStarted,
    ProviderToolCallCompleted,
    MetaAttentionRaised,
    MetaAttentionCleared,
    MetaQueueUpdated,
    MetaNotifyObserved,
    MetaConversationHandoff,
    SessionStatus,
    SessionKeyEvent,
    SessionTelemetry,
    SessionControl,
    DirectoryUpserted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventScope {
    #[serde(rename = "tenantId")]
    pub tenant_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "workspaceId")]
    pub workspace_id: String,
    #[serde(rename = "worktreeId")]
    pub worktree_id: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
    #[serde(rename = "turnId", skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
}

/// Payload tagged union by `kind`; unknown kinds are a parse error so storage
/// cannot round-trip an illegal envelope (spec §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventPayload {
    Thread { #[serde(rename = "threadId")] thread_id: String },
    Turn { #[serde(rename = "turnId")] turn_id: String, status: String },
    TextDelta { text: String },
    DiffUpdated { path: String, #[serde(rename = "diffSummary")] diff_summary: String },
    Tool { name: String, #[serde(skip_serializing_if = "Option::is_none")] detail: Option<serde_json::Value> },
    Attention { reason: String, #[serde(default)] cleared: bool },
    Queue { depth: u32 },
    Notify { #[serde(rename = "notifyType")] notify_type: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    #[serde(rename = "eventId")]
    pub event_id: Uuid,
    pub source: EventSource,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub ts: String,
    pub scope: EventScope,
    pub payload: EventPayload,
}

impl EventEnvelope {
    pub const SCHEMA_VERSION: &'static str = "1";

    pub fn new(
        source: EventSource,
        event_type: EventType,
        scope: EventScope,
        payload: EventPayload,
    ) -> Self {
        Self {
            schema_version: Self::SCHEMA_VERSION.to_owned(),
            event_id: Uuid::new_v4(),
            source,
            event_type,
            ts: crate::lifecycle::now_iso8601(),
            scope,
            payload,
        }
    }
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
