// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Registry (C4, spec §4.4).
//!
//! Grounded on `broker/registry.rs`'s `PodRegistry` (register/deregister/
//! list/health-sweep shape) and `coopmux/state.rs`'s
//! `MuxState.sessions: HashMap<...>` table, adapted from a pod/proxy
//! registry to the session-ownership/controller model spec §4.4 describes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::broker::Broker;
use crate::error::{DaemonError, ErrorCode};
use crate::protocol::{AgentType, Controller, ControllerType, EventPayload, EventScope, EventSource,
    EventType, EventEnvelope, SessionStatus, StatusModel};

#[derive(Debug, Clone)]
pub struct NewSessionSpec {
    pub session_id: String,
    pub command: String,
    pub command_args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
    pub agent_type: AgentType,
    /// Scope used for any `session-*` derived events this session's
    /// lifecycle emits (spec §6.1 "derived stream events").
    pub scope: EventScope,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSnapshot {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "agentType")]
    pub agent_type: AgentType,
    pub live: bool,
    pub status: SessionStatus,
    #[serde(rename = "statusModel")]
    pub status_model: StatusModel,
    #[serde(rename = "processId")]
    pub process_id: Option<u32>,
    pub controller: Option<Controller>,
}

struct Entry {
    session_id: String,
    agent_type: AgentType,
    scope: EventScope,
    controller: Option<Controller>,
    status: SessionStatus,
    status_model: StatusModel,
    process_id: Option<u32>,
    broker: Broker,
    exited_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        !matches!(self.status, SessionStatus::Exited)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            agent_type: self.agent_type,
            live: self.live(),
            status: self.status,
            status_model: self.status_model.clone(),
            process_id: self.process_id,
            controller: self.controller.clone(),
        }
    }
}

pub struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { entries: RwLock::new(HashMap::new()) })
    }

    pub async fn create_session(
        &self,
        spec: NewSessionSpec,
        broker: Broker,
    ) -> Result<SessionSnapshot, DaemonError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&spec.session_id) {
            return Err(DaemonError::new(
                ErrorCode::SessionAlreadyExists,
                format!("session {} already exists", spec.session_id),
            ));
        }
        let entry = Entry {
            session_id: spec.session_id.clone(),
            agent_type: spec.agent_type,
            scope: spec.scope,
            controller: None,
            status: SessionStatus::Starting,
            status_model: StatusModel { phase: "starting".into(), detail_text: String::new() },
            process_id: None,
            broker,
            exited_at: None,
        };
        let snapshot = entry.snapshot();
        entries.insert(spec.session_id, entry);
        Ok(snapshot)
    }

    pub async fn get(&self, session_id: &str) -> Result<SessionSnapshot, DaemonError> {
        let entries = self.entries.read().await;
        entries
            .get(session_id)
            .map(Entry::snapshot)
            .ok_or_else(|| DaemonError::session_not_found(session_id))
    }

    pub async fn list(&self, limit: Option<u32>) -> Vec<SessionSnapshot> {
        let entries = self.entries.read().await;
        let mut snapshots: Vec<_> = entries.values().map(Entry::snapshot).collect();
        snapshots.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        if let Some(limit) = limit {
            snapshots.truncate(limit as usize);
        }
        snapshots
    }

    pub async fn broker(&self, session_id: &str) -> Result<Broker, DaemonError> {
        let entries = self.entries.read().await;
        entries
            .get(session_id)
            .map(|e| e.broker.clone())
            .ok_or_else(|| DaemonError::session_not_found(session_id))
    }

    /// `claim` succeeds iff there is no controller or the requester already
    /// holds it (spec §4.4). Returns the resulting controller record plus
    /// the `session-control` event the caller must publish.
    pub async fn claim(
        &self,
        session_id: &str,
        controller_id: String,
        controller_type: ControllerType,
    ) -> Result<(Controller, EventEnvelope), DaemonError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(session_id)
            .ok_or_else(|| DaemonError::session_not_found(session_id))?;

        let action = match &entry.controller {
            None => "claimed",
            Some(existing) if existing.controller_id == controller_id => "reclaimed",
            Some(existing) => return Err(DaemonError::controller_conflict(&existing.controller_id)),
        };

        let controller = Controller {
            controller_id,
            controller_type,
            controller_label: None,
            claimed_at: crate::lifecycle::now_iso8601(),
        };
        entry.controller = Some(controller.clone());

        let event = EventEnvelope::new(
            EventSource::Meta,
            EventType::SessionControl,
            entry.scope.clone(),
            EventPayload::Notify {
                notify_type: "session-control".into(),
                message: format!("{action}:{}", controller.controller_id),
            },
        );
        Ok((controller, event))
    }

    pub async fn release(
        &self,
        session_id: &str,
        controller_id: &str,
    ) -> Result<EventEnvelope, DaemonError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(session_id)
            .ok_or_else(|| DaemonError::session_not_found(session_id))?;

        match &entry.controller {
            Some(existing) if existing.controller_id == controller_id => {
                entry.controller = None;
            }
            Some(existing) => return Err(DaemonError::controller_conflict(&existing.controller_id)),
            None => {}
        }

        Ok(EventEnvelope::new(
            EventSource::Meta,
            EventType::SessionControl,
            entry.scope.clone(),
            EventPayload::Notify {
                notify_type: "session-control".into(),
                message: format!("released:{controller_id}"),
            },
        ))
    }

    pub async fn observe_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        status_model: StatusModel,
        process_id: Option<u32>,
    ) -> Result<(), DaemonError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(session_id)
            .ok_or_else(|| DaemonError::session_not_found(session_id))?;
        entry.status = status;
        entry.status_model = status_model;
        if process_id.is_some() {
            entry.process_id = process_id;
        }
        Ok(())
    }

    pub async fn mark_exited(&self, session_id: &str) -> Result<(), DaemonError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(session_id)
            .ok_or_else(|| DaemonError::session_not_found(session_id))?;
        entry.status = SessionStatus::Exited;
        entry.exited_at = Some(Instant::now());
        Ok(())
    }

    /// Sweep exited sessions older than `grace` (spec §9 Open Question (b)).
    /// Returns the ids removed.
    pub async fn gc(&self, grace: Duration) -> Vec<String> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let stale: Vec<String> = entries
            .iter()
            .filter_map(|(id, e)| match e.exited_at {
                Some(at) if now.duration_since(at) >= grace => Some(id.clone()),
                _ => None,
            })
            .collect();
        for id in &stale {
            entries.remove(id);
        }
        stale
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
