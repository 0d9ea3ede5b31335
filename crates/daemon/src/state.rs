// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level daemon state (spec §9 "Shared-state singletons → explicit
//! ownership"): a single owner hands out typed handles to the registry,
//! hub, and event log rather than exposing ambient globals. Grounded on
//! `transport/state.rs`'s `Store` composition pattern.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::info;

use crate::broker::{Broker, BrokerEvent};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, ErrorCode};
use crate::event_log::EventLog;
use crate::hub::{Hub, HubDelivery, SubscriptionFilter};
use crate::protocol::{
    CommandPayload, EventEnvelope, EventPayload, EventScope, EventSource, EventType,
    SessionStatus, StatusModel,
};
use crate::pty::{PtyExit, PtySpawnSpec};
use crate::registry::{NewSessionSpec, Registry};

/// A daemon's full runtime state. `Clone` is cheap (everything behind `Arc`);
/// every TCP connection task holds one clone.
#[derive(Clone)]
pub struct DaemonState {
    pub config: Arc<DaemonConfig>,
    pub registry: Arc<Registry>,
    pub hub: Arc<Hub>,
    pub event_log: Arc<EventLog>,
    /// Serializes state-mutating commands so the daemon has a single logical
    /// writer (spec §4.6); read-only queries bypass this (spec §5).
    writer_lock: Arc<AsyncMutex<()>>,
    default_scope: EventScope,
    /// A freshly created subscription's receiver, handed off here until the
    /// connection task that issued `stream.subscribe` claims it (spec §9
    /// "async callbacks → task + bounded queue": the queue is owned by the
    /// connection, not by `DaemonState`).
    pending_subscriptions: Arc<AsyncMutex<HashMap<String, mpsc::Receiver<HubDelivery>>>>,
}

impl DaemonState {
    pub fn new(config: DaemonConfig, event_log: EventLog, default_scope: EventScope) -> Self {
        Self {
            registry: Registry::new(),
            hub: Arc::new(Hub::new(config.subscription_queue_len)),
            event_log: Arc::new(event_log),
            writer_lock: Arc::new(AsyncMutex::new(())),
            default_scope,
            pending_subscriptions: Arc::new(AsyncMutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }

    /// Claims the delivery queue for a subscription created by a prior
    /// `handle(StreamSubscribe)` call on this same connection task.
    pub async fn take_subscription_receiver(&self, subscription_id: &str) -> Option<mpsc::Receiver<HubDelivery>> {
        self.pending_subscriptions.lock().await.remove(subscription_id)
    }

    /// Tells every live session's subscribers it is going away because the
    /// daemon itself is stopping (spec §5 "Graceful shutdown": "broadcast
    /// `session-status(exited, reason=shutting-down)` for live sessions").
    /// Best-effort: a session whose event can't be appended in time is
    /// simply not reconciled, the same tradeoff `publish` already makes for
    /// any event under backpressure.
    pub async fn broadcast_shutdown(&self) {
        for session in self.registry.list(None).await {
            if !session.live {
                continue;
            }
            let scope = EventScope { conversation_id: session.session_id.clone(), ..self.default_scope.clone() };
            self.publish(EventEnvelope::new(
                EventSource::Meta,
                EventType::SessionStatus,
                scope,
                EventPayload::Notify {
                    notify_type: "session-status".into(),
                    message: format!("shutting-down:{}", session.session_id),
                },
            ))
            .await;
        }
    }

    async fn publish(&self, event: EventEnvelope) {
        match self.event_log.append(event.clone()).await {
            Ok(row_id) => self.hub.publish_event(row_id as u64, &event).await,
            Err(e) => tracing::warn!(error = %e, "event append failed, not published to hub"),
        }
    }

    async fn bridge_broker_output(self, session_id: String, scope: EventScope, broker: Broker) {
        let (_id, mut rx) = broker.attach(0).await;
        while let Some(event) = rx.recv().await {
            match event {
                BrokerEvent::Output { cursor, data } => {
                    self.hub.publish_output(&scope.conversation_id, &session_id, cursor, data).await;
                }
                BrokerEvent::Exit(exit) => {
                    self.on_session_exit(&session_id, scope, exit).await;
                    break;
                }
                BrokerEvent::Terminated => {
                    tracing::warn!(session_id, "broker dropped the daemon's own output bridge attachment for lagging");
                    break;
                }
            }
        }
    }

    async fn on_session_exit(&self, session_id: &str, scope: EventScope, exit: PtyExit) {
        let _ = self.registry.mark_exited(session_id).await;
        let status_model = StatusModel {
            phase: "exited".into(),
            detail_text: exit.error.clone().unwrap_or_default(),
        };
        let _ = self.registry.observe_status(session_id, SessionStatus::Exited, status_model, None).await;
        info!(session_id, code = ?exit.code, signal = ?exit.signal, "session exited");
        self.publish(EventEnvelope::new(
            EventSource::Meta,
            EventType::SessionStatus,
            scope,
            EventPayload::Notify {
                notify_type: "session-status".into(),
                message: format!("exited:{session_id}"),
            },
        ))
        .await;
    }

    /// Dispatches one already-validated command to its handler, returning the
    /// JSON `result` body of a `command.completed` frame (spec §6.1 table).
    pub async fn handle(&self, payload: CommandPayload) -> Result<serde_json::Value, DaemonError> {
        match payload {
            CommandPayload::SessionList { limit } => {
                let sessions = self.registry.list(limit).await;
                Ok(serde_json::json!({ "sessions": sessions }))
            }
            CommandPayload::SessionStatus { session_id } => {
                let snapshot = self.registry.get(&session_id).await?;
                Ok(serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null))
            }
            CommandPayload::SessionClaim { session_id, controller_id, controller_type } => {
                let _guard = self.writer_lock.lock().await;
                let (controller, event) =
                    self.registry.claim(&session_id, controller_id, controller_type).await?;
                self.publish(event).await;
                Ok(serde_json::to_value(controller).unwrap_or(serde_json::Value::Null))
            }
            CommandPayload::PtyStart { session_id, args, env, cwd, cols, rows, .. } => {
                self.handle_pty_start(session_id, args, env, cwd, cols, rows).await
            }
            CommandPayload::PtyWrite { session_id, data_base64 } => {
                let broker = self.registry.broker(&session_id).await?;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data_base64)
                    .map_err(|e| DaemonError::new(ErrorCode::InvalidCommand, format!("invalid dataBase64: {e}")))?;
                broker.write(bytes.into()).await;
                Ok(serde_json::json!({ "ok": true }))
            }
            CommandPayload::PtyResize { session_id, cols, rows } => {
                let broker = self.registry.broker(&session_id).await?;
                broker.resize(cols, rows).await;
                Ok(serde_json::json!({ "ok": true }))
            }
            CommandPayload::PtyClose { session_id } => {
                let _guard = self.writer_lock.lock().await;
                let broker = self.registry.broker(&session_id).await?;
                let status_model = StatusModel { phase: "closing".into(), detail_text: String::new() };
                self.registry.observe_status(&session_id, SessionStatus::Closing, status_model, None).await?;
                broker.close().await;
                Ok(serde_json::json!({ "ok": true }))
            }
            CommandPayload::StreamSubscribe {
                tenant_id,
                user_id,
                workspace_id,
                directory_id,
                conversation_id,
                include_output,
                after_cursor,
            } => {
                let filter = SubscriptionFilter { tenant_id, user_id, workspace_id, directory_id, conversation_id };
                let start_row_id = self
                    .event_log
                    .max_row_id(&self.default_scope.tenant_id, &self.default_scope.user_id)
                    .await
                    .unwrap_or(0)
                    .max(0) as u64;
                let (subscription_id, cursor, rx) =
                    self.hub.subscribe(filter, include_output, after_cursor, start_row_id).await;
                self.pending_subscriptions.lock().await.insert(subscription_id.clone(), rx);
                Ok(serde_json::json!({ "subscriptionId": subscription_id, "cursor": cursor }))
            }
            CommandPayload::StreamUnsubscribe { subscription_id } => {
                self.hub.unsubscribe(&subscription_id).await;
                Ok(serde_json::json!({ "unsubscribed": true }))
            }
        }
    }

    async fn handle_pty_start(
        &self,
        session_id: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<String>,
        cols: u16,
        rows: u16,
    ) -> Result<serde_json::Value, DaemonError> {
        let _guard = self.writer_lock.lock().await;
        // Each session gets its own conversation within the daemon's
        // tenant/user/workspace scope, so per-session event/output ordering
        // (spec §8 "subscription ordering") and tenant isolation hold even
        // when several sessions run concurrently.
        let scope = EventScope { conversation_id: session_id.clone(), ..self.default_scope.clone() };
        let command = args.first().cloned().unwrap_or_default();
        let command_args = args.iter().skip(1).cloned().collect::<Vec<_>>();
        let spec = NewSessionSpec {
            session_id: session_id.clone(),
            command: command.clone(),
            command_args: command_args.clone(),
            cwd: cwd.clone(),
            env: env.clone(),
            cols,
            rows,
            agent_type: crate::protocol::AgentType::Terminal,
            scope: scope.clone(),
        };
        let broker = Broker::spawn(
            PtySpawnSpec { command, args: command_args, env, cwd, cols, rows, term: None },
            self.config.backlog_bytes,
        );
        self.registry.create_session(spec, broker.clone()).await?;

        let status_model = StatusModel { phase: "starting".into(), detail_text: String::new() };
        self.registry
            .observe_status(&session_id, SessionStatus::Starting, status_model, broker.child_pid().await)
            .await?;

        tokio::spawn(self.clone().bridge_broker_output(session_id.clone(), scope, broker));

        Ok(serde_json::json!({ "sessionId": session_id }))
    }

    /// Background GC tick (spec §4.7 "GC"); swept sessions are logged, not
    /// returned to any caller.
    pub async fn run_gc_loop(self, grace: Duration) {
        let mut ticker = tokio::time::interval(grace.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            let swept = self.registry.gc(grace).await;
            if !swept.is_empty() {
                info!(count = swept.len(), "swept exited sessions");
            }
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
