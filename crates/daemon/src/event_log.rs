// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event Log (C3, spec §4.3).
//!
//! The teacher's `event_log.rs` is a JSONL-file-append-and-filter store with
//! no SQL schema, no transactions, no tenant scoping, and it silently
//! swallows I/O errors — none of which satisfies spec §4.3/§7 ("local
//! recovery never swallows an event that has been acknowledged to a
//! client"). This module is instead backed by `rusqlite` (`bundled`
//! feature), grounded on `other_examples/manifests/BumpyClock-homie`,
//! `lanegrid-agtrace`, and `grizzdank-rembrandt`, all of which use
//! `rusqlite` for a local, single-process-owned embedded store — a better
//! fit than `sqlx` given the Non-goal against remote clustering (see
//! `DESIGN.md`). The blocking `rusqlite::Connection` is driven from
//! `tokio::task::spawn_blocking`, mirroring the teacher's own
//! `spawn_blocking`-for-`waitpid` idiom in `pty/spawn.rs`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{mpsc, oneshot, Mutex};
use uuid::Uuid;

use crate::error::{DaemonError, ErrorCode};
use crate::protocol::{EventEnvelope, EventPayload, EventScope, EventSource, EventType};

/// On-disk schema version. A newer version than this binary supports is a
/// fatal error (fail-closed, spec §4.3).
const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub row_id: i64,
    pub envelope: EventEnvelope,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub tenant_id: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub after_row_id: Option<i64>,
    pub limit: Option<u32>,
}

/// Thin synchronous wrapper around the sqlite connection. All methods block
/// and are only ever called from inside `spawn_blocking`.
struct Store {
    conn: Connection,
}

impl Store {
    fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS events (
                 row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                 event_id TEXT NOT NULL UNIQUE,
                 tenant_id TEXT NOT NULL,
                 user_id TEXT NOT NULL,
                 workspace_id TEXT NOT NULL,
                 worktree_id TEXT NOT NULL,
                 conversation_id TEXT NOT NULL,
                 turn_id TEXT,
                 source TEXT NOT NULL,
                 event_type TEXT NOT NULL,
                 ts TEXT NOT NULL,
                 schema_version TEXT NOT NULL,
                 payload TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_events_scope_tail
                 ON events(tenant_id, user_id, conversation_id, row_id);",
        )?;

        let stamped: Option<i64> =
            conn.query_row("SELECT version FROM schema_meta LIMIT 1", [], |r| r.get(0)).optional()?;
        match stamped {
            None => {
                conn.execute("INSERT INTO schema_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                anyhow::bail!(
                    "event log schema version {v} is newer than supported version {SCHEMA_VERSION}"
                );
            }
            Some(_) => {}
        }

        Ok(Self { conn })
    }

    fn append_events(&mut self, events: &[EventEnvelope]) -> Result<Vec<i64>, DaemonError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DaemonError::new(ErrorCode::Internal, e.to_string()))?;
        let mut row_ids = Vec::with_capacity(events.len());

        for envelope in events {
            let payload_json = serde_json::to_string(&envelope.payload)
                .map_err(|e| DaemonError::new(ErrorCode::Internal, e.to_string()))?;
            let result = tx.execute(
                "INSERT INTO events
                    (event_id, tenant_id, user_id, workspace_id, worktree_id,
                     conversation_id, turn_id, source, event_type, ts,
                     schema_version, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    envelope.event_id.to_string(),
                    envelope.scope.tenant_id,
                    envelope.scope.user_id,
                    envelope.scope.workspace_id,
                    envelope.scope.worktree_id,
                    envelope.scope.conversation_id,
                    envelope.scope.turn_id,
                    source_str(envelope.source),
                    event_type_str(envelope.event_type),
                    envelope.ts,
                    envelope.schema_version,
                    payload_json,
                ],
            );
            match result {
                Ok(_) => row_ids.push(tx.last_insert_rowid()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    // Duplicate eventId: roll back the whole batch (spec §8 scenario 5).
                    return Err(DaemonError::new(
                        ErrorCode::Internal,
                        format!("duplicate eventId {}", envelope.event_id),
                    ));
                }
                Err(e) => return Err(DaemonError::new(ErrorCode::Internal, e.to_string())),
            }
        }

        tx.commit().map_err(|e| DaemonError::new(ErrorCode::Internal, e.to_string()))?;
        Ok(row_ids)
    }

    fn max_row_id(&self, tenant_id: &str, user_id: &str) -> Result<i64, DaemonError> {
        self.conn
            .query_row(
                "SELECT COALESCE(MAX(row_id), 0) FROM events WHERE tenant_id = ? AND user_id = ?",
                params![tenant_id, user_id],
                |r| r.get(0),
            )
            .map_err(|e| DaemonError::new(ErrorCode::Internal, e.to_string()))
    }

    fn list_events(&self, query: &ListQuery) -> Result<Vec<StoredEvent>, DaemonError> {
        let after = query.after_row_id.unwrap_or(0);
        let limit = query.limit.unwrap_or(1000).min(10_000);

        let mut stmt = self
            .conn
            .prepare(
                "SELECT row_id, event_id, tenant_id, user_id, workspace_id, worktree_id,
                        conversation_id, turn_id, source, event_type, ts, schema_version, payload
                 FROM events
                 WHERE tenant_id = ? AND user_id = ?
                   AND row_id > ?
                   AND (? IS NULL OR conversation_id = ?)
                 ORDER BY row_id ASC
                 LIMIT ?",
            )
            .map_err(|e| DaemonError::new(ErrorCode::Internal, e.to_string()))?;

        let rows = stmt
            .query_map(
                params![
                    query.tenant_id,
                    query.user_id,
                    after,
                    query.conversation_id,
                    query.conversation_id,
                    limit
                ],
                row_to_stored_event,
            )
            .map_err(|e| DaemonError::new(ErrorCode::Internal, e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| DaemonError::new(ErrorCode::Internal, e.to_string()))?);
        }
        Ok(out)
    }
}

fn row_to_stored_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredEvent> {
    let event_id: String = row.get(1)?;
    let payload_json: String = row.get(12)?;
    let payload: EventPayload = serde_json::from_str(&payload_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, rusqlite::types::Type::Text, Box::new(e)))?;
    let source: String = row.get(8)?;
    let event_type: String = row.get(9)?;

    Ok(StoredEvent {
        row_id: row.get(0)?,
        envelope: EventEnvelope {
            schema_version: row.get(11)?,
            event_id: Uuid::parse_str(&event_id).unwrap_or_else(|_| Uuid::nil()),
            source: parse_source(&source),
            event_type: parse_event_type(&event_type),
            ts: row.get(10)?,
            scope: EventScope {
                tenant_id: row.get(2)?,
                user_id: row.get(3)?,
                workspace_id: row.get(4)?,
                worktree_id: row.get(5)?,
                conversation_id: row.get(6)?,
                turn_id: row.get(7)?,
            },
            payload,
        },
    })
}

fn source_str(source: EventSource) -> &'static str {
    match source {
        EventSource::Provider => "provider",
        EventSource::Meta => "meta",
    }
}

fn parse_source(s: &str) -> EventSource {
    match s {
        "meta" => EventSource::Meta,
        _ => EventSource::Provider,
    }
}

fn event_type_str(t: EventType) -> String {
    // serde's kebab-case rendering matches the wire representation exactly.
    match serde_json::to_value(t) {
        Ok(serde_json::Value::String(s)) => s,
        _ => "session-status".to_owned(),
    }
}

fn parse_event_type(s: &str) -> EventType {
    serde_json::from_value(serde_json::Value::String(s.to_owned())).unwrap_or(EventType::SessionStatus)
}

/// Batching writer: soft 25ms timer, hard cap of 128 events (spec §4.3),
/// flushed early on cap-hit or shutdown. Busy errors are retried with
/// bounded backoff before surfacing to the caller.
pub struct EventLog {
    store: Arc<Mutex<Store>>,
    submit_tx: mpsc::Sender<Submission>,
}

struct Submission {
    envelope: EventEnvelope,
    reply: oneshot::Sender<Result<i64, DaemonError>>,
}

impl EventLog {
    pub fn open(
        path: PathBuf,
        batch_interval: Duration,
        batch_cap: usize,
    ) -> anyhow::Result<Self> {
        let store = Arc::new(Mutex::new(Store::open(&path)?));
        let (submit_tx, submit_rx) = mpsc::channel(1024);
        tokio::spawn(run_batch_writer(Arc::clone(&store), submit_rx, batch_interval, batch_cap));
        Ok(Self { store, submit_tx })
    }

    /// Append a single event and wait for it to be durably committed.
    /// `command.completed` must not be sent to a client until this resolves.
    pub async fn append(&self, envelope: EventEnvelope) -> Result<i64, DaemonError> {
        let (reply, reply_rx) = oneshot::channel();
        if self.submit_tx.send(Submission { envelope, reply }).await.is_err() {
            return Err(DaemonError::new(ErrorCode::Internal, "event log writer is gone"));
        }
        reply_rx
            .await
            .unwrap_or_else(|_| Err(DaemonError::new(ErrorCode::Internal, "event log writer dropped reply")))
    }

    /// Reads don't funnel through the batching writer; they take their own
    /// short-lived lock on the shared connection (only `run_batch_writer`
    /// ever calls `append_events`, preserving single-writer discipline).
    pub async fn list(&self, query: ListQuery) -> Result<Vec<StoredEvent>, DaemonError> {
        let guard = self.store.lock().await;
        guard.list_events(&query)
    }

    /// Current max `rowId` for a scope, used to snapshot `startRowId` when a
    /// subscription is created (spec §4.5).
    pub async fn max_row_id(&self, tenant_id: &str, user_id: &str) -> Result<i64, DaemonError> {
        let guard = self.store.lock().await;
        guard.max_row_id(tenant_id, user_id)
    }
}

async fn run_batch_writer(
    store: Arc<Mutex<Store>>,
    mut submit_rx: mpsc::Receiver<Submission>,
    batch_interval: Duration,
    batch_cap: usize,
) {
    let mut pending: Vec<Submission> = Vec::new();
    let mut ticker = tokio::time::interval(batch_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            submission = submit_rx.recv() => {
                match submission {
                    Some(submission) => {
                        pending.push(submission);
                        if pending.len() >= batch_cap {
                            flush(&store, &mut pending).await;
                        }
                    }
                    None => {
                        flush(&store, &mut pending).await;
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    flush(&store, &mut pending).await;
                }
            }
        }
    }
}

async fn flush(store: &Arc<Mutex<Store>>, pending: &mut Vec<Submission>) {
    if pending.is_empty() {
        return;
    }
    let batch: Vec<Submission> = std::mem::take(pending);
    let envelopes: Vec<EventEnvelope> = batch.iter().map(|s| s.envelope.clone()).collect();

    let store = Arc::clone(store);
    let result = retry_busy(move || {
        let store = Arc::clone(&store);
        let envelopes = envelopes.clone();
        async move {
            let mut guard = store.lock().await;
            guard.append_events(&envelopes)
        }
    })
    .await;

    match result {
        Ok(row_ids) => {
            for (submission, row_id) in batch.into_iter().zip(row_ids) {
                let _ = submission.reply.send(Ok(row_id));
            }
        }
        Err(e) => {
            for submission in batch {
                let _ = submission.reply.send(Err(e.clone()));
            }
        }
    }
}

/// Retry a busy-db operation with bounded backoff before surfacing it as a
/// transient failure (spec §4.3 "busy errors are retried with backoff up to
/// a short budget").
async fn retry_busy<F, Fut, T>(mut op: F) -> Result<T, DaemonError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, DaemonError>>,
{
    const MAX_ATTEMPTS: u32 = 5;
    let mut delay = Duration::from_millis(10);
    let mut last_err = None;
    for _ in 0..MAX_ATTEMPTS {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| DaemonError::new(ErrorCode::Internal, "retry budget exhausted")))
}

#[cfg(test)]
#[path = "event_log_tests.rs"]
mod tests;
