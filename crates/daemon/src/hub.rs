// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription Hub (C5, spec §4.5).
//!
//! Grounded on `broker/mux.rs`'s `Multiplexer` (fan-out hub shape, per-stream
//! cache) and `coopmux/state.rs`'s `Aggregator`, but redesigned from a shared
//! `broadcast::Sender` with a lag counter to one bounded `mpsc` queue per
//! subscription: the spec requires hard `slow-consumer` termination rather
//! than silently skipping lagged broadcast receivers.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::protocol::EventEnvelope;

#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub tenant_id: Option<String>,
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
    pub directory_id: Option<String>,
    pub conversation_id: Option<String>,
}

impl SubscriptionFilter {
    fn matches_scope(&self, scope: &crate::protocol::EventScope) -> bool {
        self.tenant_id.as_deref().map_or(true, |v| v == scope.tenant_id)
            && self.user_id.as_deref().map_or(true, |v| v == scope.user_id)
            && self.workspace_id.as_deref().map_or(true, |v| v == scope.workspace_id)
            && self.directory_id.as_deref().map_or(true, |v| v == scope.worktree_id)
            && self.conversation_id.as_deref().map_or(true, |v| v == scope.conversation_id)
    }

    fn matches_conversation(&self, conversation_id: &str) -> bool {
        self.conversation_id.as_deref().map_or(true, |v| v == conversation_id)
    }
}

/// Delivered to a subscriber in the order the hub observed it; `Terminated`
/// is always the last item on a queue (spec §4.5 "a terminal envelope is
/// delivered, then the subscription is removed").
#[derive(Debug, Clone)]
pub enum HubDelivery {
    Event { row_id: u64, event: EventEnvelope },
    Output { session_id: String, cursor: u64, data: Bytes },
    Terminated { reason: ErrorCode },
}

struct Subscription {
    filter: SubscriptionFilter,
    include_output: bool,
    /// Events with `rowId <= threshold` are never delivered (spec §4.5:
    /// `max(afterCursor, startRowId)` computed once at subscribe time).
    threshold: u64,
    tx: mpsc::Sender<HubDelivery>,
}

pub struct Hub {
    queue_len: usize,
    subs: RwLock<HashMap<String, Subscription>>,
}

impl Hub {
    pub fn new(queue_len: usize) -> Self {
        Self { queue_len, subs: RwLock::new(HashMap::new()) }
    }

    /// `start_row_id` is the event log's current max rowId, snapshotted by
    /// the caller atomically with respect to any concurrent appends so the
    /// subscription cannot miss or double-deliver events at the boundary.
    pub async fn subscribe(
        &self,
        filter: SubscriptionFilter,
        include_output: bool,
        after_cursor: u64,
        start_row_id: u64,
    ) -> (String, u64, mpsc::Receiver<HubDelivery>) {
        let id = Uuid::new_v4().to_string();
        let threshold = after_cursor.max(start_row_id);
        let (tx, rx) = mpsc::channel(self.queue_len);
        self.subs.write().await.insert(id.clone(), Subscription { filter, include_output, threshold, tx });
        (id, threshold, rx)
    }

    /// Idempotent; draining pending items is the receiver's responsibility
    /// once it stops polling (spec §4.5 "Cancellation").
    pub async fn unsubscribe(&self, subscription_id: &str) {
        self.subs.write().await.remove(subscription_id);
    }

    pub async fn publish_event(&self, row_id: u64, event: &EventEnvelope) {
        let mut subs = self.subs.write().await;
        let mut dead = Vec::new();
        for (id, sub) in subs.iter() {
            if row_id <= sub.threshold || !sub.filter.matches_scope(&event.scope) {
                continue;
            }
            if sub
                .tx
                .try_send(HubDelivery::Event { row_id, event: event.clone() })
                .is_err()
            {
                dead.push(id.clone());
            }
        }
        self.terminate_slow_consumers(&mut subs, dead).await;
    }

    pub async fn publish_output(&self, conversation_id: &str, session_id: &str, cursor: u64, data: Bytes) {
        let mut subs = self.subs.write().await;
        let mut dead = Vec::new();
        for (id, sub) in subs.iter() {
            if !sub.include_output || !sub.filter.matches_conversation(conversation_id) {
                continue;
            }
            if sub
                .tx
                .try_send(HubDelivery::Output {
                    session_id: session_id.to_owned(),
                    cursor,
                    data: data.clone(),
                })
                .is_err()
            {
                dead.push(id.clone());
            }
        }
        self.terminate_slow_consumers(&mut subs, dead).await;
    }

    async fn terminate_slow_consumers(&self, subs: &mut HashMap<String, Subscription>, dead: Vec<String>) {
        for id in dead {
            if let Some(sub) = subs.remove(&id) {
                let _ = sub.tx.try_send(HubDelivery::Terminated { reason: ErrorCode::SlowConsumer });
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subs.read().await.len()
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
