// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::protocol::{EventPayload, EventScope, EventSource, EventType};

fn scope(tenant: &str, conv: &str) -> EventScope {
    EventScope {
        tenant_id: tenant.into(),
        user_id: "u".into(),
        workspace_id: "ws".into(),
        worktree_id: "wt".into(),
        conversation_id: conv.into(),
        turn_id: None,
    }
}

fn event(tenant: &str, conv: &str) -> EventEnvelope {
    EventEnvelope::new(
        EventSource::Meta,
        EventType::MetaNotifyObserved,
        scope(tenant, conv),
        EventPayload::Notify { notify_type: "info".into(), message: "hi".into() },
    )
}

#[tokio::test]
async fn subscribe_then_unsubscribe_with_no_events_delivers_nothing() {
    let hub = Hub::new(16);
    let (id, _threshold, mut rx) = hub.subscribe(SubscriptionFilter::default(), false, 0, 0).await;
    hub.unsubscribe(&id).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn events_at_or_below_threshold_are_not_delivered() {
    let hub = Hub::new(16);
    let (_id, threshold, mut rx) = hub.subscribe(SubscriptionFilter::default(), false, 5, 0).await;
    assert_eq!(threshold, 5);

    hub.publish_event(5, &event("t", "c")).await;
    assert!(rx.try_recv().is_err());

    hub.publish_event(6, &event("t", "c")).await;
    match rx.try_recv() {
        Ok(HubDelivery::Event { row_id, .. }) => assert_eq!(row_id, 6),
        other => panic!("expected event, got {other:?}"),
    }
}

#[tokio::test]
async fn filter_excludes_other_tenants() {
    let hub = Hub::new(16);
    let filter = SubscriptionFilter { tenant_id: Some("A".into()), ..Default::default() };
    let (_id, _threshold, mut rx) = hub.subscribe(filter, false, 0, 0).await;

    hub.publish_event(1, &event("B", "c")).await;
    assert!(rx.try_recv().is_err());

    hub.publish_event(2, &event("A", "c")).await;
    assert!(rx.try_recv().is_ok());
}

#[tokio::test]
async fn overflowing_the_queue_terminates_with_slow_consumer() {
    let hub = Hub::new(1);
    let (_id, _threshold, mut rx) = hub.subscribe(SubscriptionFilter::default(), false, 0, 0).await;

    hub.publish_event(1, &event("t", "c")).await;
    hub.publish_event(2, &event("t", "c")).await;

    assert!(matches!(rx.try_recv(), Ok(HubDelivery::Event { row_id: 1, .. })));
    assert!(matches!(rx.try_recv(), Ok(HubDelivery::Terminated { reason: ErrorCode::SlowConsumer })));
    assert!(rx.try_recv().is_err());
    assert_eq!(hub.subscriber_count().await, 0);
}

#[tokio::test]
async fn output_only_delivered_when_include_output_and_conversation_matches() {
    let hub = Hub::new(16);
    let filter = SubscriptionFilter { conversation_id: Some("conv-1".into()), ..Default::default() };
    let (_id, _threshold, mut rx) = hub.subscribe(filter, true, 0, 0).await;

    hub.publish_output("conv-2", "sess", 1, Bytes::from_static(b"x")).await;
    assert!(rx.try_recv().is_err());

    hub.publish_output("conv-1", "sess", 2, Bytes::from_static(b"y")).await;
    match rx.try_recv() {
        Ok(HubDelivery::Output { cursor, .. }) => assert_eq!(cursor, 2),
        other => panic!("expected output, got {other:?}"),
    }
}
