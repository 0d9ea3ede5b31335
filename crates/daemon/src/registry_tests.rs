// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::pty::PtySpawnSpec;

fn scope() -> EventScope {
    EventScope {
        tenant_id: "t".into(),
        user_id: "u".into(),
        workspace_id: "ws".into(),
        worktree_id: "wt".into(),
        conversation_id: "conv".into(),
        turn_id: None,
    }
}

fn spec(id: &str) -> NewSessionSpec {
    NewSessionSpec {
        session_id: id.into(),
        command: "/bin/cat".into(),
        command_args: vec![],
        cwd: None,
        env: HashMap::new(),
        cols: 80,
        rows: 24,
        agent_type: AgentType::Terminal,
        scope: scope(),
    }
}

fn broker_for(spec: &NewSessionSpec) -> Broker {
    Broker::spawn(
        PtySpawnSpec {
            command: spec.command.clone(),
            args: spec.command_args.clone(),
            env: spec.env.clone(),
            cwd: spec.cwd.clone(),
            cols: spec.cols,
            rows: spec.rows,
            term: None,
        },
        64 * 1024,
    )
}

#[tokio::test]
async fn create_session_rejects_duplicate_ids() {
    let registry = Registry::new();
    let s = spec("sess-1");
    registry.create_session(s.clone(), broker_for(&s)).await.unwrap();
    let err = registry.create_session(s.clone(), broker_for(&s)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::SessionAlreadyExists);
}

#[tokio::test]
async fn claim_then_reclaim_then_conflict() {
    let registry = Registry::new();
    let s = spec("sess-1");
    registry.create_session(s.clone(), broker_for(&s)).await.unwrap();

    let (controller, _event) = registry
        .claim("sess-1", "alice".into(), ControllerType::Human)
        .await
        .unwrap();
    assert_eq!(controller.controller_id, "alice");

    let (reclaimed, _event) = registry
        .claim("sess-1", "alice".into(), ControllerType::Human)
        .await
        .unwrap();
    assert_eq!(reclaimed.controller_id, "alice");

    let err = registry
        .claim("sess-1", "bob".into(), ControllerType::Human)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ControllerConflict);
}

#[tokio::test]
async fn release_by_non_owner_is_a_conflict() {
    let registry = Registry::new();
    let s = spec("sess-1");
    registry.create_session(s.clone(), broker_for(&s)).await.unwrap();
    registry.claim("sess-1", "alice".into(), ControllerType::Human).await.unwrap();

    let err = registry.release("sess-1", "bob").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ControllerConflict);

    registry.release("sess-1", "alice").await.unwrap();
    let snapshot = registry.get("sess-1").await.unwrap();
    assert!(snapshot.controller.is_none());
}

#[tokio::test]
async fn gc_sweeps_only_entries_past_the_grace_period() {
    let registry = Registry::new();
    let s = spec("sess-1");
    registry.create_session(s.clone(), broker_for(&s)).await.unwrap();
    registry.mark_exited("sess-1").await.unwrap();

    let swept_too_soon = registry.gc(Duration::from_secs(60)).await;
    assert!(swept_too_soon.is_empty());

    let swept = registry.gc(Duration::from_millis(0)).await;
    assert_eq!(swept, vec!["sess-1".to_string()]);
    assert!(registry.get("sess-1").await.is_err());
}

#[tokio::test]
async fn snapshot_carries_the_session_agent_type() {
    let registry = Registry::new();
    let mut s = spec("sess-1");
    s.agent_type = AgentType::Claude;
    registry.create_session(s.clone(), broker_for(&s)).await.unwrap();

    let snapshot = registry.get("sess-1").await.unwrap();
    assert_eq!(snapshot.agent_type, AgentType::Claude);

    let listed = registry.list(None).await;
    assert_eq!(listed[0].agent_type, AgentType::Claude);
}

#[tokio::test]
async fn unknown_session_operations_return_session_not_found() {
    let registry = Registry::new();
    assert_eq!(registry.get("ghost").await.unwrap_err().code, ErrorCode::SessionNotFound);
    assert_eq!(
        registry.claim("ghost", "a".into(), ControllerType::Human).await.unwrap_err().code,
        ErrorCode::SessionNotFound
    );
}
