// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn top_level_workspace_is_not_a_named_session() {
    assert!(!is_named_session_workspace(Path::new("/tmp/ws")));
}

#[test]
fn sessions_child_is_a_named_session() {
    assert!(is_named_session_workspace(Path::new("/tmp/ws/sessions/alice")));
}

#[test]
fn a_directory_that_merely_lives_under_something_else_is_not_a_named_session() {
    assert!(!is_named_session_workspace(Path::new("/tmp/ws/not-sessions/alice")));
    assert!(!is_named_session_workspace(Path::new("/tmp/sessions")));
}

#[tokio::test]
async fn port_in_use_detects_a_bound_listener_and_frees_up_after_drop() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    assert!(port_in_use("127.0.0.1", port).await);

    drop(listener);
    assert!(!port_in_use("127.0.0.1", port).await);
}
