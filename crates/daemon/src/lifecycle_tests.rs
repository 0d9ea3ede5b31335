// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn own_pid_reacquire_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("gateway.lock");
    let first = Lock::acquire(&lock_path, dir.path(), "tok").unwrap();
    let first_acquired_at = first.record.acquired_at.clone();
    let second = Lock::acquire(&lock_path, dir.path(), "tok").unwrap();
    assert_eq!(second.record.acquired_at, first_acquired_at);
    second.release();
}

#[test]
fn stale_lock_from_dead_pid_is_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("gateway.lock");
    let stale = WorkspaceLock {
        version: LOCK_VERSION,
        owner: LockOwner { pid: 999_999, started_at: now_iso8601() },
        acquired_at: now_iso8601(),
        workspace_root: dir.path().to_path_buf(),
        token: "old".into(),
    };
    write_atomic(&lock_path, &stale).unwrap();

    let acquired = Lock::acquire(&lock_path, dir.path(), "new").unwrap();
    assert_eq!(acquired.record.owner.pid, std::process::id());
    acquired.release();
}

#[test]
fn gateway_record_round_trips_through_atomic_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gateway.json");
    let record = GatewayRecord {
        version: GATEWAY_RECORD_VERSION,
        pid: std::process::id(),
        host: "127.0.0.1".into(),
        port: 4242,
        auth_token: Some("tok".into()),
        state_db_path: dir.path().join("control-plane.sqlite"),
        started_at: now_iso8601(),
        workspace_root: dir.path().to_path_buf(),
        gateway_run_id: "run-1".into(),
    };
    write_gateway_record(&path, &record).unwrap();
    let read_back = read_gateway_record(&path).unwrap().expect("record present");
    assert_eq!(read_back.port, 4242);
    remove_gateway_record(&path);
    assert!(read_gateway_record(&path).unwrap().is_none());
}

#[test]
fn path_outside_workspace_root_is_rejected() {
    let err = ensure_under_workspace_root(Path::new("/ws"), Path::new("/etc/passwd")).unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::InvalidPath);

    let ok = ensure_under_workspace_root(Path::new("/ws"), Path::new("sessions/a")).unwrap();
    assert_eq!(ok, Path::new("/ws/sessions/a"));
}

#[test]
fn dot_dot_traversal_out_of_the_root_is_rejected() {
    let err = ensure_under_workspace_root(Path::new("/ws"), Path::new("sessions/../../etc/passwd")).unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::InvalidPath);

    // A `..` that stays inside the root is fine.
    let ok = ensure_under_workspace_root(Path::new("/ws"), Path::new("sessions/a/../b")).unwrap();
    assert_eq!(ok, Path::new("/ws/sessions/a/../b"));
}

#[test]
fn sibling_directory_sharing_a_string_prefix_is_rejected() {
    // `/ws-evil` starts with the string "/ws" but is not under it.
    let err = ensure_under_workspace_root(Path::new("/ws"), Path::new("/ws-evil/gateway.json")).unwrap_err();
    assert_eq!(err.code, crate::error::ErrorCode::InvalidPath);
}

#[test]
fn gc_skips_current_session_and_live_daemons() {
    let dir = tempfile::tempdir().unwrap();
    let sessions_root = dir.path().join("sessions");
    let keep_current = sessions_root.join("current");
    let keep_live = sessions_root.join("live");
    let remove_me = sessions_root.join("stale");
    for tree in [&keep_current, &keep_live, &remove_me] {
        fs::create_dir_all(tree).unwrap();
        fs::write(tree.join("marker"), b"x").unwrap();
    }

    let live_lock = WorkspaceLock {
        version: LOCK_VERSION,
        owner: LockOwner { pid: std::process::id(), started_at: now_iso8601() },
        acquired_at: now_iso8601(),
        workspace_root: keep_live.clone(),
        token: "t".into(),
    };
    write_atomic(&keep_live.join("gateway.lock"), &live_lock).unwrap();

    let removed = gc_named_sessions(&sessions_root, Some("current"), 0).unwrap();
    assert_eq!(removed, vec!["stale".to_string()]);
    assert!(keep_current.exists());
    assert!(keep_live.exists());
    assert!(!remove_me.exists());
}
