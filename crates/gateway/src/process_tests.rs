// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn current_process_exists() {
    assert!(process_exists(std::process::id()));
}

#[test]
fn pid_one_exists_but_is_never_us() {
    // pid 1 (init) is essentially always present in a Linux container/host.
    assert!(process_exists(1));
}

#[test]
fn bogus_pid_does_not_exist() {
    assert!(!process_exists(u32::MAX - 1));
}

#[test]
fn find_orphans_ignores_unrelated_processes() {
    let dir = tempfile::tempdir().unwrap();
    let orphans = find_orphans(dir.path(), &dir.path().join("control-plane.sqlite"), None);
    assert!(orphans.is_empty());
}

#[tokio::test]
async fn terminate_process_on_already_exited_pid_is_a_no_op() {
    terminate_process(u32::MAX - 1, std::time::Duration::from_millis(50), true).await;
}
