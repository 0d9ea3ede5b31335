// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon process supervision: finding the sibling binary, spawning it in
//! the background, and sweeping orphans (spec §4.7 "Startup"/"Stop"
//! "Optional cleanupOrphans step"). Grounded on `groblegark-oddjobs`'s
//! `daemon_process.rs` (`find_ojd_binary`'s debug-build/sibling-exe/PATH
//! fallback chain, `kill_signal`/`process_exists` via `kill -0/-15/-9`),
//! adapted from its PID-file model to the lockfile + gateway-record model.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// Locate the `harness-daemon` binary to spawn: a debug-build sibling under
/// `target/debug` when this binary is itself a debug build (so `cargo run
/// -p gateway` in development finds the matching daemon rather than a stale
/// installed one), else a sibling of the current executable, else `PATH`.
pub fn find_daemon_binary() -> PathBuf {
    let current_exe = std::env::current_exe().ok();

    let is_debug_build =
        current_exe.as_ref().and_then(|p| p.to_str()).map(|s| s.contains("target/debug")).unwrap_or(false);

    if is_debug_build {
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            if let Some(dev_path) =
                PathBuf::from(manifest_dir).parent().and_then(|p| p.parent()).map(|p| p.join("target/debug/harness-daemon"))
            {
                if dev_path.exists() {
                    return dev_path;
                }
            }
        }
    }

    if let Some(dir) = current_exe.as_ref().and_then(|p| p.parent()) {
        let sibling = dir.join("harness-daemon");
        if sibling.exists() {
            return sibling;
        }
    }

    PathBuf::from("harness-daemon")
}

/// Spawn a detached `harness-daemon` background process bound to
/// `workspace_root`, inheriting the rest of the gateway's daemon-config
/// flags so the child picks the same host/port/token/db as requested.
pub fn spawn_daemon_background(args: &[String]) -> std::io::Result<std::process::Child> {
    let binary = find_daemon_binary();
    debug!(?binary, ?args, "spawning daemon");
    Command::new(binary).args(args).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null()).spawn()
}

/// True if a process with `pid` exists (spec §3 "lock owner proven by pid
/// live").
pub fn process_exists(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// SIGTERM, then after `grace` elapses without exit, SIGKILL. Returns once
/// the process is confirmed gone or the hard-kill attempt has been made.
pub async fn terminate_process(pid: u32, grace: std::time::Duration, force: bool) {
    let raw = Pid::from_raw(pid as i32);
    let _ = kill(raw, Signal::SIGTERM);

    let start = std::time::Instant::now();
    while start.elapsed() < grace {
        if !process_exists(pid) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    if process_exists(pid) {
        if force {
            warn!(pid, "daemon did not exit within grace period, sending SIGKILL");
            let _ = kill(raw, Signal::SIGKILL);
        } else {
            warn!(pid, "daemon did not exit within grace period and --force was not given");
        }
    }
}

/// A process on the OS table whose command line references this
/// workspace's runtime paths but which the gateway no longer has a live
/// record for (spec §9 "process supervision → OS signals + table
/// parsing"). Linux-only: reads `/proc/*/cmdline`.
#[derive(Debug, Clone)]
pub struct OrphanProcess {
    pub pid: u32,
    pub cmdline: String,
}

/// Scan `/proc` for processes whose command line mentions `workspace_root`
/// or `state_db_path`, excluding `current_pid` (the daemon this gateway
/// currently holds a record for, if any). Best-effort: unreadable `/proc`
/// entries (permission, race with exit) are skipped, not errors.
pub fn find_orphans(workspace_root: &std::path::Path, state_db_path: &std::path::Path, current_pid: Option<u32>) -> Vec<OrphanProcess> {
    let workspace_str = workspace_root.to_string_lossy().into_owned();
    let db_str = state_db_path.to_string_lossy().into_owned();
    let mut found = Vec::new();

    let Ok(entries) = std::fs::read_dir("/proc") else {
        return found;
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else { continue };
        if Some(pid) == current_pid {
            continue;
        }
        let cmdline_path = entry.path().join("cmdline");
        let Ok(raw) = std::fs::read(&cmdline_path) else { continue };
        let cmdline = String::from_utf8_lossy(&raw).replace('\0', " ").trim().to_owned();
        if cmdline.is_empty() {
            continue;
        }
        if cmdline.contains("harness-daemon") && (cmdline.contains(&workspace_str) || cmdline.contains(&db_str)) {
            found.push(OrphanProcess { pid, cmdline });
        }
    }
    found
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
