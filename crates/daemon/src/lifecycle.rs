// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon Lifecycle (C7, spec §4.7).
//!
//! The lockfile's stale-owner reclaim (pid-liveness check before removing a
//! lock nobody holds anymore) has no direct corpus precedent; it follows
//! spec §4.7's own "Stop" reclaim rule. The atomic-write helper below is
//! grounded on the teacher's `credential/persist.rs::save` (write to a
//! temp path in the same directory, then `std::fs::rename` over the
//! destination) for its on-disk records.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DaemonError;

/// Wall-clock timestamp formatting shared by every on-disk record and every
/// wire-protocol `ts`/`claimedAt`/`startedAt`/`acquiredAt` field.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// On-disk descriptor for a running daemon (spec §3 "Gateway record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRecord {
    pub version: u32,
    pub pid: u32,
    pub host: String,
    pub port: u16,
    #[serde(rename = "authToken")]
    pub auth_token: Option<String>,
    #[serde(rename = "stateDbPath")]
    pub state_db_path: PathBuf,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "workspaceRoot")]
    pub workspace_root: PathBuf,
    #[serde(rename = "gatewayRunId")]
    pub gateway_run_id: String,
}

pub const GATEWAY_RECORD_VERSION: u32 = 1;

/// On-disk workspace lock (spec §3 "Workspace lockfile").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceLock {
    pub version: u32,
    pub owner: LockOwner,
    #[serde(rename = "acquiredAt")]
    pub acquired_at: String,
    #[serde(rename = "workspaceRoot")]
    pub workspace_root: PathBuf,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    #[serde(rename = "startedAt")]
    pub started_at: String,
}

pub const LOCK_VERSION: u32 = 1;

/// Write `value` to `path` atomically (temp file in the same directory,
/// then rename), per spec §3/§4.7 "written atomically (temp+rename)".
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("record"),
        std::process::id()
    ));
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// True if `pid` names a live process (spec §3 "Lock owner proven by (pid live)").
fn pid_is_live(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Reads the kernel's process start time for `pid`, used as the second half
/// of "(pid live) ∧ (pid start timestamp matches)" so that a lock is not
/// mistakenly reclaimed from a live unrelated process that happens to reuse
/// a recycled pid. Returns `None` on platforms or proc layouts where this
/// cannot be determined (the live-pid check alone is then authoritative).
fn process_start_ticks(pid: u32) -> Option<u64> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Field 22 (starttime) follows the `)` that closes the process name,
    // which may itself contain spaces or parentheses.
    let after_comm = stat.rsplit_once(')')?.1;
    after_comm.split_whitespace().nth(19)?.parse().ok()
}

fn owner_matches_process(owner: &LockOwner, recorded_start_ticks: Option<u64>) -> bool {
    if !pid_is_live(owner.pid) {
        return false;
    }
    match (recorded_start_ticks, process_start_ticks(owner.pid)) {
        (Some(recorded), Some(current)) => recorded == current,
        // Can't prove a mismatch; fall back to liveness alone.
        _ => true,
    }
}

/// A held workspace lock. Dropping it does not release the lock on disk;
/// call [`release`](Lock::release) explicitly during a clean stop so the
/// lockfile is only ever removed by the thread that can observe the rest of
/// shutdown succeeding.
pub struct Lock {
    path: PathBuf,
    pub record: WorkspaceLock,
}

impl Lock {
    /// Acquire the workspace lockfile. Re-acquiring while already the owner
    /// (by pid) is a no-op; a lock held by a dead or mismatched owner is
    /// reclaimed (spec §4.7 "Startup").
    pub fn acquire(lock_path: &Path, workspace_root: &Path, token: &str) -> anyhow::Result<Self> {
        if let Some(existing) = read_lock(lock_path)? {
            let recorded_ticks = existing.start_ticks;
            if owner_matches_process(&existing.lock.owner, recorded_ticks) {
                if existing.lock.owner.pid == std::process::id() {
                    debug!(pid = existing.lock.owner.pid, "re-acquiring own lockfile, no-op");
                    return Ok(Self { path: lock_path.to_path_buf(), record: existing.lock });
                }
                anyhow::bail!(
                    "workspace lockfile held by live pid {}",
                    existing.lock.owner.pid
                );
            }
            warn!(
                pid = existing.lock.owner.pid,
                "reclaiming stale workspace lockfile"
            );
        }

        let record = WorkspaceLock {
            version: LOCK_VERSION,
            owner: LockOwner { pid: std::process::id(), started_at: now_iso8601() },
            acquired_at: now_iso8601(),
            workspace_root: workspace_root.to_path_buf(),
            token: token.to_owned(),
        };
        write_atomic(lock_path, &record)?;
        info!(path = %lock_path.display(), "acquired workspace lockfile");
        Ok(Self { path: lock_path.to_path_buf(), record })
    }

    pub fn release(self) {
        let _ = fs::remove_file(&self.path);
        info!(path = %self.path.display(), "released workspace lockfile");
    }
}

struct ExistingLock {
    lock: WorkspaceLock,
    start_ticks: Option<u64>,
}

fn read_lock(path: &Path) -> anyhow::Result<Option<ExistingLock>> {
    match fs::read_to_string(path) {
        Ok(body) => {
            let lock: WorkspaceLock = serde_json::from_str(&body)?;
            let start_ticks = process_start_ticks(lock.owner.pid);
            Ok(Some(ExistingLock { lock, start_ticks }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn write_gateway_record(path: &Path, record: &GatewayRecord) -> anyhow::Result<()> {
    write_atomic(path, record)
}

pub fn read_gateway_record(path: &Path) -> anyhow::Result<Option<GatewayRecord>> {
    match fs::read_to_string(path) {
        Ok(body) => Ok(Some(serde_json::from_str(&body)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn remove_gateway_record(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Path normalization (spec §6.2): every runtime artifact path must resolve
/// under `workspace_root`. Compares normalized path *components*, not
/// string prefixes, so a `..`-traversal can't escape and a sibling
/// directory that merely shares a string prefix (root `/ws` vs `/ws-evil`)
/// is never mistaken for containment.
pub fn ensure_under_workspace_root(workspace_root: &Path, candidate: &Path) -> Result<PathBuf, DaemonError> {
    let joined = if candidate.is_absolute() { candidate.to_path_buf() } else { workspace_root.join(candidate) };
    let normalized_root = normalize_lexically(workspace_root);
    let normalized_joined = normalize_lexically(&joined);
    if normalized_joined.starts_with(&normalized_root) {
        Ok(joined)
    } else {
        Err(DaemonError::invalid_path(&joined.display().to_string()))
    }
}

/// Resolves `.`/`..` components lexically, without touching the filesystem,
/// since the artifact's parent directory may not exist yet the first time
/// its path is checked.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Sweeps named-session artifact trees under `<workspace_root>/sessions`
/// whose daemon is not live and whose contents are older than
/// `older_than_days`, skipping `current_session` (spec §4.7 "GC").
pub fn gc_named_sessions(
    sessions_root: &Path,
    current_session: Option<&str>,
    older_than_days: u64,
) -> anyhow::Result<Vec<String>> {
    let mut removed = Vec::new();
    let entries = match fs::read_dir(sessions_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(e.into()),
    };

    let cutoff = SystemTime::now()
        .checked_sub(std::time::Duration::from_secs(older_than_days * 86_400));

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if Some(name.as_str()) == current_session {
            continue;
        }
        let tree = entry.path();
        let lock_path = tree.join("gateway.lock");
        if let Some(existing) = read_lock(&lock_path)? {
            if owner_matches_process(&existing.lock.owner, existing.start_ticks) {
                continue;
            }
        }
        if let Some(cutoff) = cutoff {
            if tree_newer_than(&tree, cutoff)? {
                continue;
            }
        }
        fs::remove_dir_all(&tree)?;
        removed.push(name);
    }
    Ok(removed)
}

fn tree_newer_than(tree: &Path, cutoff: SystemTime) -> anyhow::Result<bool> {
    for entry in fs::read_dir(tree)? {
        let entry = entry?;
        let modified = entry.metadata()?.modified()?;
        if modified > cutoff {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
