// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

/// Daemon-side configuration, shared by the `harness-daemon` binary (parsed
/// directly as a top-level `Parser`) and by `gateway::commands::start`
/// (flattened into a parent CLI so the gateway can pass daemon flags
/// straight through when spawning one).
#[derive(Debug, Clone, Parser)]
#[command(name = "harness-daemon", about = "Harness control-plane daemon")]
pub struct DaemonConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "HARNESS_HOST")]
    pub host: String,

    /// Port to listen on. 0 means pick an ephemeral port.
    #[arg(long, default_value_t = 0, env = "HARNESS_PORT")]
    pub port: u16,

    /// Shared loopback auth token. If unset, a random token is generated and
    /// recorded in the gateway record; non-loopback hosts require an
    /// operator-supplied token (spec §1 Non-goals).
    #[arg(long, env = "HARNESS_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Root of the workspace this daemon serves. All runtime artifacts
    /// (gateway record, lock, event db, named-session trees) live under it.
    #[arg(long, env = "HARNESS_WORKSPACE_ROOT")]
    pub workspace_root: PathBuf,

    /// Path to the event log database. Defaults to
    /// `<workspace_root>/control-plane.sqlite`.
    #[arg(long, env = "HARNESS_STATE_DB_PATH")]
    pub state_db_path: Option<PathBuf>,

    /// Byte budget for a session broker's output backlog (spec §3, default 256 KiB).
    #[arg(long, default_value_t = 256 * 1024, env = "HARNESS_BACKLOG_BYTES")]
    pub backlog_bytes: usize,

    /// Bounded delivery queue length per subscription (spec §4.5, default 4096).
    #[arg(long, default_value_t = 4096, env = "HARNESS_SUBSCRIPTION_QUEUE_LEN")]
    pub subscription_queue_len: usize,

    /// Grace period before an exited session is swept from the registry
    /// (spec §9 Open Question (b): bounded, >= one GC tick, <= 60s).
    #[arg(long, default_value_t = 30, env = "HARNESS_EXIT_GRACE_SECS")]
    pub exit_grace_secs: u64,

    /// Soft flush timer for batching event-log writes (spec §4.3, default 25ms).
    #[arg(long, default_value_t = 25, env = "HARNESS_EVENT_BATCH_MS")]
    pub event_batch_ms: u64,

    /// Hard cap on events per batch before a forced flush (spec §4.3, default 128).
    #[arg(long, default_value_t = 128, env = "HARNESS_EVENT_BATCH_CAP")]
    pub event_batch_cap: usize,

    /// Structured logging format.
    #[arg(long, default_value = "text", env = "HARNESS_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Tenant id stamped on every event this daemon emits (spec §3 scope
    /// tuple). A single daemon serves one workstation-local tenant.
    #[arg(long, default_value = "local", env = "HARNESS_TENANT_ID")]
    pub tenant_id: String,

    /// User id stamped on every event this daemon emits. Defaults to the
    /// invoking OS user.
    #[arg(long, env = "HARNESS_USER_ID")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "lower")]
pub enum LogFormat {
    Text,
    Json,
}

impl DaemonConfig {
    /// Resolves `--state-db-path`/`HARNESS_STATE_DB_PATH` against the
    /// workspace root, or the default location under it if unset. This is
    /// the one path getter that takes an operator-supplied override, so it's
    /// the one that must enforce spec §6.2's "every runtime artifact path
    /// must resolve under the workspace runtime root" (`invalid-path`
    /// otherwise); the other getters below only ever join a fixed literal
    /// onto `workspace_root` and can't escape it.
    pub fn state_db_path(&self) -> crate::error::DaemonResult<PathBuf> {
        let candidate = self
            .state_db_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("control-plane.sqlite"));
        crate::lifecycle::ensure_under_workspace_root(&self.workspace_root, &candidate)
    }

    pub fn gateway_record_path(&self) -> PathBuf {
        self.workspace_root.join("gateway.json")
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.workspace_root.join("gateway.lock")
    }

    pub fn log_path(&self) -> PathBuf {
        self.workspace_root.join("gateway.log")
    }

    pub fn sessions_root(&self) -> PathBuf {
        self.workspace_root.join("sessions")
    }

    /// Resolved user id: the `--user-id`/`HARNESS_USER_ID` override, or the
    /// OS user that invoked the daemon, or `"local"` if neither is available.
    pub fn resolved_user_id(&self) -> String {
        self.user_id.clone().unwrap_or_else(|| {
            std::env::var("USER").or_else(|_| std::env::var("USERNAME")).unwrap_or_else(|_| "local".into())
        })
    }

    /// Workspace id derived from the workspace root's directory name, used
    /// as the default scope's `workspaceId` (spec §3 scope tuple).
    pub fn resolved_workspace_id(&self) -> String {
        self.workspace_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".into())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.workspace_root.is_absolute() {
            anyhow::bail!("--workspace-root must be an absolute path");
        }
        if self.backlog_bytes == 0 {
            anyhow::bail!("--backlog-bytes must be greater than zero");
        }
        if self.exit_grace_secs == 0 || self.exit_grace_secs > 60 {
            anyhow::bail!("--exit-grace-secs must be in 1..=60");
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
