// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI surface (spec §6.3): `gateway start|stop|status|restart|run|call|gc|list`.
//! Grounded on `groblegark-oddjobs`'s `commands/daemon.rs` (`DaemonArgs`/
//! `DaemonCommand` shape) and the teacher's own `clap::Parser` derive usage.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "gateway", about = "Harness gateway: start, stop, and talk to the control-plane daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every subcommand that needs to locate a workspace's
/// runtime artifacts (spec §6.2 "Files & paths").
#[derive(Debug, Clone, Parser)]
pub struct WorkspaceArgs {
    /// Root of the workspace whose daemon this gateway talks to. Defaults to
    /// the current directory.
    #[arg(long, global = true, default_value = ".")]
    pub workspace_root: PathBuf,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start a daemon for this workspace, or adopt one already running.
    Start {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        auth_token: Option<String>,
        #[arg(long)]
        state_db_path: Option<PathBuf>,
        /// Proceed even when multiple reachable adoption candidates exist.
        #[arg(long)]
        force: bool,
    },

    /// Stop the daemon owning this workspace's gateway record.
    Stop {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        /// Send SIGKILL if the daemon has not exited after `--timeout-ms`.
        #[arg(long)]
        force: bool,
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
        /// Sweep orphan daemons/PTY-helpers/relay-agents/sqlite processes
        /// matching this workspace after stopping (default: on).
        #[arg(long = "cleanup-orphans", action = clap::ArgAction::SetTrue)]
        cleanup_orphans_flag: bool,
        #[arg(long = "no-cleanup-orphans", action = clap::ArgAction::SetTrue, conflicts_with = "cleanup_orphans_flag")]
        no_cleanup_orphans_flag: bool,
    },

    /// Report whether a daemon is running for this workspace.
    Status {
        #[command(flatten)]
        workspace: WorkspaceArgs,
    },

    /// Stop then start.
    Restart {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[arg(long)]
        force: bool,
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },

    /// Start a session and stream its output until it exits.
    Run {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        /// Session id to start under. Defaults to a generated id.
        #[arg(long)]
        session_id: Option<String>,
        /// Command and arguments to run under the PTY.
        #[arg(trailing_var_arg = true, required = true)]
        argv: Vec<String>,
    },

    /// Send one raw command and print its result.
    Call {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        /// Command name, e.g. `session.list`.
        command: String,
        /// Command fields as a JSON object, e.g. `{"sessionId":"x"}`.
        #[arg(default_value = "{}")]
        fields: String,
    },

    /// Sweep named-session artifact trees that are no longer live and have
    /// not been touched recently (spec §4.7 "GC").
    Gc {
        #[command(flatten)]
        workspace: WorkspaceArgs,
        #[arg(long, default_value_t = 7)]
        older_than_days: u64,
    },

    /// List known sessions.
    List {
        #[command(flatten)]
        workspace: WorkspaceArgs,
    },
}

impl Command {
    pub fn workspace(&self) -> &WorkspaceArgs {
        match self {
            Command::Start { workspace, .. }
            | Command::Stop { workspace, .. }
            | Command::Status { workspace }
            | Command::Restart { workspace, .. }
            | Command::Run { workspace, .. }
            | Command::Call { workspace, .. }
            | Command::Gc { workspace, .. }
            | Command::List { workspace } => workspace,
        }
    }
}

impl Cli {
    /// `Stop`'s effective `cleanupOrphans` flag, honoring `--no-cleanup-orphans`
    /// and defaulting to on (spec §4.7 "Optional cleanupOrphans step").
    pub fn cleanup_orphans(&self) -> bool {
        match &self.command {
            Command::Stop { no_cleanup_orphans_flag, .. } => !*no_cleanup_orphans_flag,
            _ => true,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
