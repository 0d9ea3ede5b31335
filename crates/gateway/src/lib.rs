// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `gateway`: the CLI that starts, stops, and talks to a `harness-daemon`
//! (spec §4.7, §6.3). Thin by design — almost everything it does is either
//! spawn/signal a daemon process or relay one wire-protocol call.

pub mod client;
pub mod commands;
pub mod config;
pub mod process;
pub mod support;

use tracing::error;

use crate::config::{Cli, Command};
use crate::support::GatewayError;

/// Exit codes from spec §6.3.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_OPERATIONAL_FAILURE: i32 = 1;
pub const EXIT_SIGINT: i32 = 130;
pub const EXIT_SIGTERM: i32 = 143;

pub async fn run(cli: Cli) -> i32 {
    let cleanup_orphans = cli.cleanup_orphans();
    match dispatch(cli, cleanup_orphans).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            EXIT_OPERATIONAL_FAILURE
        }
    }
}

async fn dispatch(cli: Cli, cleanup_orphans: bool) -> Result<i32, GatewayError> {
    let json = cli.command.workspace().json;

    match cli.command {
        Command::Start { workspace, host, port, auth_token, state_db_path, force } => {
            let outcome = commands::start::run(commands::start::StartRequest {
                workspace_root: workspace.workspace_root,
                host,
                port,
                auth_token,
                state_db_path,
                force,
            })
            .await?;
            print_result(
                json,
                serde_json::json!({ "host": outcome.host, "port": outcome.port, "adopted": outcome.adopted, "alreadyRunning": outcome.already_running }),
                &format!(
                    "{} daemon at {}:{}",
                    if outcome.already_running { "already running" } else if outcome.adopted { "adopted" } else { "started" },
                    outcome.host,
                    outcome.port
                ),
            );
            Ok(EXIT_SUCCESS)
        }

        Command::Stop { workspace, force, timeout_ms, .. } => {
            let outcome = commands::stop::run(commands::stop::StopRequest {
                workspace_root: workspace.workspace_root,
                force,
                timeout_ms,
                cleanup_orphans,
            })
            .await?;
            print_result(
                json,
                serde_json::json!({ "stopped": outcome.stopped, "orphansRemoved": outcome.orphans_removed }),
                if outcome.stopped { "daemon stopped" } else { "no daemon was running" },
            );
            Ok(EXIT_SUCCESS)
        }

        Command::Status { workspace } => {
            let report = commands::status::run(&workspace.workspace_root).await?;
            let line = if report.running {
                format!("running (pid {}, {} sessions)", report.pid.unwrap_or(0), report.session_count.unwrap_or(0))
            } else {
                "not running".to_owned()
            };
            print_result(json, serde_json::to_value(&report).unwrap_or(serde_json::Value::Null), &line);
            Ok(EXIT_SUCCESS)
        }

        Command::Restart { workspace, force, timeout_ms } => {
            let outcome = commands::restart::run(commands::restart::RestartRequest {
                workspace_root: workspace.workspace_root,
                force,
                timeout_ms,
            })
            .await?;
            print_result(
                json,
                serde_json::json!({ "host": outcome.host, "port": outcome.port }),
                &format!("restarted daemon at {}:{}", outcome.host, outcome.port),
            );
            Ok(EXIT_SUCCESS)
        }

        Command::Run { workspace, session_id, argv } => {
            let code = run_with_signal_handling(commands::run::run(commands::run::RunRequest {
                workspace_root: workspace.workspace_root,
                session_id,
                argv,
            }))
            .await?;
            Ok(code)
        }

        Command::Call { workspace, command, fields } => {
            let result = commands::call::run(&workspace.workspace_root, &command, &fields).await?;
            print_result(json, result.clone(), &result.to_string());
            Ok(EXIT_SUCCESS)
        }

        Command::Gc { workspace, older_than_days } => {
            let removed = commands::gc::run(&workspace.workspace_root, older_than_days).await?;
            print_result(
                json,
                serde_json::json!({ "removed": removed }),
                &format!("removed {} stale session tree(s)", removed.len()),
            );
            Ok(EXIT_SUCCESS)
        }

        Command::List { workspace } => {
            let result = commands::list::run(&workspace.workspace_root).await?;
            print_result(json, result.clone(), &result.to_string());
            Ok(EXIT_SUCCESS)
        }
    }
}

fn print_result(json: bool, value: serde_json::Value, text: &str) {
    if json {
        println!("{value}");
    } else {
        println!("{text}");
    }
}

/// Races a long-running future (only `gateway run` streams indefinitely)
/// against SIGINT/SIGTERM so interruption maps to the documented 130/143
/// exit codes (spec §6.3) instead of a bare error.
async fn run_with_signal_handling(
    fut: impl std::future::Future<Output = Result<i32, GatewayError>>,
) -> Result<i32, GatewayError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).map_err(GatewayError::from)?;
        tokio::select! {
            result = fut => result,
            _ = tokio::signal::ctrl_c() => Ok(EXIT_SIGINT),
            _ = term.recv() => Ok(EXIT_SIGTERM),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = fut => result,
            _ = tokio::signal::ctrl_c() => Ok(EXIT_SIGINT),
        }
    }
}
