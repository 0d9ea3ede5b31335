// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn start_parses_daemon_overrides() {
    let cli = Cli::parse_from(["gateway", "start", "--host", "0.0.0.0", "--port", "9000", "--force"]);
    match cli.command {
        Command::Start { host, port, force, .. } => {
            assert_eq!(host.as_deref(), Some("0.0.0.0"));
            assert_eq!(port, Some(9000));
            assert!(force);
        }
        other => panic!("expected Start, got {other:?}"),
    }
}

#[test]
fn stop_defaults_cleanup_orphans_to_true() {
    let cli = Cli::parse_from(["gateway", "stop"]);
    assert!(cli.cleanup_orphans());
    match cli.command {
        Command::Stop { force, timeout_ms, .. } => {
            assert!(!force);
            assert_eq!(timeout_ms, 5000);
        }
        other => panic!("expected Stop, got {other:?}"),
    }
}

#[test]
fn stop_no_cleanup_orphans_disables_sweep() {
    let cli = Cli::parse_from(["gateway", "stop", "--no-cleanup-orphans"]);
    assert!(!cli.cleanup_orphans());
}

#[test]
fn run_collects_trailing_argv() {
    let cli = Cli::parse_from(["gateway", "run", "--", "bash", "-lc", "echo hi"]);
    match cli.command {
        Command::Run { argv, .. } => assert_eq!(argv, vec!["bash", "-lc", "echo hi"]),
        other => panic!("expected Run, got {other:?}"),
    }
}

#[test]
fn call_defaults_fields_to_empty_object() {
    let cli = Cli::parse_from(["gateway", "call", "session.list"]);
    match cli.command {
        Command::Call { command, fields, .. } => {
            assert_eq!(command, "session.list");
            assert_eq!(fields, "{}");
        }
        other => panic!("expected Call, got {other:?}"),
    }
}

#[test]
fn workspace_root_defaults_to_current_dir() {
    let cli = Cli::parse_from(["gateway", "list"]);
    assert_eq!(cli.command.workspace().workspace_root, PathBuf::from("."));
}

#[test]
fn missing_subcommand_is_an_argument_error() {
    let result = Cli::try_parse_from(["gateway"]);
    assert!(result.is_err());
}
