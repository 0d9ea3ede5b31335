// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Closed failure taxonomy for everything that crosses the wire protocol.
///
/// Every variant maps to a `command.failed` reason string (see spec §4.6,
/// §7). Internal plumbing may still return `anyhow::Result` for things that
/// never reach a client; this enum is reserved for failures a caller needs
/// to branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    SessionNotFound,
    SessionAlreadyExists,
    SessionNotLive,
    ControllerConflict,
    InvalidCommand,
    SchemaMismatch,
    SlowConsumer,
    InvalidPath,
    Cancelled,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionNotFound => "session-not-found",
            Self::SessionAlreadyExists => "session-already-exists",
            Self::SessionNotLive => "session-not-live",
            Self::ControllerConflict => "controller-conflict",
            Self::InvalidCommand => "invalid-command",
            Self::SchemaMismatch => "schema-mismatch",
            Self::SlowConsumer => "slow-consumer",
            Self::InvalidPath => "invalid-path",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Error classification from spec §7, used to decide logging severity
    /// and whether local recovery may retry.
    pub fn class(self) -> ErrorClass {
        match self {
            Self::SessionNotFound
            | Self::SessionAlreadyExists
            | Self::InvalidCommand
            | Self::SchemaMismatch => ErrorClass::Input,
            Self::SlowConsumer => ErrorClass::Transient,
            Self::SessionNotLive | Self::ControllerConflict | Self::InvalidPath => {
                ErrorClass::Resource
            }
            Self::Cancelled => ErrorClass::Transient,
            Self::Internal => ErrorClass::Fatal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Input,
    Transient,
    Resource,
    Fatal,
}

/// A classified failure with a human-readable message, as spec §4.6
/// requires ("every failure includes a human-readable `error` string").
#[derive(Debug, Clone)]
pub struct DaemonError {
    pub code: ErrorCode,
    pub message: String,
}

impl DaemonError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn session_not_found(session_id: &str) -> Self {
        Self::new(ErrorCode::SessionNotFound, format!("no session with id {session_id}"))
    }

    pub fn controller_conflict(holder: &str) -> Self {
        Self::new(ErrorCode::ControllerConflict, format!("session is controlled by {holder}"))
    }

    pub fn invalid_path(path: &str) -> Self {
        Self::new(ErrorCode::InvalidPath, format!("path escapes workspace runtime root: {path}"))
    }
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for DaemonError {}

pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
