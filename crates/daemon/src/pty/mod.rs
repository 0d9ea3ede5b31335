// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY host (C1, spec §4.1).
//!
//! Grounded on `pty/{mod,spawn,nbio}.rs` in the teacher crate: the
//! `forkpty`+`execvp` spawn path and `AsyncFd`-based non-blocking I/O are
//! kept. Unlike the teacher's `Backend` trait (object-safe, used for both a
//! native PTY and a tmux/screen attach backend), `start()` here never fails:
//! a spawn error is delivered as a synthetic exit so the broker never has to
//! special-case construction failure versus runtime failure (spec §4.1).

mod nbio;
mod spawn;

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

pub use nbio::PtyFd;

/// Parameters for starting a child process under a pseudo-terminal.
#[derive(Debug, Clone)]
pub struct PtySpawnSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<String>,
    pub cols: u16,
    pub rows: u16,
    pub term: Option<String>,
}

/// Input delivered to a running PTY.
#[derive(Debug, Clone)]
pub enum BackendInput {
    Write(Bytes),
    Resize { cols: u16, rows: u16 },
}

/// Terminal exit report. `code`/`signal` are both `None` and `error` is
/// `Some` when the child never started at all (spec §4.1 spawn-failure
/// semantics).
#[derive(Debug, Clone)]
pub struct PtyExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub error: Option<String>,
}

/// A live (or failed-to-start) PTY, as returned by [`start`].
pub struct PtyHandle {
    input_tx: mpsc::Sender<BackendInput>,
    child_pid: Arc<AtomicU32>,
}

impl PtyHandle {
    /// Queue bytes for the child's stdin. Never blocks the caller further
    /// than channel backpressure; if the PTY has already exited the send is
    /// a silent no-op, matching "all later writes are no-ops" (spec §4.1).
    pub fn write(&self, data: Bytes) {
        let _ = self.input_tx.try_send(BackendInput::Write(data));
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        let _ = self.input_tx.try_send(BackendInput::Resize { cols, rows });
    }

    /// `None` before the child has been forked, or if spawning failed.
    pub fn child_pid(&self) -> Option<u32> {
        let pid = self.child_pid.load(std::sync::atomic::Ordering::Acquire);
        if pid == 0 {
            None
        } else {
            Some(pid)
        }
    }

    /// Best-effort graceful-then-forced termination of the child.
    pub fn close(&self) {
        if let Some(pid) = self.child_pid() {
            spawn::terminate(pid);
        }
    }
}

/// Spawn `spec` under a pseudo-terminal. Returns immediately; output and
/// exit are delivered asynchronously over the returned channels.
pub fn start(spec: PtySpawnSpec) -> (PtyHandle, mpsc::Receiver<Bytes>, oneshot::Receiver<PtyExit>) {
    let (output_tx, output_rx) = mpsc::channel(256);
    let (input_tx, input_rx) = mpsc::channel(256);
    let (exit_tx, exit_rx) = oneshot::channel();
    let child_pid = Arc::new(AtomicU32::new(0));

    tokio::spawn(spawn::run(spec, output_tx, input_rx, exit_tx, Arc::clone(&child_pid)));

    (PtyHandle { input_tx, child_pid }, output_rx, exit_rx)
}
