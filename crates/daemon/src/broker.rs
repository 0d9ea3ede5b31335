// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session Broker (C2, spec §4.2).
//!
//! Grounded on `session.rs`'s `select!`-loop-with-documented-ordering style:
//! a single actor task owns the PTY handle, the cursor-keyed backlog, and
//! the attachment table, and all public operations round-trip through a
//! command channel so that "current backlog + latest cursor + exit observed"
//! is always consistent to every caller (spec §4.2 Concurrency). Fan-out
//! uses `try_send` per attachment so a slow attachment can never block the
//! PTY reader task (spec §5 shared-resource policy). Spec §4.2 invariant 1
//! makes no backpressure exception for output delivery (unlike C5's
//! explicit `slow-consumer` clause), so a `try_send` that fails because the
//! queue is full is treated the same as hub.rs treats it: the attachment is
//! dropped outright rather than left to silently miss a chunk.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::backlog::Backlog;
use crate::pty::{self, PtyExit, PtySpawnSpec};

pub type AttachmentId = u64;

/// Delivered to every attachment in broker cursor order; after `Exit` no
/// further `Output` is ever delivered (spec §4.2 invariant 4).
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Output { cursor: u64, data: Bytes },
    Exit(PtyExit),
    /// This attachment's queue overflowed; it has already been dropped from
    /// the broker's fan-out table and will receive nothing further. Distinct
    /// from `Exit`: the PTY itself is still running, only this attachment
    /// fell behind.
    Terminated,
}

enum Command {
    Attach {
        since_cursor: u64,
        reply: oneshot::Sender<(AttachmentId, mpsc::Receiver<BrokerEvent>)>,
    },
    Detach {
        id: AttachmentId,
    },
    Write(Bytes),
    Resize {
        cols: u16,
        rows: u16,
    },
    Close,
    LatestCursor(oneshot::Sender<u64>),
    ChildPid(oneshot::Sender<Option<u32>>),
}

/// A handle to a running broker actor. Cheap to clone; all operations
/// forward to the single owning task.
#[derive(Clone)]
pub struct Broker {
    cmd_tx: mpsc::Sender<Command>,
    latest_cursor_mirror: Arc<AtomicU64>,
}

const ATTACHMENT_QUEUE_LEN: usize = 256;

impl Broker {
    pub fn spawn(spec: PtySpawnSpec, backlog_budget: usize) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let latest_cursor_mirror = Arc::new(AtomicU64::new(0));
        let actor = Actor {
            backlog: Backlog::new(backlog_budget),
            attachments: HashMap::new(),
            next_attachment_id: 1,
            exit: None,
            latest_cursor_mirror: Arc::clone(&latest_cursor_mirror),
        };
        tokio::spawn(actor.run(spec, cmd_rx));
        Self { cmd_tx, latest_cursor_mirror }
    }

    /// Replays backlog entries with `cursor > since_cursor`, then delivers
    /// live output. If the session has already exited, `Exit` is delivered
    /// once immediately after the replay. Never blocks (spec §4.2).
    pub async fn attach(&self, since_cursor: u64) -> (AttachmentId, mpsc::Receiver<BrokerEvent>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Attach { since_cursor, reply: reply_tx })
            .await
            .is_err()
        {
            let (_tx, rx) = mpsc::channel(1);
            return (0, rx);
        }
        reply_rx.await.unwrap_or_else(|_| {
            let (_tx, rx) = mpsc::channel(1);
            (0, rx)
        })
    }

    /// Idempotent; unknown ids no-op.
    pub async fn detach(&self, id: AttachmentId) {
        let _ = self.cmd_tx.send(Command::Detach { id }).await;
    }

    pub async fn write(&self, data: Bytes) {
        let _ = self.cmd_tx.send(Command::Write(data)).await;
    }

    pub async fn resize(&self, cols: u16, rows: u16) {
        let _ = self.cmd_tx.send(Command::Resize { cols, rows }).await;
    }

    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }

    pub async fn child_pid(&self) -> Option<u32> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::ChildPid(tx)).await.is_err() {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Lock-free mirror, safe to poll frequently (e.g. from `session.status`)
    /// without round-tripping through the actor's command channel.
    pub fn latest_cursor(&self) -> u64 {
        self.latest_cursor_mirror.load(Ordering::Relaxed)
    }
}

struct Actor {
    backlog: Backlog,
    attachments: HashMap<AttachmentId, mpsc::Sender<BrokerEvent>>,
    next_attachment_id: AttachmentId,
    exit: Option<PtyExit>,
    latest_cursor_mirror: Arc<AtomicU64>,
}

impl Actor {
    async fn run(mut self, spec: PtySpawnSpec, mut cmd_rx: mpsc::Receiver<Command>) {
        let (handle, mut output_rx, mut exit_rx) = pty::start(spec);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd, &handle),
                        None => break,
                    }
                }
                data = output_rx.recv(), if self.exit.is_none() => {
                    match data {
                        Some(bytes) => self.emit_output(bytes),
                        None => {}
                    }
                }
                exit = &mut exit_rx, if self.exit.is_none() => {
                    if let Ok(exit) = exit {
                        self.emit_exit(exit);
                    }
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command, handle: &pty::PtyHandle) {
        match cmd {
            Command::Attach { since_cursor, reply } => {
                let id = self.next_attachment_id;
                self.next_attachment_id += 1;
                let (tx, rx) = mpsc::channel(ATTACHMENT_QUEUE_LEN);
                for (cursor, data) in self.backlog.replay_since(since_cursor) {
                    let _ = tx.try_send(BrokerEvent::Output { cursor, data });
                }
                if let Some(exit) = &self.exit {
                    let _ = tx.try_send(BrokerEvent::Exit(exit.clone()));
                } else {
                    self.attachments.insert(id, tx);
                }
                let _ = reply.send((id, rx));
            }
            Command::Detach { id } => {
                self.attachments.remove(&id);
            }
            Command::Write(data) => {
                handle.write(data);
            }
            Command::Resize { cols, rows } => {
                handle.resize(cols, rows);
            }
            Command::Close => {
                handle.close();
            }
            Command::LatestCursor(reply) => {
                let _ = reply.send(self.backlog.latest_cursor());
            }
            Command::ChildPid(reply) => {
                let _ = reply.send(handle.child_pid());
            }
        }
    }

    fn emit_output(&mut self, data: Bytes) {
        let cursor = self.backlog.push(data.clone());
        self.latest_cursor_mirror.store(cursor, Ordering::Relaxed);
        let mut terminated = Vec::new();
        for (&id, tx) in self.attachments.iter() {
            if tx.try_send(BrokerEvent::Output { cursor, data: data.clone() }).is_err() {
                terminated.push(id);
            }
        }
        for id in terminated {
            if let Some(tx) = self.attachments.remove(&id) {
                let _ = tx.try_send(BrokerEvent::Terminated);
            }
        }
    }

    fn emit_exit(&mut self, exit: PtyExit) {
        for tx in self.attachments.values() {
            let _ = tx.try_send(BrokerEvent::Exit(exit.clone()));
        }
        self.attachments.clear();
        self.exit = Some(exit);
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
