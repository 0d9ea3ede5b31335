// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use nix::pty::{forkpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::pty::ForkptyResult;
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::{mpsc, oneshot};

use super::nbio::{self, PtyFd};
use super::{BackendInput, PtySpawnSpec, PtyExit};

/// Spawn `spec` under a pseudo-terminal and drive it until exit.
///
/// Per spec §4.1, this never returns an `Err`: a `forkpty`/`execvp` failure
/// is reported as a synthetic exit (`code=None, signal=None,
/// error=Some(text)`) over `exit_tx`, matching the contract the broker
/// depends on (`start()` always yields a handle; failures surface as exits,
/// not constructor errors).
pub async fn run(
    spec: PtySpawnSpec,
    output_tx: mpsc::Sender<Bytes>,
    mut input_rx: mpsc::Receiver<BackendInput>,
    exit_tx: oneshot::Sender<PtyExit>,
    child_pid_slot: Arc<std::sync::atomic::AtomicU32>,
) {
    let winsize = Winsize { ws_row: spec.rows, ws_col: spec.cols, ws_xpixel: 0, ws_ypixel: 0 };

    // SAFETY: forkpty's child-side restrictions (async-signal-safety) are
    // honored below: the child only calls execvp, which is one of the few
    // functions safe to call post-fork before exec.
    #[allow(unsafe_code)]
    let fork_result = unsafe { forkpty(&winsize, None) };

    let fork_result = match fork_result {
        Ok(r) => r,
        Err(e) => {
            let _ = exit_tx.send(PtyExit {
                code: None,
                signal: None,
                error: Some(format!("forkpty failed: {e}")),
            });
            return;
        }
    };

    match fork_result {
        ForkptyResult::Child => {
            apply_child_env(&spec);
            let prog = CString::new(spec.command.clone()).unwrap_or_default();
            let args: Vec<CString> =
                std::iter::once(prog.clone())
                    .chain(spec.args.iter().map(|a| CString::new(a.as_str()).unwrap_or_default()))
                    .collect();
            let _ = execvp(&prog, &args);
            // execvp only returns on failure; there is nothing safe left to
            // do but terminate this process image immediately.
            std::process::exit(127);
        }
        ForkptyResult::Parent { child, master } => {
            child_pid_slot.store(child.as_raw() as u32, Ordering::Release);

            let master_fd = master;
            if let Err(e) = nbio::set_nonblocking(std::os::fd::AsRawFd::as_raw_fd(&master_fd)) {
                let _ = exit_tx.send(PtyExit {
                    code: None,
                    signal: None,
                    error: Some(format!("failed to set nonblocking: {e}")),
                });
                return;
            }
            let afd = match AsyncFd::new(PtyFd(master_fd)) {
                Ok(afd) => afd,
                Err(e) => {
                    let _ = exit_tx.send(PtyExit {
                        code: None,
                        signal: None,
                        error: Some(format!("failed to register pty fd: {e}")),
                    });
                    return;
                }
            };

            let exit = drive(&afd, child, &mut input_rx, &output_tx).await;
            let _ = exit_tx.send(exit);
        }
    }
}

async fn drive(
    afd: &AsyncFd<PtyFd>,
    child: Pid,
    input_rx: &mut mpsc::Receiver<BackendInput>,
    output_tx: &mpsc::Sender<Bytes>,
) -> PtyExit {
    let mut buf = [0u8; 32 * 1024];
    loop {
        tokio::select! {
            read = nbio::read_chunk(afd, &mut buf) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if output_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            break;
                        }
                    }
                    Err(_eio) => break,
                }
            }
            input = input_rx.recv() => {
                match input {
                    Some(BackendInput::Write(data)) => {
                        if nbio::write_all(afd, &data).await.is_err() {
                            break;
                        }
                    }
                    Some(BackendInput::Resize { cols, rows }) => {
                        let _ = resize_raw(afd, cols, rows);
                    }
                    None => break,
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || wait_for_exit(child)).await.unwrap_or(PtyExit {
        code: None,
        signal: None,
        error: Some("wait task panicked".into()),
    })
}

fn apply_child_env(spec: &PtySpawnSpec) {
    if let Some(cwd) = &spec.cwd {
        let _ = std::env::set_current_dir(cwd);
    }
    for (k, v) in &spec.env {
        std::env::set_var(k, v);
    }
    std::env::set_var("TERM", spec.term.as_deref().unwrap_or("xterm-256color"));
}

fn resize_raw(afd: &AsyncFd<PtyFd>, cols: u16, rows: u16) -> nix::Result<()> {
    use std::os::fd::AsRawFd;
    let winsize = Winsize { ws_row: rows, ws_col: cols, ws_xpixel: 0, ws_ypixel: 0 };
    #[allow(unsafe_code)]
    let rc = unsafe {
        nix::libc::ioctl(afd.get_ref().as_raw_fd(), nix::libc::TIOCSWINSZ, &winsize as *const Winsize)
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(nix::errno::Errno::last())
    }
}

fn wait_for_exit(pid: Pid) -> PtyExit {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return PtyExit { code: Some(code), signal: None, error: None }
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return PtyExit { code: None, signal: Some(signal as i32), error: None }
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return PtyExit { code: None, signal: None, error: Some(e.to_string()) },
        }
    }
}

/// Best-effort graceful-then-forced termination, used when the broker closes
/// a session or the daemon shuts down.
pub fn terminate(pid: u32) {
    let pid = Pid::from_raw(pid as i32);
    let _ = kill(pid, Signal::SIGHUP);
    std::thread::sleep(std::time::Duration::from_millis(50));
    let _ = kill(pid, Signal::SIGKILL);
    let _ = waitpid(pid, Some(nix::sys::wait::WaitPidFlag::WNOHANG));
}
