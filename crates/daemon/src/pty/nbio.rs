// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::io::unix::AsyncFd;

/// Newtype so we can implement `AsRawFd` for the owned PTY master fd.
pub struct PtyFd(pub OwnedFd);

impl AsRawFd for PtyFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

pub fn set_nonblocking(fd: RawFd) -> nix::Result<()> {
    // SAFETY: `fd` is borrowed only for the duration of these two calls and
    // remains owned by the caller.
    #[allow(unsafe_code)]
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let flags = fcntl(borrowed, FcntlArg::F_GETFL)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(borrowed, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Read up to `buf.len()` bytes, waiting for readability and retrying on
/// `EWOULDBLOCK`/`EAGAIN`. Returns `Ok(0)` on EOF.
pub async fn read_chunk(afd: &AsyncFd<PtyFd>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| {
            let fd = inner.get_ref().as_raw_fd();
            // SAFETY: `fd` is borrowed only for the duration of this call and
            // remains owned by `inner`.
            #[allow(unsafe_code)]
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            match nix::unistd::read(borrowed, buf) {
                Ok(n) => Ok(n),
                Err(Errno::EWOULDBLOCK) => Err(io::ErrorKind::WouldBlock.into()),
                Err(e) => Err(io_err(e)),
            }
        }) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

/// Write the full buffer, retrying on `EWOULDBLOCK`/`EAGAIN` and partial writes.
pub async fn write_all(afd: &AsyncFd<PtyFd>, data: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        let mut guard = afd.writable().await?;
        let written = match guard.try_io(|inner| {
            let fd = inner.get_ref().as_raw_fd();
            // SAFETY: `fd` is borrowed only for the duration of this call and
            // remains owned by `inner`.
            #[allow(unsafe_code)]
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            match nix::unistd::write(borrowed, &data[offset..]) {
                Ok(n) => Ok(n),
                Err(Errno::EWOULDBLOCK) => Err(io::ErrorKind::WouldBlock.into()),
                Err(e) => Err(io_err(e)),
            }
        }) {
            Ok(result) => result?,
            Err(_would_block) => continue,
        };
        offset += written;
    }
    Ok(())
}

fn io_err(e: Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
