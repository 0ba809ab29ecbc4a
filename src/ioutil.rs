//! Small I/O helpers shared by the server and client loops.
//!
//! The design deliberately keeps an asymmetry explicit: the PTY master is
//! non-blocking so a single slow read never stalls the event loop, while
//! client sockets stay blocking with receive/send timeouts, because their
//! payloads are small and their hang-up semantics are exactly what the
//! loop wants. `write_all_nonblocking` is the only place that pokes at a
//! non-blocking fd with a retry loop; everything else goes through a
//! timeout already installed on the socket.
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::unistd;

/// Overall budget for draining a write to a non-blocking fd (the PTY
/// master). Bounded so a wedged child process can't hang the loop
/// forever; in practice shells always drain their PTY promptly.
const NONBLOCKING_WRITE_BUDGET: Duration = Duration::from_secs(2);

/// Writes `buf` to a non-blocking fd in full, retrying on `EAGAIN` by
/// waiting for the fd to become writable. Used to forward client
/// keystrokes into the PTY master.
pub fn write_all_nonblocking(fd: RawFd, buf: &[u8]) -> Result<()> {
    let deadline = Instant::now() + NONBLOCKING_WRITE_BUDGET;
    let mut written = 0usize;
    while written < buf.len() {
        match unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, &buf[written..]) {
            Ok(n) => written += n,
            Err(Errno::EAGAIN) => {
                if Instant::now() >= deadline {
                    return Err(anyhow!("timed out waiting for fd {} to become writable", fd));
                }
                let mut fds = [PollFd::new(
                    unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
                    PollFlags::POLLOUT,
                )];
                nix::poll::poll(&mut fds, PollTimeout::from(100u16))
                    .context("polling for writability")?;
            }
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e).context("writing to fd"),
        }
    }
    Ok(())
}

/// Reads up to `buf.len()` bytes from a non-blocking fd. Returns `Ok(0)`
/// on EOF, propagates `EAGAIN` as `Ok(None)` so the caller's poll loop
/// can move on without busy-looping, and everything else as an error.
pub fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> Result<Option<usize>> {
    loop {
        match unistd::read(fd, buf) {
            Ok(n) => return Ok(Some(n)),
            Err(Errno::EAGAIN) => return Ok(None),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e).context("reading from fd"),
        }
    }
}
