//! Terminal-mode plumbing for the client loop: raw mode, window-size
//! queries, and a SIGWINCH handler that flags the main loop without
//! doing any work inside the signal itself.
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
use nix::unistd::isatty;

use crate::consts;

/// Switches stdin to raw mode for the duration of the client loop,
/// restoring the saved settings on drop. A no-op (and `is_tty() ==
/// false`) when stdin is not actually a terminal, e.g. under a test
/// harness piping bytes through a socket pair.
pub struct RawModeGuard {
    fd: RawFd,
    saved: Option<Termios>,
}

impl RawModeGuard {
    pub fn is_tty(&self) -> bool {
        self.saved.is_some()
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            let _ = termios::tcsetattr(
                unsafe { std::os::fd::BorrowedFd::borrow_raw(self.fd) },
                SetArg::TCSANOW,
                &saved,
            );
        }
    }
}

/// Enables raw mode on stdin: no echo, no canonical line buffering, no
/// signal-generating control characters passed through to the client
/// process (the remote shell handles its own job-control signals).
pub fn enable_raw_mode() -> Result<RawModeGuard> {
    let fd = std::io::stdin().as_raw_fd();
    if !isatty(fd).unwrap_or(false) {
        return Ok(RawModeGuard { fd, saved: None });
    }

    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
    let saved = termios::tcgetattr(borrowed).context("reading terminal attributes")?;
    let mut raw = saved.clone();
    termios::cfmakeraw(&mut raw);
    raw.local_flags.remove(LocalFlags::ISIG);
    termios::tcsetattr(borrowed, SetArg::TCSANOW, &raw).context("setting raw mode")?;

    Ok(RawModeGuard { fd, saved: Some(saved) })
}

/// Reads the controlling terminal's current size via `TIOCGWINSZ`,
/// falling back to a default 80x24 when stdout is not a tty
/// (piped output, a test harness, etc.).
pub fn window_size() -> (u16, u16) {
    let fd = std::io::stdout().as_raw_fd();
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut ws as *mut libc::winsize) };
    if ret != 0 || ws.ws_col == 0 || ws.ws_row == 0 {
        return (consts::DEFAULT_COLS, consts::DEFAULT_ROWS);
    }
    (ws.ws_col, ws.ws_row)
}

static WINCH_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Installs a `SIGWINCH` handler that only sets a flag; the client loop
/// polls [`take_winch`] once per iteration rather than doing any real
/// work from signal context.
pub fn install_winch_handler() -> Result<()> {
    unsafe {
        nix::sys::signal::signal(nix::sys::signal::Signal::SIGWINCH, nix::sys::signal::SigHandler::Handler(handle_winch))
            .context("installing SIGWINCH handler")?;
    }
    Ok(())
}

extern "C" fn handle_winch(_signo: libc::c_int) {
    WINCH_RECEIVED.store(true, Ordering::SeqCst);
}

/// Clears and returns whether a window-change signal arrived since the
/// last call.
pub fn take_winch() -> bool {
    WINCH_RECEIVED.swap(false, Ordering::SeqCst)
}
