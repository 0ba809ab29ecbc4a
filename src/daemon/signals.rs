//! Process-wide signal state for the server loop.
//!
//! The server's multiplexing wait is plain synchronous code; the only
//! place that needs asynchronous signal awareness is "did the child
//! exit" and "were we asked to shut down". Rather than threading that
//! context through the signal plumbing (signal handlers cannot capture
//! closures), we model it as a narrow file-scope singleton: a handful of
//! atomics that [`install`] initializes once per daemon process before
//! the event loop starts, and that the handlers below only ever touch
//! through those atomics. Initialization order is an invariant: `install`
//! must run before the child is forked, so the handler is never live
//! with a stale or absent child pid.
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use anyhow::{Context, Result};
use nix::sys::signal::{self, SigHandler, Signal};

static RUNNING: AtomicBool = AtomicBool::new(true);
static CHILD_PID: AtomicI32 = AtomicI32::new(0);
static CHILD_REAPED: AtomicBool = AtomicBool::new(false);
static EXIT_CODE: AtomicI32 = AtomicI32::new(-1);

/// Installs SIGCHLD/SIGTERM handlers and arms the singleton for
/// `child_pid`. Must be called exactly once, after the child shell has
/// been forked and before the server loop begins polling.
pub fn install(child_pid: i32) -> Result<()> {
    CHILD_PID.store(child_pid, Ordering::SeqCst);
    RUNNING.store(true, Ordering::SeqCst);
    CHILD_REAPED.store(false, Ordering::SeqCst);
    EXIT_CODE.store(-1, Ordering::SeqCst);

    unsafe {
        signal::signal(Signal::SIGCHLD, SigHandler::Handler(handle_sigchld))
            .context("installing SIGCHLD handler")?;
        signal::signal(Signal::SIGTERM, SigHandler::Handler(handle_sigterm))
            .context("installing SIGTERM handler")?;
        // A dead client must never be able to kill the daemon via a
        // write into a closed socket.
        signal::signal(Signal::SIGPIPE, SigHandler::SigIgn).context("ignoring SIGPIPE")?;
    }

    Ok(())
}

/// Whether the server loop should keep running. Cleared by SIGTERM or
/// once the child has been reaped.
pub fn is_running() -> bool {
    RUNNING.load(Ordering::SeqCst)
}

/// Requests an orderly shutdown, e.g. after the PTY read side hits EOF.
pub fn request_stop() {
    RUNNING.store(false, Ordering::SeqCst);
}

/// Returns the child's exit code if SIGCHLD has already reaped it.
/// The code is captured exactly once: here if the signal handler won
/// the race, otherwise by [`record_exit_code`] in the shutdown-phase
/// wait.
pub fn reaped_exit_code() -> Option<i32> {
    if CHILD_REAPED.load(Ordering::SeqCst) {
        Some(EXIT_CODE.load(Ordering::SeqCst))
    } else {
        None
    }
}

/// Records the child's exit code from the shutdown-phase `waitpid`, but
/// only if the signal handler did not already capture it. Keeps the
/// "captured exactly once" invariant even when both paths race.
pub fn record_exit_code(code: i32) {
    if !CHILD_REAPED.swap(true, Ordering::SeqCst) {
        EXIT_CODE.store(code, Ordering::SeqCst);
    }
}

extern "C" fn handle_sigchld(_signo: libc::c_int) {
    let pid = CHILD_PID.load(Ordering::SeqCst);
    if pid <= 0 {
        return;
    }

    let mut status: libc::c_int = 0;
    // SAFETY: waitpid is async-signal-safe; status is stack-local.
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if ret != pid {
        return;
    }

    let code = if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        // Stopped or continued, not a real exit; nothing to record yet.
        return;
    };

    if !CHILD_REAPED.swap(true, Ordering::SeqCst) {
        EXIT_CODE.store(code, Ordering::SeqCst);
    }
    RUNNING.store(false, Ordering::SeqCst);
}

extern "C" fn handle_sigterm(_signo: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}
