//! PTY creation and the child shell that becomes a session's controlling
//! process.
use std::ffi::CString;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use anyhow::{Context, Result};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{openpty, Winsize};
use nix::unistd::{self, ForkResult, Pid};

/// A freshly forked session: the PTY master (kept in the daemon, set
/// non-blocking) and the pid of the child shell.
pub struct Session {
    pub master: OwnedFd,
    pub child: Pid,
}

/// Creates a PTY and forks the controlling shell as its child.
///
/// The shell is `$SHELL` if set, else `/bin/bash`, invoked with `-l`
/// (login) and, if `cmd` is given, `-c <cmd>`. Exec failure in the child
/// writes to stderr (already redirected to the slave PTY at that point)
/// and exits with code 127, matching a real shell's convention for
/// "command not found".
pub fn spawn(cmd: Option<&str>) -> Result<Session> {
    let pty = openpty(None, None).context("opening pty")?;

    match unsafe { unistd::fork() }.context("forking child shell")? {
        ForkResult::Child => {
            drop(pty.master);
            child_main(pty.slave, cmd);
            // child_main never returns normally.
        }
        ForkResult::Parent { child } => {
            drop(pty.slave);
            set_nonblocking(pty.master.as_raw_fd()).context("setting pty master non-blocking")?;
            Ok(Session { master: pty.master, child })
        }
    }
}

fn child_main(slave: OwnedFd, cmd: Option<&str>) -> ! {
    let slave_fd = slave.as_raw_fd();

    if unistd::setsid().is_err() {
        std::process::exit(127);
    }
    unsafe {
        libc::ioctl(slave_fd, libc::TIOCSCTTY as libc::c_ulong, 0);
    }

    for fd in [0, 1, 2] {
        if unistd::dup2(slave_fd, fd).is_err() {
            std::process::exit(127);
        }
    }
    if slave_fd > 2 {
        drop(slave);
    } else {
        std::mem::forget(slave);
    }

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
    let shell_c = match CString::new(shell.clone()) {
        Ok(c) => c,
        Err(_) => std::process::exit(127),
    };

    let mut args: Vec<CString> = vec![shell_c.clone(), cstr("-l")];
    if let Some(cmd) = cmd {
        args.push(cstr("-c"));
        args.push(match CString::new(cmd) {
            Ok(c) => c,
            Err(_) => std::process::exit(127),
        });
    }

    let _ = unistd::execvp(&shell_c, &args);
    eprintln!("shoal: exec of {} failed", shell);
    std::process::exit(127);
}

fn cstr(s: &str) -> CString {
    CString::new(s).expect("static string has no interior NUL")
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).context("F_GETFL")?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags)).context("F_SETFL O_NONBLOCK")?;
    Ok(())
}

/// Applies a window size to the PTY via `TIOCSWINSZ`, used both for the
/// HELLO handshake and every subsequent WINCH.
pub fn set_window_size(master_fd: RawFd, cols: u16, rows: u16) -> Result<()> {
    let ws = Winsize { ws_row: rows, ws_col: cols, ws_xpixel: 0, ws_ypixel: 0 };
    let ret = unsafe { libc::ioctl(master_fd, libc::TIOCSWINSZ, &ws as *const Winsize) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error()).context("TIOCSWINSZ");
    }
    Ok(())
}
