//! The client loop: connects to a session's socket, pipes the terminal
//! through it, and handles local detach.
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use anyhow::{Context, Result};
use nix::poll::{PollFd, PollFlags, PollTimeout};
use tracing::{debug, info};

use crate::protocol::{Message, MsgType};
use crate::{consts, name, registry, tty};

/// Connects to `session_name`'s socket and runs the attach loop until
/// the remote shell exits or the user detaches. Returns the process
/// exit code to use (the shell's, on a clean EXIT; 0 on detach).
pub fn run(session_name: &str) -> Result<i32> {
    name::validate(session_name)?;

    let sock_path = registry::sock_path(session_name);
    let mut stream = UnixStream::connect(&sock_path)
        .with_context(|| format!("connecting to session '{}'", session_name))?;

    let (cols, rows) = tty::window_size();
    Message::hello(cols, rows).write_to(&mut stream).context("sending HELLO")?;

    let raw_guard = tty::enable_raw_mode().context("switching terminal to raw mode")?;
    tty::install_winch_handler().context("installing SIGWINCH handler")?;

    info!(session = session_name, "attached");
    let result = client_loop(session_name, &mut stream, raw_guard.is_tty());
    drop(raw_guard);

    result
}

fn client_loop(session_name: &str, stream: &mut UnixStream, is_tty: bool) -> Result<i32> {
    stream
        .set_read_timeout(Some(consts::CLIENT_POLL_TIMEOUT))
        .context("setting socket read timeout")?;

    let stdin_fd = std::io::stdin().as_raw_fd();
    let mut stdin_buf = [0u8; consts::BUF_SIZE];

    loop {
        if is_tty && tty::take_winch() {
            let (cols, rows) = tty::window_size();
            let _ = Message::winch(cols, rows).write_to(stream);
        }

        let stream_fd = stream.as_raw_fd();
        let mut pollfds = [
            PollFd::new(unsafe { std::os::fd::BorrowedFd::borrow_raw(stdin_fd) }, PollFlags::POLLIN),
            PollFd::new(unsafe { std::os::fd::BorrowedFd::borrow_raw(stream_fd) }, PollFlags::POLLIN),
        ];
        match nix::poll::poll(&mut pollfds, PollTimeout::from(consts::CLIENT_POLL_TIMEOUT.as_millis().min(u16::MAX as u128) as u16)) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(e).context("polling stdin/socket"),
        }

        if pollfds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)) {
            let n = std::io::stdin().read(&mut stdin_buf).context("reading stdin")?;
            if n == 0 {
                continue;
            }
            if stdin_buf[..n].contains(&consts::DETACH_BYTE) {
                let _ = Message::detach().write_to(stream);
                eprint!("\r\n[detached from '{}']\r\n", session_name);
                return Ok(0);
            }
            if Message::data(&stdin_buf[..n]).write_to(stream).is_err() {
                debug!("write to session socket failed, ending loop");
                return Ok(1);
            }
        }

        if pollfds[1].revents().is_some_and(|r| !r.is_empty()) {
            match Message::read_from(stream) {
                Ok(msg) => match msg.ty {
                    MsgType::Data => {
                        std::io::stdout().write_all(&msg.payload).context("writing to stdout")?;
                        std::io::stdout().flush().ok();
                    }
                    MsgType::Exit => {
                        let code = msg.payload.first().copied().unwrap_or(0) as i32;
                        return Ok(code);
                    }
                    MsgType::Winch | MsgType::Hello | MsgType::Detach => {}
                },
                Err(e) => {
                    debug!("session socket closed: {:?}", e);
                    return Ok(1);
                }
            }
        }
    }
}
