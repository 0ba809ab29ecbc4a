//! The single-threaded event loop that owns a session's PTY and
//! multiplexes it between zero or more attached clients.
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::daemon::{shell, signals};
use crate::protocol::{Message, MsgType};
use crate::{consts, registry};

struct Client {
    stream: UnixStream,
}

/// Runs a session's daemon loop to completion, returning the child
/// shell's exit code. Called from within the already-daemonized process
/// (the double fork has already happened by the time this runs).
pub fn run(name: &str, cmd: Option<String>) -> Result<i32> {
    let sock_path = registry::sock_path(name);
    registry::check_sock_path_fits(&sock_path)?;

    let session = shell::spawn(cmd.as_deref()).context("spawning child shell")?;
    let master_fd = session.master.as_raw_fd();

    signals::install(session.child.as_raw()).context("installing signal handlers")?;

    let listener = UnixListener::bind(&sock_path)
        .with_context(|| format!("binding control socket {:?}", sock_path))?;
    std::fs::set_permissions(&sock_path, std::fs::Permissions::from_mode(0o600))
        .context("chmod 0600 control socket")?;

    let created = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
    let cmd_str = cmd.clone().unwrap_or_else(|| "bash".to_string());
    registry::write_pid(name, std::process::id() as i32).context("writing pid file")?;
    registry::write_info(name, std::process::id() as i32, 0, created, &cmd_str)
        .context("writing info file")?;

    info!(session = name, child = session.child.as_raw(), "daemon listening");

    let mut clients: Vec<Client> = Vec::new();
    let reaped = event_loop(&listener, master_fd, &mut clients, name);

    let exit_code = shutdown(session.child, reaped, &mut clients);

    registry::cleanup(name);
    info!(session = name, exit_code, "daemon exited");
    Ok(exit_code)
}

fn event_loop(listener: &UnixListener, master_fd: RawFd, clients: &mut Vec<Client>, name: &str) -> Option<i32> {
    // SAFETY: master_fd is owned by `run`'s `session` for the whole loop.
    let master_borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(master_fd) };

    loop {
        if !signals::is_running() {
            return signals::reaped_exit_code();
        }

        let mut pollfds: Vec<PollFd> = Vec::with_capacity(2 + clients.len());
        pollfds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
        pollfds.push(PollFd::new(master_borrowed, PollFlags::POLLIN));
        for c in clients.iter() {
            pollfds.push(PollFd::new(c.stream.as_fd(), PollFlags::POLLIN));
        }

        let timeout_ms: u16 = consts::SERVER_POLL_TIMEOUT.as_millis().min(u16::MAX as u128) as u16;
        match nix::poll::poll(&mut pollfds, PollTimeout::from(timeout_ms)) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                warn!("poll failed: {:?}", e);
                return signals::reaped_exit_code();
            }
        }

        // Copy out the flags we need before dropping `pollfds`: its
        // entries borrow each client's stream, which blocks the mutable
        // access (accept/remove) the rest of this iteration needs.
        let listener_ready = pollfds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN));
        let master_ready = pollfds[1].revents().is_some_and(|r| !r.is_empty());
        let client_revents: Vec<PollFlags> =
            pollfds[2..].iter().map(|p| p.revents().unwrap_or(PollFlags::empty())).collect();
        drop(pollfds);

        if !signals::is_running() {
            return signals::reaped_exit_code();
        }

        if listener_ready {
            accept_client(listener, master_fd, clients, name);
        }

        if master_ready && !handle_pty_readable(master_fd, clients, name) {
            signals::request_stop();
        }

        for i in (0..clients.len()).rev() {
            let revents = client_revents.get(i).copied().unwrap_or(PollFlags::empty());
            let ready = revents.contains(PollFlags::POLLIN)
                || revents.contains(PollFlags::POLLHUP)
                || revents.contains(PollFlags::POLLERR);
            if ready && !handle_client_readable(master_fd, &mut clients[i]) {
                clients.remove(i);
                write_client_count(name, clients.len());
            }
        }
    }
}

fn accept_client(listener: &UnixListener, master_fd: RawFd, clients: &mut Vec<Client>, name: &str) {
    let (mut stream, _addr) = match listener.accept() {
        Ok(pair) => pair,
        Err(e) => {
            warn!("accept failed: {:?}", e);
            return;
        }
    };

    if clients.len() >= consts::MAX_CLIENTS {
        debug!("rejecting client: at the {} client limit", consts::MAX_CLIENTS);
        return;
    }

    if stream.set_read_timeout(Some(consts::HELLO_TIMEOUT)).is_err()
        || stream.set_write_timeout(Some(consts::CLIENT_WRITE_TIMEOUT)).is_err()
    {
        warn!("setting handshake timeouts on new client");
        return;
    }

    let hello = match Message::read_from(&mut stream) {
        Ok(m) => m,
        Err(e) => {
            debug!("client handshake failed: {:?}", e);
            return;
        }
    };
    if hello.ty != MsgType::Hello {
        debug!("client's first message was not HELLO, closing");
        return;
    }
    let (cols, rows) = match hello.window_size() {
        Ok(wh) => wh,
        Err(e) => {
            debug!("malformed HELLO payload: {:?}", e);
            return;
        }
    };
    let _ = shell::set_window_size(master_fd, cols, rows);

    if stream.set_read_timeout(Some(consts::CLIENT_RECV_TIMEOUT)).is_err() {
        warn!("relaxing client read timeout after handshake");
        return;
    }

    clients.push(Client { stream });
    write_client_count(name, clients.len());
}

fn write_client_count(name: &str, clients: usize) {
    if let Ok(Some(record)) = registry::find(name) {
        let _ = registry::write_info(name, record.pid, clients as u32, record.created, &record.cmd);
    }
}

/// Reads up to `BUF_SIZE` from the PTY master and broadcasts it as DATA
/// to every attached client. Returns `false` on EOF or a non-retryable
/// read error, signaling the caller to begin shutdown.
fn handle_pty_readable(master_fd: RawFd, clients: &mut Vec<Client>, name: &str) -> bool {
    let mut buf = [0u8; consts::BUF_SIZE];
    match crate::ioutil::read_nonblocking(master_fd, &mut buf) {
        Ok(Some(0)) => false,
        Ok(Some(n)) => {
            if broadcast(clients, &Message::data(&buf[..n])) {
                write_client_count(name, clients.len());
            }
            true
        }
        Ok(None) => true,
        Err(e) => {
            debug!("pty read error, ending session: {:?}", e);
            false
        }
    }
}

/// Delivers one message to every attached client. Iterates in reverse so
/// that removing a client mid-broadcast (a write that cannot complete
/// within the write timeout) is index-safe. Returns whether any client
/// was dropped, so the caller can rewrite the info file's client count.
fn broadcast(clients: &mut Vec<Client>, msg: &Message) -> bool {
    let mut dropped = false;
    for i in (0..clients.len()).rev() {
        if msg.write_to(&mut clients[i].stream).is_err() {
            clients.remove(i);
            dropped = true;
        }
    }
    dropped
}

/// Decodes and applies exactly one frame from a client. Returns `false`
/// if the client should be detached (decode failure, hang-up, or an
/// explicit DETACH).
fn handle_client_readable(master_fd: RawFd, client: &mut Client) -> bool {
    let msg = match Message::read_from(&mut client.stream) {
        Ok(m) => m,
        Err(e) => {
            debug!("client decode failure, detaching: {:?}", e);
            return false;
        }
    };

    match msg.ty {
        MsgType::Data => {
            if let Err(e) = crate::ioutil::write_all_nonblocking(master_fd, &msg.payload) {
                warn!("writing client data to pty: {:?}", e);
            }
            true
        }
        MsgType::Winch => {
            if let Ok((cols, rows)) = msg.window_size() {
                let _ = shell::set_window_size(master_fd, cols, rows);
            }
            true
        }
        MsgType::Detach => false,
        MsgType::Hello | MsgType::Exit => true,
    }
}

/// Escalates SIGHUP -> SIGTERM -> SIGKILL against the child if it is
/// still alive, captures its exit code exactly once, broadcasts EXIT to
/// every remaining client, and closes them out.
fn shutdown(child: Pid, reaped_code: Option<i32>, clients: &mut Vec<Client>) -> i32 {
    if reaped_code.is_none() {
        for sig in [Signal::SIGHUP, Signal::SIGTERM, Signal::SIGKILL] {
            if signal::kill(child, None).is_err() {
                break; // already gone
            }
            let _ = signal::kill(child, sig);
            match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => std::thread::sleep(consts::SHUTDOWN_SIGNAL_WAIT),
                _ => break,
            }
        }
    }

    let exit_code = reaped_code.or_else(signals::reaped_exit_code).unwrap_or_else(|| {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => code,
            Ok(WaitStatus::Signaled(_, sig, _)) => 128 + sig as i32,
            _ => 1,
        }
    });
    signals::record_exit_code(exit_code);

    broadcast(clients, &Message::exit(exit_code as u8));
    clients.clear();

    exit_code
}
