//! Daemonization and the create/open entry points that turn a session
//! name into a running (or freshly started) server.
use std::os::unix::io::AsRawFd;

use anyhow::{bail, Context, Result};
use nix::unistd::{self, ForkResult};
use tracing::{debug, info};

pub mod server;
pub mod shell;
pub mod signals;
pub mod user;

use crate::{consts, name, registry};

/// Validates `session_name`, refuses if a live daemon already owns it,
/// double-forks a detached daemon process running [`server::run`], and
/// waits briefly for its control socket to appear before returning.
///
/// The wait is advisory only: the grandparent always reports success
/// once it has forked off the daemon, even if the socket is slow to
/// appear. Callers that need a hard guarantee should re-poll the
/// registry themselves.
pub fn create(session_name: &str, cmd: Option<String>) -> Result<()> {
    name::validate(session_name)?;

    if registry::is_live(session_name) {
        bail!("session '{}' is already running", session_name);
    }
    if registry::sock_path(session_name).exists() {
        debug!(session = session_name, "removing stale registry files before create");
        registry::cleanup(session_name);
    }
    registry::ensure_dir()?;

    match unsafe { unistd::fork() }.context("forking daemonization first child")? {
        ForkResult::Parent { .. } => {
            wait_for_socket(session_name);
            Ok(())
        }
        ForkResult::Child => daemonize_and_serve(session_name, cmd),
    }
}

/// First child: detach from the controlling terminal and session, then
/// fork again so the final daemon is not a session leader (and so the
/// original `create` caller's wait in the first child returns promptly).
fn daemonize_and_serve(session_name: &str, cmd: Option<String>) -> ! {
    if unistd::setsid().is_err() {
        std::process::exit(1);
    }

    match unsafe { unistd::fork() } {
        Ok(ForkResult::Parent { .. }) => std::process::exit(0),
        Ok(ForkResult::Child) => {}
        Err(_) => std::process::exit(1),
    }

    redirect_stdio_to_null();

    let exit_code = match server::run(session_name, cmd) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("daemon for '{}' failed: {:?}", session_name, e);
            1
        }
    };
    std::process::exit(exit_code);
}

fn redirect_stdio_to_null() {
    if let Ok(null) = std::fs::OpenOptions::new().read(true).write(true).open("/dev/null") {
        let fd = null.as_raw_fd();
        for target in [0, 1, 2] {
            let _ = unistd::dup2(fd, target);
        }
    }
}

fn wait_for_socket(session_name: &str) {
    let path = registry::sock_path(session_name);
    let deadline = std::time::Instant::now() + consts::SOCKET_APPEAR_TIMEOUT;
    while std::time::Instant::now() < deadline {
        if path.exists() {
            return;
        }
        std::thread::sleep(consts::SOCKET_APPEAR_POLL);
    }
}

/// Attaches to `session_name` if a live daemon already owns it; if the
/// registry holds stale files for it, cleans those up and creates
/// fresh; otherwise creates from scratch. Either way, settles briefly
/// before handing off to [`crate::attach::run`].
pub fn open(session_name: &str, cmd: Option<String>) -> Result<i32> {
    name::validate(session_name)?;

    if registry::is_live(session_name) {
        info!(session = session_name, "attaching to existing session");
        return crate::attach::run(session_name);
    }

    if registry::sock_path(session_name).exists() {
        debug!(session = session_name, "found stale session, recreating");
        registry::cleanup(session_name);
    }

    create(session_name, cmd)?;
    std::thread::sleep(consts::OPEN_CREATE_SETTLE);
    crate::attach::run(session_name)
}
