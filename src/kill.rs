//! `kill`: terminate a session's daemon, escalating signals if it
//! doesn't respond, and clean up its registry files either way.
use anyhow::Result;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::info;

use crate::{consts, name, registry};

pub fn run(session_name: &str) -> Result<()> {
    name::validate(session_name)?;

    let pid = match registry::read_pid(session_name)? {
        Some(pid) => pid,
        None => {
            registry::cleanup(session_name);
            eprintln!("no such session: '{}'", session_name);
            std::process::exit(1);
        }
    };

    if signal::kill(Pid::from_raw(pid), None).is_err() {
        registry::cleanup(session_name);
        eprintln!("session '{}' was not running; cleaned up stale files", session_name);
        std::process::exit(1);
    }

    let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
    let deadline = std::time::Instant::now() + consts::KILL_POLL_TIMEOUT;
    while std::time::Instant::now() < deadline {
        if signal::kill(Pid::from_raw(pid), None).is_err() {
            registry::cleanup(session_name);
            info!(session = session_name, "killed");
            return Ok(());
        }
        std::thread::sleep(consts::KILL_POLL_INTERVAL);
    }

    let _ = signal::kill(Pid::from_raw(pid), Signal::SIGKILL);
    registry::cleanup(session_name);
    info!(session = session_name, "killed (escalated to SIGKILL)");
    Ok(())
}
