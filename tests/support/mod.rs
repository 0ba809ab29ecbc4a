// Shared helpers for the integration tests, compiled separately into
// each test binary. Not every binary uses all of it.
#![allow(dead_code)]

use std::io::{self, BufRead, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use serde_json::Value;
use tempfile::TempDir;

pub fn shoal_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_shoal"))
}

/// An isolated registry directory + app-prefix so concurrent test runs
/// never see each other's sessions, paired with a helper to build
/// pre-wired `Command`s against it.
pub struct Env {
    _runtime_dir: TempDir,
    runtime_dir_path: PathBuf,
    prefix: String,
}

impl Env {
    pub fn new() -> Result<Env> {
        let runtime_dir = tempfile::Builder::new()
            .prefix("shoal-test")
            .tempdir()
            .context("creating isolated runtime dir")?;
        let suffix: u32 = rand::thread_rng().gen();
        Ok(Env {
            runtime_dir_path: runtime_dir.path().to_path_buf(),
            _runtime_dir: runtime_dir,
            prefix: format!("shoal-test-{:x}", suffix),
        })
    }

    pub fn cmd(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(shoal_bin());
        cmd.env("SHOAL_RUNTIME_DIR", &self.runtime_dir_path);
        cmd.env("SHOAL_PREFIX", &self.prefix);
        cmd.args(args);
        cmd
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.runtime_dir_path.join(format!("{}-{}", self.prefix, nix::unistd::getuid()))
    }

    pub fn run(&self, args: &[&str]) -> Result<Output> {
        self.cmd(args).stdin(Stdio::null()).output().context("running shoal subcommand")
    }

    pub fn create(&self, name: &str) -> Result<Output> {
        self.run(&["create", name])
    }

    pub fn list_json(&self) -> Result<Value> {
        let out = self.run(&["list", "--json"])?;
        anyhow::ensure!(out.status.success(), "list --json exited non-zero");
        serde_json::from_slice(&out.stdout).context("parsing list --json output")
    }

    pub fn kill(&self, name: &str) -> Result<Output> {
        self.run(&["kill", name])
    }

    pub fn attach(&self, name: &str) -> Result<AttachProc> {
        let mut proc = self
            .cmd(&["attach", name])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning attach to '{}'", name))?;

        let stdout = proc.stdout.take().ok_or_else(|| anyhow!("missing stdout"))?;
        nix::fcntl::fcntl(stdout.as_raw_fd(), nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK))
            .context("setting attach stdout non-blocking")?;

        Ok(AttachProc { proc, out: io::BufReader::new(stdout) })
    }

    /// Polls `list --json` until `name` appears (or times out).
    pub fn wait_for_session(&self, name: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(doc) = self.list_json() {
                if has_session(&doc, name) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(anyhow!("timed out waiting for session '{}' to appear", name));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    /// Polls `list --json` until `name` is absent (or times out).
    pub fn wait_for_gone(&self, name: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(doc) = self.list_json() {
                if !has_session(&doc, name) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(anyhow!("timed out waiting for session '{}' to go away", name));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

pub fn has_session(list_doc: &Value, name: &str) -> bool {
    list_doc["sessions"]
        .as_array()
        .map(|sessions| sessions.iter().any(|s| s["name"] == name))
        .unwrap_or(false)
}

pub fn session_field<'a>(list_doc: &'a Value, name: &str, field: &str) -> Option<&'a Value> {
    list_doc["sessions"].as_array()?.iter().find(|s| s["name"] == name).map(|s| &s[field])
}

/// A running `shoal attach` child process with line-oriented assertions
/// on its stdout.
pub struct AttachProc {
    proc: Child,
    out: io::BufReader<std::process::ChildStdout>,
}

const LINE_TIMEOUT: Duration = Duration::from_secs(3);
const LINE_POLL: Duration = Duration::from_millis(20);

impl AttachProc {
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        let stdin = self.proc.stdin.as_mut().ok_or_else(|| anyhow!("missing stdin"))?;
        writeln!(stdin, "{}", line).context("writing to attach stdin")?;
        stdin.flush().context("flushing attach stdin")?;
        Ok(())
    }

    pub fn send_detach(&mut self) -> Result<()> {
        let stdin = self.proc.stdin.as_mut().ok_or_else(|| anyhow!("missing stdin"))?;
        stdin.write_all(&[0x1c]).context("writing detach byte")?;
        stdin.flush().context("flushing attach stdin")?;
        Ok(())
    }

    /// Blocks (polling around the non-blocking fd) until a line matching
    /// `needle` shows up in stdout, or `LINE_TIMEOUT` elapses.
    pub fn expect_line_containing(&mut self, needle: &str) -> Result<()> {
        let start = Instant::now();
        loop {
            let mut line = String::new();
            match self.out.read_line(&mut line) {
                Ok(0) => return Err(anyhow!("attach proc stdout hit EOF waiting for {:?}", needle)),
                Ok(_) => {
                    if line.contains(needle) {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e).context("reading attach stdout"),
            }
            if start.elapsed() > LINE_TIMEOUT {
                return Err(anyhow!("timed out waiting for line containing {:?}", needle));
            }
            std::thread::sleep(LINE_POLL);
        }
    }

    pub fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.proc.wait().context("waiting for attach proc")
    }
}

impl Drop for AttachProc {
    fn drop(&mut self) {
        let _ = self.proc.kill();
        let _ = self.proc.wait();
    }
}
