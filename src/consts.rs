//! Tunables for the daemon and client loops.
//!
//! This is the crate's entire "configuration surface" beyond two
//! environment-variable overrides (see `registry::runtime_root` and
//! `registry::app_prefix`): no config file, no schema to version.
use std::time::Duration;

/// Maximum payload carried by a single read from the PTY (and the
/// client's stdin) before it is framed as a DATA message.
pub const BUF_SIZE: usize = 1024 * 8;

/// Largest payload this implementation will accept in a single frame.
/// Anything bigger is a protocol violation and closes the connection.
pub const MAX_PAYLOAD: u32 = 1024 * 1024;

/// Hard cap on simultaneously attached clients per session.
pub const MAX_CLIENTS: usize = 16;

/// How long the server loop blocks in a single poll() call.
pub const SERVER_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// How long the client loop blocks in a single poll() call.
pub const CLIENT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Time budget for a freshly accepted client to send its HELLO.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(2);

/// Receive timeout applied to a client once it has completed HELLO.
pub const CLIENT_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// How long the server will wait for a blocked client write to drain
/// before giving up and detaching the client.
pub const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long `create`'s grandparent polls for the socket file to appear.
pub const SOCKET_APPEAR_TIMEOUT: Duration = Duration::from_secs(1);
pub const SOCKET_APPEAR_POLL: Duration = Duration::from_millis(50);

/// How long `open` waits after launching a fresh daemon before attaching.
pub const OPEN_CREATE_SETTLE: Duration = Duration::from_millis(100);

/// How long `kill` polls for the daemon to exit before escalating signals.
pub const KILL_POLL_TIMEOUT: Duration = Duration::from_secs(1);
pub const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Delay used between each step while escalating signals during daemon
/// shutdown: SIGHUP, then (if still alive) SIGTERM, then SIGKILL.
pub const SHUTDOWN_SIGNAL_WAIT: Duration = Duration::from_millis(75);

/// Ctrl+\, scanned byte-wise in the client's stdin stream.
pub const DETACH_BYTE: u8 = 0x1c;

/// Fallback window size when the client has no controlling terminal.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// Identifies this implementation in `info --json`'s `backend` field.
pub const BACKEND_ID: &str = "shoal";

/// Environment variable that overrides the registry's root directory
/// (defaults to the system temp dir). Used by the test harness to keep
/// each test hermetic.
pub const RUNTIME_DIR_ENV: &str = "SHOAL_RUNTIME_DIR";

/// Environment variable that overrides the app-prefix component of the
/// registry directory name (defaults to [`BACKEND_ID`]).
pub const PREFIX_ENV: &str = "SHOAL_PREFIX";
