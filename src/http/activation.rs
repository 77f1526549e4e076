//! Socket activation discovery.
//!
//! A process supervisor (systemd, `systemd-socket-activate`) can open the
//! listening socket itself and hand it to the server as an inherited file
//! descriptor. The server loop asks a [`SocketActivation`] for such listeners
//! on every attempt and binds its own socket when none are provided.

use std::net::TcpListener;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

/// First inherited descriptor in the systemd protocol (after stdin/out/err).
pub const LISTEN_FDS_START: i32 = 3;

const ENV_LISTEN_PID: &str = "LISTEN_PID";
const ENV_LISTEN_FDS: &str = "LISTEN_FDS";

/// Set once the process environment has been consulted for descriptors.
static ENV_CLAIMED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("LISTEN_PID is not a valid process id: {0:?}")]
    InvalidPid(String),

    #[error("LISTEN_FDS is not a valid descriptor count: {0:?}")]
    InvalidFdCount(String),

    #[error("inherited descriptor {fd} is not a listening TCP socket: {source}")]
    NotASocket {
        fd: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("socket activation is unavailable: {0}")]
    Unavailable(String),
}

/// Source of pre-opened listening sockets.
pub trait SocketActivation: Send + Sync {
    /// Returns the listeners handed over by the supervisor, or an empty list
    /// when the process was not socket activated.
    fn listeners(&self) -> Result<Vec<TcpListener>, ActivationError>;
}

/// Reads listeners from the systemd `LISTEN_PID` / `LISTEN_FDS` protocol.
///
/// The environment is only read, never modified. Inherited descriptors are
/// claimed on the first call in the process; every later call reports no
/// listeners and the server falls back to binding.
pub struct SystemdActivation {
    lookup: fn(&str) -> Option<String>,
    claimed: &'static AtomicBool,
}

impl Default for SystemdActivation {
    fn default() -> Self {
        Self {
            lookup: |name| std::env::var(name).ok(),
            claimed: &ENV_CLAIMED,
        }
    }
}

impl std::fmt::Debug for SystemdActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemdActivation")
            .field("claimed", &self.claimed.load(Ordering::Acquire))
            .finish()
    }
}

impl SystemdActivation {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SocketActivation for SystemdActivation {
    fn listeners(&self) -> Result<Vec<TcpListener>, ActivationError> {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return Ok(Vec::new());
        }

        let listen_pid = (self.lookup)(ENV_LISTEN_PID);
        let listen_fds = (self.lookup)(ENV_LISTEN_FDS);

        let fds = parse_listen_env(
            listen_pid.as_deref(),
            listen_fds.as_deref(),
            std::process::id(),
        )?;

        fds.map(adopt_listener).collect()
    }
}

/// Decode the activation environment into the range of inherited fds.
///
/// Missing variables, or a `LISTEN_PID` meant for another process, yield an
/// empty range.
pub fn parse_listen_env(
    listen_pid: Option<&str>,
    listen_fds: Option<&str>,
    own_pid: u32,
) -> Result<Range<i32>, ActivationError> {
    let empty = LISTEN_FDS_START..LISTEN_FDS_START;

    let (Some(pid), Some(fds)) = (listen_pid, listen_fds) else {
        return Ok(empty);
    };

    let pid: u32 = pid
        .trim()
        .parse()
        .map_err(|_| ActivationError::InvalidPid(pid.to_string()))?;
    if pid != own_pid {
        tracing::debug!(listen_pid = pid, own_pid, "LISTEN_PID targets another process");
        return Ok(empty);
    }

    let count: i32 = fds
        .trim()
        .parse()
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| ActivationError::InvalidFdCount(fds.to_string()))?;

    Ok(LISTEN_FDS_START..LISTEN_FDS_START + count)
}

#[cfg(unix)]
fn adopt_listener(fd: i32) -> Result<TcpListener, ActivationError> {
    use std::os::fd::FromRawFd;

    // SAFETY: the supervisor passed this descriptor to us and the claim flag
    // guarantees it is adopted at most once in this process.
    let listener = unsafe { TcpListener::from_raw_fd(fd) };
    match listener.local_addr() {
        Ok(addr) => {
            tracing::debug!(fd, %addr, "Adopted activated socket");
            Ok(listener)
        }
        Err(source) => Err(ActivationError::NotASocket { fd, source }),
    }
}

#[cfg(not(unix))]
fn adopt_listener(fd: i32) -> Result<TcpListener, ActivationError> {
    Err(ActivationError::Unavailable(format!(
        "cannot adopt descriptor {} on this platform",
        fd
    )))
}
