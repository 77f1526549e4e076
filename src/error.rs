use std::io;
use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by the server lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("the tls {kind} \"{}\" does not exist or is not a file", .path.display())]
    TlsFile { kind: &'static str, path: PathBuf },

    #[error("invalid tls {kind} \"{}\": {reason}", .path.display())]
    TlsMaterial {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("invalid port \"{0}\"")]
    InvalidPort(String),

    #[error("unable to resolve listen address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server on {addr} failed: {source}")]
    Serve {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("server is already running")]
    AlreadyStarted,

    #[error("in-flight requests did not finish within {0:?}")]
    ShutdownTimeout(Duration),
}
