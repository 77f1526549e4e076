//! Termination signal handling.
//!
//! Handles SIGINT (Ctrl+C) and SIGTERM. The caller decides what to do once
//! a signal arrives; nothing here touches the server.

use std::fmt;

/// The signal that asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Wait until SIGINT or SIGTERM is received.
///
/// Fails only if a signal handler cannot be installed.
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    let terminate = async move {
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok(ShutdownSignal::Interrupt)
        }
        _ = terminate => Ok(ShutdownSignal::Terminate),
    }
}
