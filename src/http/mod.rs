//! HTTP server module with TLS and socket activation support.
//!
//! The server serves in one of four modes, picked per serving attempt from
//! two inputs: whether TLS is configured and whether the process supervisor
//! handed over a listening socket.
//!
//! The server includes:
//! - Retry with a fixed delay after any serving failure
//! - Graceful shutdown bounded by a deadline
//! - SIGTERM/SIGINT detection for the binary

pub mod activation;
mod server;
mod signal;
mod tls;

pub use activation::{ActivationError, SocketActivation, SystemdActivation};
pub use server::{LastError, Server, ServingMode};
pub use signal::{wait_for_shutdown_signal, ShutdownSignal};
