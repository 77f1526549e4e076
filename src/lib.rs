//! nihao: a minimal HTTP/HTTPS API server.
//!
//! Serves a single JSON endpoint with socket activation, TLS, retry on
//! failure and graceful shutdown. The interesting part is
//! [`http::Server`], which owns the serving lifecycle.

pub mod config;
pub mod error;
pub mod files;
pub mod http;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::ServerError;
