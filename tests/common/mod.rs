//! Shared helpers for the integration tests.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Mutex;

use axum::Router;
use nihao::config::{AppConfig, HttpServerConfig};
use nihao::http::{ActivationError, SocketActivation};
use nihao::routes::create_router;
use nihao::state::AppState;

/// Plain HTTP on an ephemeral loopback port with a short retry delay.
pub fn local_config() -> HttpServerConfig {
    let mut config = HttpServerConfig::new("127.0.0.1", "0");
    config.retry_delay_ms = 100;
    config
}

/// The production router with default configuration.
pub fn hello_router() -> Router {
    create_router(AppState::new(AppConfig::default()))
}

/// Absolute path of a file under `tests/data`.
#[allow(dead_code)]
pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(relative)
}

/// Hands out one pre-bound listener, then nothing.
pub struct PreboundActivation(Mutex<Option<TcpListener>>);

impl PreboundActivation {
    pub fn new(listener: TcpListener) -> Self {
        Self(Mutex::new(Some(listener)))
    }
}

impl SocketActivation for PreboundActivation {
    fn listeners(&self) -> Result<Vec<TcpListener>, ActivationError> {
        Ok(self.0.lock().unwrap().take().into_iter().collect())
    }
}
