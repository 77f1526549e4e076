//! HTTP route handlers.
//!
//! The API exposes a single endpoint. Request tracing is enabled via
//! middleware that generates a unique request ID for each incoming request,
//! allowing correlation of all logs within a request.

pub mod hello;

use axum::{middleware, routing::get, Router};

use crate::middleware::request_id_layer;
use crate::state::AppState;

/// Creates the Axum router with the API routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/hello", get(hello::hello))
        .with_state(state)
        // Request ID middleware - creates root span with request_id for correlation
        .layer(middleware::from_fn(request_id_layer))
}
