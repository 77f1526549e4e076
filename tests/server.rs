//! Lifecycle tests for the plain HTTP modes.

mod common;

use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use nihao::http::{ActivationError, Server, SocketActivation};
use nihao::ServerError;
use tokio::sync::Notify;

use common::{hello_router, local_config, PreboundActivation};

/// Activation source that always fails and counts how often it was asked.
#[derive(Clone, Default)]
struct FailingActivation {
    attempts: Arc<AtomicUsize>,
}

impl SocketActivation for FailingActivation {
    fn listeners(&self) -> Result<Vec<TcpListener>, ActivationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ActivationError::InvalidFdCount("garbage".to_string()))
    }
}

/// Router whose `/slow` handler signals `entered` and then takes `delay`.
fn slow_router(entered: Arc<Notify>, delay: Duration) -> Router {
    Router::new().route(
        "/slow",
        get(move || {
            let entered = entered.clone();
            async move {
                entered.notify_one();
                tokio::time::sleep(delay).await;
                "done"
            }
        }),
    )
}

#[tokio::test]
async fn test_start_serves_hello_and_shuts_down() {
    let mut server = Server::new(local_config(), hello_router());
    server.start().await.unwrap();

    let addr = server.local_addr().expect("server should be listening");
    let response = reqwest::get(format!("http://{}/hello", addr)).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json; charset=UTF-8"
    );
    assert!(response.headers().contains_key("x-request-id"));
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "你好, Metaverse!");

    server.shutdown(Duration::from_secs(3)).await.unwrap();
    assert!(server.last_error().is_none());
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let mut server = Server::new(local_config(), hello_router());
    server.start().await.unwrap();

    let addr = server.local_addr().unwrap();
    let response = reqwest::get(format!("http://{}/goodbye", addr)).await.unwrap();
    assert_eq!(response.status(), 404);

    server.shutdown(Duration::from_secs(3)).await.unwrap();
}

#[tokio::test]
async fn test_out_of_range_port_fails_start() {
    let mut config = local_config();
    config.port = "1000000".to_string();
    let mut server = Server::new(config, hello_router());

    let err = server.start().await.unwrap_err();
    assert!(matches!(err, ServerError::InvalidPort(ref port) if port == "1000000"));
    assert!(err.to_string().contains("1000000"));

    let last = server.last_error().expect("failure should be recorded");
    assert!(last.message.contains("invalid port"));
}

#[tokio::test]
async fn test_port_in_use_fails_start() {
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = local_config();
    config.port = taken.local_addr().unwrap().port().to_string();
    let mut server = Server::new(config, hello_router());

    let err = server.start().await.unwrap_err();
    assert!(matches!(err, ServerError::Serve { .. }));

    // The loop keeps retrying in the background after reporting the failure.
    assert!(server.is_running());
    assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));

    server.shutdown(Duration::from_secs(1)).await.unwrap();
    drop(taken);
}

#[tokio::test]
async fn test_serves_on_activated_socket() {
    let prebound = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = prebound.local_addr().unwrap();

    let mut server = Server::new(local_config(), hello_router())
        .with_activation(PreboundActivation::new(prebound));
    server.start().await.unwrap();
    assert_eq!(server.local_addr(), Some(addr));

    let response = reqwest::get(format!("http://{}/hello", addr)).await.unwrap();
    assert_eq!(response.status(), 200);

    server.shutdown(Duration::from_secs(3)).await.unwrap();
}

#[tokio::test]
async fn test_discovery_failure_retries_with_delay() {
    let activation = FailingActivation::default();
    let attempts = Arc::clone(&activation.attempts);

    let mut server = Server::new(local_config(), hello_router()).with_activation(activation);

    // Discovery errors are only logged, so start sees no outcome in its window.
    server.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // ~550ms at a 100ms delay: a handful of attempts, not a busy loop.
    let seen = attempts.load(Ordering::SeqCst);
    assert!(seen >= 3, "expected repeated attempts, saw {}", seen);
    assert!(seen <= 10, "retry delay not honoured, saw {} attempts", seen);
    assert!(server.is_running());
    assert!(server.last_error().is_none());
    assert!(server.local_addr().is_none());

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_request() {
    let entered = Arc::new(Notify::new());
    let mut server = Server::new(
        local_config(),
        slow_router(Arc::clone(&entered), Duration::from_millis(300)),
    );
    server.start().await.unwrap();

    let url = format!("http://{}/slow", server.local_addr().unwrap());
    let request = tokio::spawn(async move { reqwest::get(url).await?.text().await });
    entered.notified().await;

    server.shutdown(Duration::from_secs(3)).await.unwrap();

    let body = request.await.unwrap().unwrap();
    assert_eq!(body, "done");
}

#[tokio::test]
async fn test_shutdown_with_expired_deadline_times_out() {
    let entered = Arc::new(Notify::new());
    let mut server = Server::new(
        local_config(),
        slow_router(Arc::clone(&entered), Duration::from_secs(2)),
    );
    server.start().await.unwrap();

    let url = format!("http://{}/slow", server.local_addr().unwrap());
    let _request = tokio::spawn(async move { reqwest::get(url).await });
    entered.notified().await;

    let err = server.shutdown(Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, ServerError::ShutdownTimeout(_)));
}

#[tokio::test]
async fn test_shutdown_with_expired_deadline_closes_idle_connections() {
    let mut server = Server::new(local_config(), hello_router());
    server.start().await.unwrap();

    // The pooled client keeps its connection open and idle after the response.
    let client = reqwest::Client::new();
    let url = format!("http://{}/hello", server.local_addr().unwrap());
    let response = client.get(url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    response.text().await.unwrap();

    server.shutdown(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn test_slow_request_times_out() {
    let mut config = local_config();
    config.request_timeout_seconds = 1;
    let entered = Arc::new(Notify::new());
    let mut server = Server::new(config, slow_router(entered, Duration::from_secs(3)));
    server.start().await.unwrap();

    let url = format!("http://{}/slow", server.local_addr().unwrap());
    let response = reqwest::get(url).await.unwrap();
    assert_eq!(response.status(), 408);

    server.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_retry_loop() {
    let mut server = Server::new(local_config(), hello_router());
    server.start().await.unwrap();

    server.shutdown(Duration::from_secs(3)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!server.is_running());
}

#[tokio::test]
async fn test_resume_after_shutdown_rebinds() {
    let mut config = local_config();
    config.resume_after_shutdown = true;
    let mut server = Server::new(config, hello_router());
    server.start().await.unwrap();

    server.shutdown(Duration::from_secs(3)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(server.is_running());
    let second = server.local_addr().unwrap();
    let response = reqwest::get(format!("http://{}/hello", second)).await.unwrap();
    assert_eq!(response.status(), 200);
}
