//! HTTP/HTTPS server lifecycle.
//!
//! A [`Server`] owns a background task that serves the router, either on a
//! socket handed over by the process supervisor or on one it binds itself.
//! When serving ends for any reason the task records the error, waits the
//! retry delay and tries again, until [`Server::shutdown`] stops it.
//!
//! Four serving modes exist, chosen fresh on every attempt:
//! - **TLS, activated**: HTTPS on the inherited socket
//! - **TLS, bound**: HTTPS on the configured address
//! - **Plain, activated**: HTTP on the inherited socket
//! - **Plain, bound**: HTTP on the configured address

use std::future::Future;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::routing::IntoMakeService;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use chrono::{DateTime, Utc};
use http::StatusCode;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;

use crate::config::{HttpServerConfig, TlsConfig, SHUTDOWN_POLL_INTERVAL_MS};
use crate::error::ServerError;
use crate::files;
use crate::middleware::{track_in_flight, InFlight};

use super::activation::{SocketActivation, SystemdActivation};
use super::tls::load_rustls_config;

/// Most recent serving failure. Each failure replaces the previous one.
#[derive(Debug, Clone)]
pub struct LastError {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// How a single serving attempt obtains its socket and whether it speaks TLS.
#[derive(Debug)]
pub enum ServingMode {
    TlsActivated(TcpListener),
    TlsBound,
    PlainActivated(TcpListener),
    PlainBound,
}

impl ServingMode {
    pub fn select(tls: bool, activated: Option<TcpListener>) -> Self {
        match (tls, activated) {
            (true, Some(listener)) => Self::TlsActivated(listener),
            (true, None) => Self::TlsBound,
            (false, Some(listener)) => Self::PlainActivated(listener),
            (false, None) => Self::PlainBound,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::TlsActivated(_) => "https server with socket activation",
            Self::TlsBound => "https server without socket activation",
            Self::PlainActivated(_) => "http server with socket activation",
            Self::PlainBound => "http server without socket activation",
        }
    }

    pub fn is_activated(&self) -> bool {
        matches!(self, Self::TlsActivated(_) | Self::PlainActivated(_))
    }
}

/// First outcome of the serving loop, handed back to `start`.
type StartupReport = oneshot::Sender<Result<SocketAddr, ServerError>>;

/// State shared between the `Server` and its background loop.
struct Shared {
    handle: Mutex<Handle>,
    last_error: Mutex<Option<LastError>>,
    local_addr: Mutex<Option<SocketAddr>>,
    in_flight: InFlight,
    stop: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn current_handle(&self) -> Handle {
        lock(&self.handle).clone()
    }

    fn set_handle(&self, handle: Handle) {
        *lock(&self.handle) = handle;
    }

    fn record_error(&self, error: &ServerError) {
        *lock(&self.last_error) = Some(LastError {
            message: error.to_string(),
            at: Utc::now(),
        });
    }

    fn set_local_addr(&self, addr: SocketAddr) {
        *lock(&self.local_addr) = Some(addr);
    }

    fn is_stopping(&self) -> bool {
        *self.stop.borrow()
    }
}

/// The API server.
///
/// Built from configuration and a router, started with [`Server::start`] and
/// stopped with [`Server::shutdown`]. Dropping the server aborts its
/// background loop.
pub struct Server {
    config: Arc<HttpServerConfig>,
    app: Router,
    activation: Arc<dyn SocketActivation>,
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl Server {
    /// Create a server. Nothing is validated or bound until `start`.
    pub fn new(config: HttpServerConfig, router: Router) -> Self {
        let in_flight = InFlight::default();
        let app = router
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                config.request_timeout(),
            ))
            .layer(axum::middleware::from_fn_with_state(
                in_flight.clone(),
                track_in_flight,
            ));
        let (stop, _) = watch::channel(false);

        Self {
            config: Arc::new(config),
            app,
            activation: Arc::new(SystemdActivation::new()),
            shared: Arc::new(Shared {
                handle: Mutex::new(Handle::new()),
                last_error: Mutex::new(None),
                local_addr: Mutex::new(None),
                in_flight,
                stop,
            }),
            task: None,
        }
    }

    /// Replace the socket activation source (systemd by default).
    pub fn with_activation(mut self, activation: impl SocketActivation + 'static) -> Self {
        self.activation = Arc::new(activation);
        self
    }

    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// Start serving in the background.
    ///
    /// TLS files are checked first; a missing or non-regular file fails
    /// immediately and nothing is spawned. Otherwise the serving loop is
    /// spawned and this waits up to the startup grace period for the first
    /// bind to succeed or fail. A failure inside that window is returned;
    /// anything later is only logged while the loop keeps retrying.
    ///
    /// A returned serving error does not stop the loop: it keeps retrying in
    /// the background, so calling `start` again yields
    /// `ServerError::AlreadyStarted` until `shutdown` ends the loop.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        if self.is_running() {
            return Err(ServerError::AlreadyStarted);
        }

        if self.config.tls.enabled {
            validate_tls_files(&self.config.tls)?;
        }

        self.shared.stop.send_replace(false);

        let (report_tx, report_rx) = oneshot::channel();
        let serve_loop = ServeLoop {
            config: Arc::clone(&self.config),
            app: self.app.clone(),
            activation: Arc::clone(&self.activation),
            shared: Arc::clone(&self.shared),
            startup: Some(report_tx),
        };
        self.task = Some(tokio::spawn(serve_loop.run()));

        let grace = self.config.startup_grace();
        match tokio::time::timeout(grace, report_rx).await {
            Ok(Ok(Ok(addr))) => {
                tracing::info!(%addr, "{} server is ready", self.config.scheme_label());
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) | Err(_) => {
                tracing::debug!(
                    grace_ms = grace.as_millis() as u64,
                    "No startup outcome within grace period, serving continues in background"
                );
                Ok(())
            }
        }
    }

    /// Gracefully stop serving.
    ///
    /// New connections are refused, idle keep-alive connections are closed
    /// and in-flight requests get until `deadline` to finish. If requests are
    /// still running at the deadline their connections are closed and
    /// `ServerError::ShutdownTimeout` is returned. Unless
    /// `resume_after_shutdown` is configured, the retry loop ends as well.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        if !self.config.resume_after_shutdown {
            self.shared.stop.send_replace(true);
        }

        let handle = self.shared.current_handle();
        let in_flight = &self.shared.in_flight;
        tracing::info!(
            deadline_ms = deadline.as_millis() as u64,
            connections = handle.connection_count(),
            requests = in_flight.count(),
            "Graceful shutdown initiated"
        );
        handle.graceful_shutdown(Some(deadline));

        let drained = async {
            while in_flight.count() > 0 {
                tokio::time::sleep(Duration::from_millis(SHUTDOWN_POLL_INTERVAL_MS)).await;
            }
        };

        match tokio::time::timeout(deadline, drained).await {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(
                    remaining = in_flight.count(),
                    "Requests still in flight at shutdown deadline"
                );
                Err(ServerError::ShutdownTimeout(deadline))
            }
        }
    }

    /// True while the background loop is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn last_error(&self) -> Option<LastError> {
        lock(&self.shared.last_error).clone()
    }

    /// Address of the most recent successful bind.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.shared.local_addr)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Check that the certificate and key are existing regular files.
fn validate_tls_files(tls: &TlsConfig) -> Result<(), ServerError> {
    for (kind, path) in [("cert", &tls.cert_path), ("key", &tls.key_path)] {
        if !(files::path_exists(path) && files::is_file(path)) {
            return Err(ServerError::TlsFile {
                kind,
                path: path.clone(),
            });
        }
    }
    Ok(())
}

/// The background retry loop.
struct ServeLoop {
    config: Arc<HttpServerConfig>,
    app: Router,
    activation: Arc<dyn SocketActivation>,
    shared: Arc<Shared>,
    startup: Option<StartupReport>,
}

impl ServeLoop {
    async fn run(mut self) {
        let label = self.config.scheme_label();
        let mut stop = self.shared.stop.subscribe();

        tracing::info!(
            host = %self.config.host,
            port = %self.config.port,
            "{} server will listen at {}:{}",
            label,
            self.config.host,
            self.config.port
        );

        loop {
            if self.shared.is_stopping() {
                break;
            }

            let listeners = match self.activation.listeners() {
                Ok(listeners) => listeners,
                Err(e) => {
                    tracing::error!(error = %e, "Unable to activate listeners");
                    if self.pause(&mut stop).await {
                        break;
                    }
                    continue;
                }
            };

            let activated = listeners.into_iter().next();
            if activated.is_none() {
                tracing::warn!(
                    "No socket was activated. Make sure the systemd socket is active, either \
                     through a .socket unit or manually with systemd-socket-activate. The \
                     server will continue to run without socket activation."
                );
            }

            let mode = ServingMode::select(self.config.tls.enabled, activated);
            tracing::info!(activated = mode.is_activated(), "Launching the {}", mode.describe());

            let handle = Handle::new();
            self.shared.set_handle(handle.clone());
            if self.shared.is_stopping() {
                break;
            }

            if let Err(e) = self.serve(mode, handle).await {
                self.shared.record_error(&e);
                tracing::warn!(error = %e, "{} server returned an error", label);
                if let Some(report) = self.startup.take() {
                    let _ = report.send(Err(e));
                }
            }

            tracing::warn!("{} server stopped running", label);
            if self.pause(&mut stop).await {
                break;
            }
        }

        tracing::info!("{} server loop finished", label);
    }

    /// Wait out the retry delay. Returns true if a stop was requested.
    async fn pause(&self, stop: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.config.retry_delay()) => false,
            _ = async {
                let _ = stop.wait_for(|stopped| *stopped).await;
            } => true,
        }
    }

    /// Serve one attempt until the socket closes or fails.
    async fn serve(&mut self, mode: ServingMode, handle: Handle) -> Result<(), ServerError> {
        let app: IntoMakeService<Router> = self.app.clone().into_make_service();

        match mode {
            ServingMode::TlsActivated(listener) => {
                let addr = prepare_activated(&listener)?;
                let tls = self.load_tls()?;
                let serving = axum_server::from_tcp_rustls(listener, tls)
                    .handle(handle.clone())
                    .serve(app);
                self.await_serving(serving, &handle, addr).await
            }
            ServingMode::TlsBound => {
                let addr = self.resolve_addr().await?;
                let tls = self.load_tls()?;
                let serving = axum_server::bind_rustls(addr, tls)
                    .handle(handle.clone())
                    .serve(app);
                self.await_serving(serving, &handle, addr.to_string()).await
            }
            ServingMode::PlainActivated(listener) => {
                let addr = prepare_activated(&listener)?;
                let serving = axum_server::from_tcp(listener)
                    .handle(handle.clone())
                    .serve(app);
                self.await_serving(serving, &handle, addr).await
            }
            ServingMode::PlainBound => {
                let addr = self.resolve_addr().await?;
                let serving = axum_server::bind(addr).handle(handle.clone()).serve(app);
                self.await_serving(serving, &handle, addr.to_string()).await
            }
        }
    }

    /// Drive `serving` to completion, reporting the bound address to `start`
    /// as soon as the socket is listening.
    async fn await_serving<F>(
        &mut self,
        serving: F,
        handle: &Handle,
        addr: String,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = io::Result<()>>,
    {
        tokio::pin!(serving);

        let result = tokio::select! {
            result = &mut serving => result,
            Some(bound) = handle.listening() => {
                self.shared.set_local_addr(bound);
                tracing::info!(addr = %bound, "Listening");
                if let Some(report) = self.startup.take() {
                    let _ = report.send(Ok(bound));
                }
                serving.await
            }
        };

        result.map_err(|source| ServerError::Serve { addr, source })
    }

    async fn resolve_addr(&self) -> Result<SocketAddr, ServerError> {
        let port: u16 = self
            .config
            .port
            .trim()
            .parse()
            .map_err(|_| ServerError::InvalidPort(self.config.port.clone()))?;
        let host = self.config.host.as_str();

        let resolved = tokio::net::lookup_host((host, port)).await.and_then(|mut addrs| {
            addrs
                .next()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses found"))
        });

        resolved.map_err(|source| ServerError::InvalidAddress {
            addr: format!("{}:{}", host, port),
            source,
        })
    }

    fn load_tls(&self) -> Result<RustlsConfig, ServerError> {
        load_rustls_config(&self.config.tls.cert_path, &self.config.tls.key_path)
    }
}

/// Put an inherited listener into the non-blocking mode tokio requires and
/// return its address for logging.
fn prepare_activated(listener: &TcpListener) -> Result<String, ServerError> {
    let addr = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "activated socket".to_string());

    listener
        .set_nonblocking(true)
        .map_err(|source| ServerError::Serve {
            addr: addr.clone(),
            source,
        })?;

    Ok(addr)
}
