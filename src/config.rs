//! Configuration loading and constants.
//!
//! Loads application configuration from TOML files and defines constants for
//! the HTTP listener, lifecycle timings, logging format, and default paths.
//! `AppConfig` is the root configuration struct containing all settings.
//! Every section is optional so the server also runs with no file at all.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// HTTP Listener Defaults
// =============================================================================

/// Default bind host (all interfaces)
pub const DEFAULT_HTTP_HOST: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_HTTP_PORT: &str = "6688";

/// Request timeout in seconds. Long enough not to cut off streaming responses.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 1000;

// =============================================================================
// Lifecycle Timings
// =============================================================================

/// Delay in milliseconds before retrying after a serve failure or failed
/// socket discovery
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3000;

/// How long `Server::start` waits for the first bind to succeed or fail
pub const DEFAULT_STARTUP_GRACE_MS: u64 = 250;

/// Deadline for draining in-flight requests on SIGINT/SIGTERM
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Poll interval while waiting for in-flight requests to drain during shutdown
pub const SHUTDOWN_POLL_INTERVAL_MS: u64 = 20;

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Greeting returned by `GET /hello`
pub const DEFAULT_GREETING: &str = "你好";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "nihao=debug,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub http: HttpServerConfig,
    #[serde(default)]
    pub hello: HelloConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "HttpServerConfig::default_host")]
    pub host: String,
    /// Port as text; parsed and range-checked when the server binds.
    #[serde(default = "HttpServerConfig::default_port")]
    pub port: String,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default = "HttpServerConfig::default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "HttpServerConfig::default_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "HttpServerConfig::default_startup_grace")]
    pub startup_grace_ms: u64,
    #[serde(default = "HttpServerConfig::default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
    /// Keep the retry loop running after a graceful shutdown (default: false)
    #[serde(default)]
    pub resume_after_shutdown: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            tls: TlsConfig::default(),
            request_timeout_seconds: Self::default_request_timeout(),
            retry_delay_ms: Self::default_retry_delay(),
            startup_grace_ms: Self::default_startup_grace(),
            shutdown_timeout_seconds: Self::default_shutdown_timeout(),
            resume_after_shutdown: false,
        }
    }
}

impl HttpServerConfig {
    fn default_host() -> String {
        DEFAULT_HTTP_HOST.to_string()
    }

    fn default_port() -> String {
        DEFAULT_HTTP_PORT.to_string()
    }

    fn default_request_timeout() -> u64 {
        DEFAULT_REQUEST_TIMEOUT_SECS
    }

    fn default_retry_delay() -> u64 {
        DEFAULT_RETRY_DELAY_MS
    }

    fn default_startup_grace() -> u64 {
        DEFAULT_STARTUP_GRACE_MS
    }

    fn default_shutdown_timeout() -> u64 {
        DEFAULT_SHUTDOWN_TIMEOUT_SECS
    }

    /// Plain HTTP on the given host and port, everything else defaulted.
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            ..Self::default()
        }
    }

    /// Enable TLS with the given PEM certificate and key.
    pub fn with_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.tls = TlsConfig {
            enabled: true,
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        };
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    /// "HTTPS" or "HTTP", used in log lines
    pub fn scheme_label(&self) -> &'static str {
        if self.tls.enabled {
            "HTTPS"
        } else {
            "HTTP"
        }
    }
}

/// TLS certificate configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Path to the PEM certificate chain
    #[serde(default)]
    pub cert_path: PathBuf,
    /// Path to the PEM private key
    #[serde(default)]
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelloConfig {
    #[serde(default = "HelloConfig::default_greeting")]
    pub greeting: String,
}

impl Default for HelloConfig {
    fn default() -> Self {
        Self {
            greeting: Self::default_greeting(),
        }
    }
}

impl HelloConfig {
    fn default_greeting() -> String {
        DEFAULT_GREETING.to_string()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let tls = &self.http.tls;
        if tls.enabled && (tls.cert_path.as_os_str().is_empty() || tls.key_path.as_os_str().is_empty()) {
            return Err(ConfigError::Validation(
                "http.tls.enabled requires both cert_path and key_path".to_string(),
            ));
        }

        match self.logging.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "Unknown logging.format \"{}\" (expected \"text\" or \"json\")",
                other
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
