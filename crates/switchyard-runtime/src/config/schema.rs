//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SwitchyardConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// How payloads are received and dispatched.
    #[serde(default)]
    pub listener: ListenerConfig,
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the level name as accepted by filter directives.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to the matching `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line, abbreviated.
    #[default]
    Compact,
    /// Single-line with every field.
    Full,
    /// Multi-line, human oriented.
    Pretty,
    /// Newline-delimited JSON. Needs the `json-log` feature.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Write to `LoggingConfig::file_path`.
    File,
}

/// When a log file is rolled over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events produce log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, required when `output` is `file`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Include thread ids in each line.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line in each line.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-target overrides, e.g. `switchyard_core = "trace"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}

// =============================================================================
// Listener
// =============================================================================

/// Payload intake and dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Enables verbose per-payload logging in sources that support it.
    #[serde(default)]
    pub debug: bool,

    /// How long shutdown waits for in-flight dispatches, in milliseconds.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Pull delivery. Used when no webhook is configured.
    #[serde(default)]
    pub polling: Option<PollingConfig>,

    /// Push delivery. Takes precedence over polling.
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            debug: false,
            drain_timeout_ms: default_drain_timeout_ms(),
            polling: Some(PollingConfig::default()),
            webhook: None,
        }
    }
}

impl ListenerConfig {
    /// The shutdown drain window.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// The delivery mode this configuration selects, if any.
    pub fn delivery(&self) -> Option<Delivery<'_>> {
        match (&self.webhook, &self.polling) {
            (Some(webhook), _) => Some(Delivery::Webhook(webhook)),
            (None, Some(polling)) => Some(Delivery::Polling(polling)),
            (None, None) => None,
        }
    }
}

fn default_drain_timeout_ms() -> u64 {
    5000
}

/// The delivery mode picked from a [`ListenerConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Delivery<'a> {
    Polling(&'a PollingConfig),
    Webhook(&'a WebhookConfig),
}

/// Long-polling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// First payload identifier to request.
    #[serde(default)]
    pub offset: i64,

    /// Server-side wait per poll, in seconds. Zero means short polling.
    #[serde(default = "default_poll_timeout_secs")]
    pub timeout_secs: u64,

    /// Pause after an empty batch, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            offset: 0,
            timeout_secs: default_poll_timeout_secs(),
            interval_ms: default_poll_interval_ms(),
        }
    }
}

impl PollingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Webhook settings, consumed by push-style sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Public URL the upstream service posts payloads to.
    pub url: String,

    /// Path to a self-signed certificate to upload with the registration.
    #[serde(default)]
    pub certificate: Option<PathBuf>,

    /// Local socket the webhook server binds.
    #[serde(default)]
    pub listen: ListenConfig,
}

impl WebhookConfig {
    /// The request path of `url`, always starting with `/`.
    pub fn path(&self) -> &str {
        let rest = self
            .url
            .split_once("://")
            .map_or(self.url.as_str(), |(_, rest)| rest);
        match rest.find('/') {
            Some(start) => {
                let path = &rest[start..];
                path.split(['?', '#']).next().unwrap_or(path)
            }
            None => "/",
        }
    }
}

/// A local bind address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_addr")]
    pub addr: String,

    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Serve HTTPS with these files instead of plain HTTP.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: default_listen_addr(),
            port: default_listen_port(),
            tls: None,
        }
    }
}

impl ListenConfig {
    /// `addr:port`, ready for a socket bind.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8443
}

/// Certificate and private key for a TLS listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}
