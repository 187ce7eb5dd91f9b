//! Gateway configuration.
//!
//! The configuration is owned by the listener lifecycle and replaced as a
//! whole unit at start time. Request handlers never read fields through the
//! live store; they take a [`ConfigStore::snapshot`] once per request so a
//! concurrent mutation can never tear a read.

use hyper::Uri;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 10010;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("port 0 is outside the valid range 1-65535")]
    InvalidPort,
    #[error("invalid backend URL '{url}': {reason}")]
    InvalidBackendUrl { url: String, reason: String },
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Backend requests are proxied to. Empty disables proxying: non-mock
    /// requests are answered with 502.
    #[serde(default)]
    pub backend_url: String,

    /// Main text of the mock stream, newline-delimited into chunks.
    #[serde(default)]
    pub mock_content: String,

    /// Reasoning text of the mock stream, emitted before the content.
    #[serde(default)]
    pub mock_thinking: String,

    /// Comma-separated function names eligible for mocking.
    #[serde(default)]
    pub mock_functions: String,

    #[serde(default = "default_mock_enabled")]
    pub mock_enabled: bool,

    /// Emit bare text lines instead of `data: {...}` events.
    #[serde(default)]
    pub raw_mode: bool,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,

    /// Mirrors the listener lifecycle state; never read from a file.
    #[serde(skip)]
    pub running: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            mock_content: String::new(),
            mock_thinking: String::new(),
            mock_functions: String::new(),
            mock_enabled: default_mock_enabled(),
            raw_mode: false,
            port: default_port(),
            connection_pool: ConnectionPoolConfig::default(),
            running: false,
        }
    }
}

impl GatewayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Reject configurations the listener lifecycle must never see.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if !self.backend_url.is_empty() {
            let uri: Uri = self.backend_url.parse().map_err(|e| {
                ConfigError::InvalidBackendUrl {
                    url: self.backend_url.clone(),
                    reason: format!("{e}"),
                }
            })?;
            if uri.authority().is_none() {
                return Err(ConfigError::InvalidBackendUrl {
                    url: self.backend_url.clone(),
                    reason: "missing host".to_string(),
                });
            }
            match uri.scheme_str() {
                Some("http") | Some("https") => {}
                other => {
                    return Err(ConfigError::InvalidBackendUrl {
                        url: self.backend_url.clone(),
                        reason: format!("unsupported scheme {:?}", other.unwrap_or("")),
                    });
                }
            }
        }
        Ok(())
    }

    /// Exact, trimmed membership of `function` in the comma-separated
    /// allow-list. An empty selector never matches.
    pub fn mock_allows(&self, function: &str) -> bool {
        if function.is_empty() {
            return false;
        }
        self.mock_functions
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .any(|entry| entry == function)
    }
}

/// Settings for the pooled upstream client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionPoolConfig {
    #[serde(default = "default_pool_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(default = "default_pool_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_keepalive_timeout")]
    pub keepalive_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Extra dial allowance on top of the connect timeout, covering the
    /// TLS handshake for https backends.
    #[serde(default = "default_tls_handshake_timeout")]
    pub tls_handshake_timeout_secs: u64,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_pool_max_idle_per_host(),
            idle_timeout_secs: default_pool_idle_timeout(),
            keepalive_secs: default_keepalive_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            tls_handshake_timeout_secs: default_tls_handshake_timeout(),
        }
    }
}

fn default_mock_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_pool_max_idle_per_host() -> usize {
    100
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_keepalive_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_tls_handshake_timeout() -> u64 {
    10
}

/// Shared configuration store.
///
/// Snapshot and replace are the only operations the request path and the
/// lifecycle use; the per-field setters exist for an external collaborator
/// editing the configuration between runs. No operation holds the lock
/// across I/O.
pub struct ConfigStore {
    inner: RwLock<GatewayConfig>,
}

impl ConfigStore {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Value copy of the current configuration, detached from the store.
    pub fn snapshot(&self) -> GatewayConfig {
        self.inner.read().clone()
    }

    /// Swap in a new configuration as a whole unit.
    pub fn replace(&self, config: GatewayConfig) {
        *self.inner.write() = config;
    }

    pub fn set_backend_url(&self, url: impl Into<String>) {
        self.inner.write().backend_url = url.into();
    }

    pub fn set_mock_content(&self, content: impl Into<String>) {
        self.inner.write().mock_content = content.into();
    }

    pub fn set_mock_thinking(&self, thinking: impl Into<String>) {
        self.inner.write().mock_thinking = thinking.into();
    }

    pub fn set_mock_functions(&self, functions: impl Into<String>) {
        self.inner.write().mock_functions = functions.into();
    }

    pub fn set_mock_enabled(&self, enabled: bool) {
        self.inner.write().mock_enabled = enabled;
    }

    pub fn set_raw_mode(&self, raw: bool) {
        self.inner.write().raw_mode = raw;
    }

    pub fn set_port(&self, port: u16) {
        self.inner.write().port = port;
    }

    pub fn set_running(&self, running: bool) {
        self.inner.write().running = running;
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(GatewayConfig::default())
    }
}
