#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for shipd
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/shipd/config.toml)
//! - Environment variables
//! - CLI flags

pub mod constants;

use serde::{Deserialize, Serialize};
use shipd_errors::{ConfigError, Error};
use shipd_types::SourceMode;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub accounting: AccountingConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Path of the delivery namespace clients connect to
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Outbound frames queued per connection before senders wait
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Storage root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Upper bound on the bytes read from disk per chunk
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

/// Source selection
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceConfig {
    #[serde(default)]
    pub mode: SourceMode,
}

/// Upstream file server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: Option<String>,
    #[serde(default = "default_max_content_length")]
    pub max_content_length: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64, // seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64, // seconds
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64, // milliseconds
}

/// Accounting collaborator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingConfig {
    /// Endpoint receiving completed-delivery records; in-memory ledger if unset
    pub endpoint: Option<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Metadata catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogConfig {
    pub path: Option<PathBuf>,
}

// Default implementations

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            namespace: default_namespace(),
            outbound_buffer: default_outbound_buffer(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            max_content_length: default_max_content_length(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            retries: default_retries(),
            retry_delay: default_retry_delay(),
        }
    }
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

// Default value functions for serde
fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], constants::DEFAULT_PORT))
}

fn default_namespace() -> String {
    constants::DEFAULT_NAMESPACE.to_string()
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_max_connections() -> usize {
    1024
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(constants::DEFAULT_STORAGE_ROOT)
}

fn default_read_buffer_size() -> usize {
    64 * 1024 // 64KB
}

fn default_max_content_length() -> u64 {
    2 * 1024 * 1024 * 1024 // 2GB
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    500
}

fn default_queue_capacity() -> usize {
    256
}

impl UpstreamConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay)
    }
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("shipd").join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        tracing::debug!(path = %path.display(), "loaded configuration file");

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        // SHIPD_LISTEN
        if let Ok(listen) = std::env::var("SHIPD_LISTEN") {
            self.server.listen = listen.parse().map_err(|_| ConfigError::InvalidValue {
                field: "SHIPD_LISTEN".to_string(),
                value: listen,
            })?;
        }

        // SHIPD_STORAGE_ROOT
        if let Ok(root) = std::env::var("SHIPD_STORAGE_ROOT") {
            self.storage.root = PathBuf::from(root);
        }

        // SHIPD_SOURCE_MODE
        if let Ok(mode) = std::env::var("SHIPD_SOURCE_MODE") {
            self.source.mode = mode.parse().map_err(|_| ConfigError::InvalidValue {
                field: "SHIPD_SOURCE_MODE".to_string(),
                value: mode,
            })?;
        }

        // SHIPD_UPSTREAM_URL
        if let Ok(url) = std::env::var("SHIPD_UPSTREAM_URL") {
            self.upstream.base_url = Some(url);
        }

        // SHIPD_MAX_CONTENT_LENGTH
        if let Ok(limit) = std::env::var("SHIPD_MAX_CONTENT_LENGTH") {
            self.upstream.max_content_length =
                limit.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "SHIPD_MAX_CONTENT_LENGTH".to_string(),
                    value: limit,
                })?;
        }

        // SHIPD_ACCOUNTING_ENDPOINT
        if let Ok(endpoint) = std::env::var("SHIPD_ACCOUNTING_ENDPOINT") {
            self.accounting.endpoint = Some(endpoint);
        }

        Ok(())
    }

    /// Check cross-field constraints after all layers are merged
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting found.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.server.namespace.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "server.namespace".to_string(),
                value: self.server.namespace.clone(),
            }
            .into());
        }

        for (field, value) in [
            ("server.outbound_buffer", self.server.outbound_buffer),
            ("server.max_connections", self.server.max_connections),
            ("storage.read_buffer_size", self.storage.read_buffer_size),
            ("accounting.queue_capacity", self.accounting.queue_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                }
                .into());
            }
        }

        if self.upstream.max_content_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "upstream.max_content_length".to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        if matches!(self.source.mode, SourceMode::Proxy | SourceMode::Cached) {
            let base = self
                .upstream
                .base_url
                .as_deref()
                .ok_or_else(|| ConfigError::MissingField {
                    field: "upstream.base_url".to_string(),
                })?;
            validate_http_url("upstream.base_url", base)?;
        }

        if let Some(endpoint) = self.accounting.endpoint.as_deref() {
            validate_http_url("accounting.endpoint", endpoint)?;
        }

        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<(), Error> {
    let parsed = url::Url::parse(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
        .into()),
    }
}
