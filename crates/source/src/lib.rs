#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Artifact source resolution for shipd
//!
//! A [`SourceProvider`] turns an [`ArtifactRef`] into an open byte stream and
//! its declared size. Three variants are provided and selected by
//! `source.mode`:
//!
//! - [`LocalFileProvider`] reads from the storage root, gated by the catalog
//! - [`RemoteProxyProvider`] streams from the upstream file server
//! - [`CacheFirstProvider`] serves cached copies and mirrors misses

mod cached;
mod catalog;
mod local;
mod remote;

pub use cached::CacheFirstProvider;
pub use catalog::{ArtifactCatalog, StaticCatalog};
pub use local::LocalFileProvider;
pub use remote::RemoteProxyProvider;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use shipd_config::Config;
use shipd_errors::{ConfigError, Error};
use shipd_events::EventSender;
use shipd_net::{NetClient, NetConfig, StreamLimits};
use shipd_store::ArtifactStore;
use shipd_types::{ArtifactRef, SourceMode};
use std::fmt;
use std::sync::Arc;

/// Where the bytes of a handle come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    Local,
    Upstream,
    Cache,
}

impl SourceOrigin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Upstream => "upstream",
            Self::Cache => "cache",
        }
    }
}

impl fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opened artifact, exclusively owned by one delivery session.
///
/// Dropping the handle releases the file descriptor or HTTP body and, for
/// mirrored fetches, removes the partial cache file.
pub struct SourceHandle {
    /// The artifact as resolved, with display name filled from the catalog when known
    pub artifact: ArtifactRef,
    pub stream: BoxStream<'static, Result<Bytes, Error>>,
    /// Total byte length, when the source knows it up front
    pub size: Option<u64>,
    pub origin: SourceOrigin,
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle")
            .field("artifact", &self.artifact)
            .field("size", &self.size)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Capability for opening artifact byte streams
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Short name used in logs and events
    fn name(&self) -> &'static str;

    /// Open a stream for `artifact`
    ///
    /// # Errors
    ///
    /// Returns a `DeliveryError` from the resolution class (`NotFound`,
    /// `NotEnabled`, `UpstreamUnavailable`, `PayloadTooLarge`).
    async fn open(&self, artifact: &ArtifactRef) -> Result<SourceHandle, Error>;
}

/// Build the HTTP client configuration for upstream fetches
#[must_use]
pub fn net_config(config: &Config) -> NetConfig {
    NetConfig {
        connect_timeout: config.upstream.connect_timeout(),
        retry_count: config.upstream.retries,
        retry_delay: config.upstream.retry_delay(),
        ..NetConfig::default()
    }
}

/// Streaming limits for upstream bodies
#[must_use]
pub fn stream_limits(config: &Config) -> StreamLimits {
    StreamLimits {
        max_content_length: config.upstream.max_content_length,
        idle_timeout: config.upstream.idle_timeout(),
    }
}

/// Construct the provider selected by `source.mode`
///
/// # Errors
///
/// Returns an error if a proxy mode is selected without `upstream.base_url`
/// or the HTTP client cannot be created.
pub fn build_provider(
    config: &Config,
    catalog: Arc<dyn ArtifactCatalog>,
    tx: &EventSender,
) -> Result<Arc<dyn SourceProvider>, Error> {
    let store = ArtifactStore::new(config.storage.root.clone());

    let remote = |mirror: Option<ArtifactStore>| -> Result<RemoteProxyProvider, Error> {
        let base_url = config
            .upstream
            .base_url
            .clone()
            .ok_or_else(|| ConfigError::MissingField {
                field: "upstream.base_url".to_string(),
            })?;
        let client = NetClient::new(net_config(config))?;
        let provider = RemoteProxyProvider::new(client, base_url, stream_limits(config), tx.clone());
        Ok(match mirror {
            Some(store) => provider.with_mirror(store),
            None => provider,
        })
    };

    let provider: Arc<dyn SourceProvider> = match config.source.mode {
        SourceMode::Local => Arc::new(LocalFileProvider::new(
            store,
            catalog,
            config.storage.read_buffer_size,
        )),
        SourceMode::Proxy => Arc::new(remote(None)?),
        SourceMode::Cached => Arc::new(CacheFirstProvider::new(
            store.clone(),
            remote(Some(store))?,
            config.storage.read_buffer_size,
        )),
    };

    tracing::debug!(provider = provider.name(), "source provider selected");
    Ok(provider)
}
