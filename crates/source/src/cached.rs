//! Cache-first proxying

use crate::local::open_stored;
use crate::{RemoteProxyProvider, SourceHandle, SourceOrigin, SourceProvider};
use async_trait::async_trait;
use shipd_errors::Error;
use shipd_store::ArtifactStore;
use shipd_types::ArtifactRef;

/// Serves artifacts already mirrored into the store and proxies the rest
#[derive(Clone)]
pub struct CacheFirstProvider {
    store: ArtifactStore,
    remote: RemoteProxyProvider,
    read_buffer_size: usize,
}

impl CacheFirstProvider {
    /// `remote` should mirror into `store`, otherwise nothing is ever cached
    #[must_use]
    pub fn new(store: ArtifactStore, remote: RemoteProxyProvider, read_buffer_size: usize) -> Self {
        Self {
            store,
            remote,
            read_buffer_size,
        }
    }
}

#[async_trait]
impl SourceProvider for CacheFirstProvider {
    fn name(&self) -> &'static str {
        "cached"
    }

    async fn open(&self, artifact: &ArtifactRef) -> Result<SourceHandle, Error> {
        if self.store.contains(&artifact.identifier).await {
            let path = self.store.artifact_path(&artifact.identifier);
            match open_stored(
                &self.store,
                artifact.clone(),
                &path,
                self.read_buffer_size,
                SourceOrigin::Cache,
            )
            .await
            {
                Ok(handle) => return Ok(handle),
                // Evicted between the check and the open; fall through to upstream
                Err(e) => tracing::debug!(identifier = %artifact.identifier, error = %e, "cache miss"),
            }
        }
        self.remote.open(artifact).await
    }
}
