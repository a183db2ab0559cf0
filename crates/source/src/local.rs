//! Artifacts served from the storage root

use crate::{ArtifactCatalog, SourceHandle, SourceOrigin, SourceProvider};
use async_trait::async_trait;
use futures::StreamExt;
use shipd_errors::{DeliveryError, Error};
use shipd_store::ArtifactStore;
use shipd_types::{ArtifactId, ArtifactRef};
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

/// Reads artifacts from disk after checking the catalog.
///
/// Each read of up to `read_buffer_size` bytes becomes one stream segment.
#[derive(Clone)]
pub struct LocalFileProvider {
    store: ArtifactStore,
    catalog: Arc<dyn ArtifactCatalog>,
    read_buffer_size: usize,
}

impl LocalFileProvider {
    #[must_use]
    pub fn new(
        store: ArtifactStore,
        catalog: Arc<dyn ArtifactCatalog>,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            store,
            catalog,
            read_buffer_size,
        }
    }
}

#[async_trait]
impl SourceProvider for LocalFileProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn open(&self, artifact: &ArtifactRef) -> Result<SourceHandle, Error> {
        let record = self.catalog.resolve_artifact(&artifact.identifier).await?;
        if !record.download_enabled {
            return Err(DeliveryError::NotEnabled {
                identifier: artifact.identifier.to_string(),
            }
            .into());
        }

        let path = match &record.path {
            Some(relative) => self
                .store
                .resolve(relative)
                .map_err(|e| not_found(&artifact.identifier, &e))?,
            None => self.store.artifact_path(&artifact.identifier),
        };

        let mut resolved = artifact.clone();
        if resolved.display_name.is_none() {
            resolved.display_name = Some(record.display_name.clone());
        }
        if resolved.declared_type.is_none() {
            resolved.declared_type.clone_from(&record.declared_type);
        }

        open_stored(
            &self.store,
            resolved,
            &path,
            self.read_buffer_size,
            SourceOrigin::Local,
        )
        .await
    }
}

/// Open a file under the store as a segmented stream.
///
/// Any failure to open is reported as `NotFound`: from the client's point of
/// view an unreadable artifact does not exist.
pub(crate) async fn open_stored(
    store: &ArtifactStore,
    artifact: ArtifactRef,
    path: &Path,
    read_buffer_size: usize,
    origin: SourceOrigin,
) -> Result<SourceHandle, Error> {
    let stored = store
        .open(&artifact.identifier, path)
        .await
        .map_err(|e| not_found(&artifact.identifier, &e))?;

    let stream = ReaderStream::with_capacity(stored.file, read_buffer_size.max(1))
        .map(|segment| segment.map_err(Error::from))
        .boxed();

    Ok(SourceHandle {
        artifact,
        stream,
        size: Some(stored.len),
        origin,
    })
}

fn not_found(identifier: &ArtifactId, cause: &Error) -> Error {
    tracing::debug!(%identifier, error = %cause, "artifact unreadable");
    DeliveryError::NotFound {
        identifier: identifier.to_string(),
    }
    .into()
}
