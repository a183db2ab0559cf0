#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! On-disk artifact storage for shipd
//!
//! This crate manages the storage root the local provider reads from and the
//! cache the proxy provider mirrors into. Mirrored files land in a partial
//! directory first and are renamed into place only once the upstream body
//! ended cleanly.

mod mirror;

pub use mirror::MirrorWriter;

use shipd_errors::{Error, StorageError};
use shipd_types::ArtifactId;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};

/// Subdirectory of the storage root holding in-flight mirror downloads
pub const PARTIAL_DIR: &str = ".partial";

/// An artifact file opened for reading
#[derive(Debug)]
pub struct StoredFile {
    pub path: PathBuf,
    pub file: File,
    pub len: u64,
}

/// Store manager for artifact files under a single root
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a new store instance
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage root and the partial directory
    ///
    /// # Errors
    ///
    /// Returns an error if either directory cannot be created.
    pub async fn initialize(&self) -> Result<(), Error> {
        let partial = self.partial_dir();
        fs::create_dir_all(&partial)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &partial))?;
        Ok(())
    }

    /// Default location of an artifact: the identifier directly under the root
    #[must_use]
    pub fn artifact_path(&self, identifier: &ArtifactId) -> PathBuf {
        self.root.join(identifier.as_str())
    }

    /// Resolve a catalog-relative path against the root.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidPath` for absolute paths or paths that
    /// step outside the root.
    pub fn resolve(&self, relative: &Path) -> Result<PathBuf, Error> {
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath {
                path: relative.display().to_string(),
            }
            .into());
        }
        Ok(self.root.join(relative))
    }

    /// Check if an artifact exists at its default location
    pub async fn contains(&self, identifier: &ArtifactId) -> bool {
        fs::metadata(self.artifact_path(identifier))
            .await
            .is_ok_and(|m| m.is_file())
    }

    /// Open a file under the root for streaming
    ///
    /// # Errors
    ///
    /// Returns `StorageError::ArtifactNotFound` if nothing exists at `path`,
    /// or another storage error if the file cannot be opened.
    pub async fn open(&self, identifier: &ArtifactId, path: &Path) -> Result<StoredFile, Error> {
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::ArtifactNotFound {
                    identifier: identifier.to_string(),
                }
                .into());
            }
            Err(e) => return Err(StorageError::from_io_with_path(&e, path).into()),
        };

        let metadata = file
            .metadata()
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, path))?;
        if !metadata.is_file() {
            return Err(StorageError::ArtifactNotFound {
                identifier: identifier.to_string(),
            }
            .into());
        }

        Ok(StoredFile {
            path: path.to_path_buf(),
            file,
            len: metadata.len(),
        })
    }

    /// Start mirroring an artifact into the store
    ///
    /// # Errors
    ///
    /// Returns an error if the partial file cannot be created.
    pub async fn begin_mirror(&self, identifier: &ArtifactId) -> Result<MirrorWriter, Error> {
        MirrorWriter::create(&self.partial_dir(), self.artifact_path(identifier), identifier).await
    }

    fn partial_dir(&self) -> PathBuf {
        self.root.join(PARTIAL_DIR)
    }
}
