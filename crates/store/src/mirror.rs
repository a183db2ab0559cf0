//! Write-through mirroring of upstream bodies

use shipd_errors::{Error, StorageError};
use shipd_types::ArtifactId;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Removes the partial file unless the mirror was committed
struct PartialGuard {
    path: PathBuf,
    committed: bool,
}

impl Drop for PartialGuard {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Accumulates an artifact body in a partial file and publishes it atomically.
///
/// Dropping the writer without calling [`MirrorWriter::commit`] discards
/// everything written so far, so an interrupted transfer never leaves a
/// truncated file where readers would find it.
pub struct MirrorWriter {
    guard: PartialGuard,
    file: File,
    dest: PathBuf,
    written: u64,
}

impl MirrorWriter {
    pub(crate) async fn create(
        partial_dir: &Path,
        dest: PathBuf,
        identifier: &ArtifactId,
    ) -> Result<Self, Error> {
        fs::create_dir_all(partial_dir)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, partial_dir))?;

        let path = partial_dir.join(format!("{identifier}.{}", Uuid::new_v4()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &path))?;

        Ok(Self {
            guard: PartialGuard {
                path,
                committed: false,
            },
            file,
            dest,
            written: 0,
        })
    }

    /// Append a segment
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn write(&mut self, segment: &[u8]) -> Result<(), Error> {
        self.file
            .write_all(segment)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &self.guard.path))?;
        self.written += segment.len() as u64;
        Ok(())
    }

    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    #[must_use]
    pub fn partial_path(&self) -> &Path {
        &self.guard.path
    }

    /// Flush and rename the partial file to its final location
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or the rename fails; the partial file is
    /// removed in either case.
    pub async fn commit(mut self) -> Result<PathBuf, Error> {
        self.file
            .sync_all()
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &self.guard.path))?;

        if let Some(parent) = self.dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::from_io_with_path(&e, parent))?;
        }

        fs::rename(&self.guard.path, &self.dest)
            .await
            .map_err(|e| StorageError::AtomicRenameFailed {
                message: format!(
                    "{} -> {}: {e}",
                    self.guard.path.display(),
                    self.dest.display()
                ),
            })?;
        self.guard.committed = true;
        Ok(self.dest.clone())
    }
}

impl std::fmt::Debug for MirrorWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorWriter")
            .field("partial", &self.guard.path)
            .field("dest", &self.dest)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}
