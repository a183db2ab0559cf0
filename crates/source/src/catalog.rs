//! Artifact metadata lookups

use async_trait::async_trait;
use serde::Deserialize;
use shipd_errors::{ConfigError, DeliveryError, Error};
use shipd_types::{ArtifactId, ArtifactRecord};
use std::collections::HashMap;
use std::path::Path;

/// Read-only view of the artifact metadata service
#[async_trait]
pub trait ArtifactCatalog: Send + Sync {
    /// Look up an artifact by identifier
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::NotFound` for unknown identifiers.
    async fn resolve_artifact(&self, identifier: &ArtifactId) -> Result<ArtifactRecord, Error>;

    /// Look up a file through the app that owns it.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::NotFound` if the file is unknown or belongs to
    /// another app, and `DeliveryError::NotEnabled` if it is not approved
    /// for download.
    async fn resolve_app_file(
        &self,
        app_identifier: &str,
        file_identifier: &ArtifactId,
    ) -> Result<ArtifactRecord, Error>;
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    artifacts: Vec<ArtifactRecord>,
}

/// Catalog backed by a fixed set of records, usually loaded from TOML:
///
/// ```toml
/// [[artifacts]]
/// identifier = "abc123"
/// display_name = "app.apk"
/// declared_type = "apk"
/// owning_app = "com.example.app"
/// download_enabled = true
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    records: HashMap<ArtifactId, ArtifactRecord>,
    allow_unlisted: bool,
}

impl StaticCatalog {
    #[must_use]
    pub fn new(records: impl IntoIterator<Item = ArtifactRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.identifier.clone(), record))
                .collect(),
            allow_unlisted: false,
        }
    }

    /// Catalog used when no catalog file is configured: every identifier is
    /// treated as an enabled artifact stored under its own name.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            records: HashMap::new(),
            allow_unlisted: true,
        }
    }

    /// Load records from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;
        let catalog = Self::from_toml(&contents)?;
        tracing::debug!(
            path = %path.display(),
            records = catalog.len(),
            "loaded artifact catalog"
        );
        Ok(catalog)
    }

    /// Parse records from TOML text
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` for malformed input.
    pub fn from_toml(contents: &str) -> Result<Self, Error> {
        let file: CatalogFile = toml::from_str(contents).map_err(|e| ConfigError::ParseError {
            message: format!("catalog: {e}"),
        })?;
        Ok(Self::new(file.artifacts))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn unlisted(identifier: &ArtifactId) -> ArtifactRecord {
        ArtifactRecord {
            identifier: identifier.clone(),
            display_name: identifier.to_string(),
            declared_type: None,
            owning_app: String::new(),
            download_enabled: true,
            path: None,
            remote_ref: None,
        }
    }
}

#[async_trait]
impl ArtifactCatalog for StaticCatalog {
    async fn resolve_artifact(&self, identifier: &ArtifactId) -> Result<ArtifactRecord, Error> {
        match self.records.get(identifier) {
            Some(record) => Ok(record.clone()),
            None if self.allow_unlisted => Ok(Self::unlisted(identifier)),
            None => Err(DeliveryError::NotFound {
                identifier: identifier.to_string(),
            }
            .into()),
        }
    }

    async fn resolve_app_file(
        &self,
        app_identifier: &str,
        file_identifier: &ArtifactId,
    ) -> Result<ArtifactRecord, Error> {
        let record = self
            .records
            .get(file_identifier)
            .filter(|record| record.owning_app == app_identifier)
            .ok_or_else(|| DeliveryError::NotFound {
                identifier: file_identifier.to_string(),
            })?;

        if !record.download_enabled {
            return Err(DeliveryError::NotEnabled {
                identifier: file_identifier.to_string(),
            }
            .into());
        }
        Ok(record.clone())
    }
}
