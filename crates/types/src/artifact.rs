//! Artifact identity and catalog records

use serde::{Deserialize, Serialize};
use shipd_errors::DeliveryError;
use std::fmt;
use std::path::PathBuf;

/// Longest identifier accepted on the wire
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Content-addressed identifier of an artifact.
///
/// Identifiers double as file names under the storage root, so only a
/// conservative character set is accepted and a leading dot is refused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Validate and wrap an identifier
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if the identifier is empty, too long, starts
    /// with a dot, or contains characters outside `[A-Za-z0-9._-]`.
    pub fn parse(value: impl Into<String>) -> Result<Self, DeliveryError> {
        let value = value.into();
        if value.is_empty() {
            return Err(DeliveryError::protocol("identifier must not be empty"));
        }
        if value.len() > MAX_IDENTIFIER_LEN {
            return Err(DeliveryError::protocol(format!(
                "identifier exceeds {MAX_IDENTIFIER_LEN} bytes"
            )));
        }
        if value.starts_with('.') {
            return Err(DeliveryError::protocol(format!(
                "identifier `{value}` must not start with a dot"
            )));
        }
        if let Some(bad) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(DeliveryError::protocol(format!(
                "identifier `{value}` contains invalid character {bad:?}"
            )));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = DeliveryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

/// What a delivery session needs to know about the artifact it serves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub identifier: ArtifactId,
    pub display_name: Option<String>,
    pub declared_type: Option<String>,
    /// Key on the upstream file server when it differs from the identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_key: Option<String>,
}

impl ArtifactRef {
    #[must_use]
    pub fn new(identifier: ArtifactId) -> Self {
        Self {
            identifier,
            display_name: None,
            declared_type: None,
            remote_key: None,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_declared_type(mut self, declared: impl Into<String>) -> Self {
        self.declared_type = Some(declared.into());
        self
    }

    #[must_use]
    pub fn with_remote_key(mut self, key: impl Into<String>) -> Self {
        self.remote_key = Some(key.into());
        self
    }

    /// Path segment requested from the upstream file server
    #[must_use]
    pub fn upstream_key(&self) -> &str {
        self.remote_key
            .as_deref()
            .unwrap_or_else(|| self.identifier.as_str())
    }

    /// Name used in logs when no display name was supplied
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or_else(|| self.identifier.as_str())
    }
}

/// Metadata record held by the catalog collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub identifier: ArtifactId,
    pub display_name: String,
    #[serde(default)]
    pub declared_type: Option<String>,
    /// App the file belongs to
    pub owning_app: String,
    #[serde(default)]
    pub download_enabled: bool,
    /// Path relative to the storage root; defaults to the identifier
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Key on the upstream file server; defaults to the identifier
    #[serde(default)]
    pub remote_ref: Option<String>,
}

impl ArtifactRecord {
    /// Reference handed to a source provider for this record
    #[must_use]
    pub fn to_ref(&self) -> ArtifactRef {
        ArtifactRef {
            identifier: self.identifier.clone(),
            display_name: Some(self.display_name.clone()),
            declared_type: self.declared_type.clone(),
            remote_key: Some(self.remote_key().to_string()),
        }
    }

    #[must_use]
    pub fn remote_key(&self) -> &str {
        self.remote_ref
            .as_deref()
            .unwrap_or_else(|| self.identifier.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_traversal() {
        assert!(ArtifactId::parse("../etc/passwd").is_err());
        assert!(ArtifactId::parse(".hidden").is_err());
        assert!(ArtifactId::parse("a/b").is_err());
        assert!(ArtifactId::parse("").is_err());
        assert!(ArtifactId::parse("abc123").is_ok());
        assert!(ArtifactId::parse("d41d8cd9.apk").is_ok());
    }

    #[test]
    fn test_record_ref_carries_remote_key() {
        let mut record = ArtifactRecord {
            identifier: ArtifactId::parse("abc123").unwrap(),
            display_name: "app.apk".to_string(),
            declared_type: None,
            owning_app: "com.example".to_string(),
            download_enabled: true,
            path: None,
            remote_ref: Some("blob-key".to_string()),
        };
        assert_eq!(record.to_ref().upstream_key(), "blob-key");

        record.remote_ref = None;
        assert_eq!(record.to_ref().upstream_key(), "abc123");
        assert_eq!(
            ArtifactRef::new(ArtifactId::parse("xyz").unwrap()).upstream_key(),
            "xyz"
        );
    }

    proptest! {
        #[test]
        fn accepted_ids_never_escape_the_root(s in "\\PC{0,40}") {
            if let Ok(id) = ArtifactId::parse(s) {
                let path = std::path::Path::new(id.as_str());
                prop_assert_eq!(path.components().count(), 1);
                prop_assert!(!id.as_str().contains('/'));
                prop_assert!(!id.as_str().starts_with('.'));
            }
        }
    }
}
