//! Inbound delivery requests

use crate::artifact::{ArtifactId, ArtifactRef};
use serde::{Deserialize, Serialize};
use shipd_errors::DeliveryError;

/// Raw `request-delivery` payload as it arrives on the wire.
///
/// Every field is optional so that a missing identifier surfaces as a
/// protocol violation instead of a JSON error. The aliases accept the field
/// names used by older clients (`fileHash`, `fileName`, `type`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    #[serde(default, alias = "fileHash", skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, alias = "fileName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_identifier: Option<String>,
}

/// A validated delivery request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryRequest {
    /// Deliver an artifact addressed directly by identifier
    Artifact(ArtifactRef),
    /// Deliver a file addressed through the app that owns it
    AppFile {
        app_identifier: String,
        file_identifier: ArtifactId,
    },
}

impl DeliveryRequest {
    /// Identifier used for logging before resolution completes
    #[must_use]
    pub fn identifier(&self) -> &ArtifactId {
        match self {
            Self::Artifact(artifact) => &artifact.identifier,
            Self::AppFile {
                file_identifier, ..
            } => file_identifier,
        }
    }
}

impl TryFrom<RequestPayload> for DeliveryRequest {
    type Error = DeliveryError;

    fn try_from(payload: RequestPayload) -> Result<Self, Self::Error> {
        if let Some(identifier) = payload.identifier {
            let artifact = ArtifactRef {
                identifier: ArtifactId::parse(identifier)?,
                display_name: payload.display_name.filter(|name| !name.is_empty()),
                declared_type: payload.declared_type.filter(|kind| !kind.is_empty()),
                remote_key: None,
            };
            return Ok(Self::Artifact(artifact));
        }

        match (payload.app_identifier, payload.file_identifier) {
            (Some(app), Some(file)) if !app.is_empty() => Ok(Self::AppFile {
                app_identifier: app,
                file_identifier: ArtifactId::parse(file)?,
            }),
            _ => Err(DeliveryError::protocol(
                "request-delivery requires `identifier` or `appIdentifier` with `fileIdentifier`",
            )),
        }
    }
}
