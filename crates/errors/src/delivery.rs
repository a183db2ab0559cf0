//! Delivery session error types

use std::borrow::Cow;

use crate::{ErrorClass, UserFacingError};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum DeliveryError {
    #[error("artifact not found: {identifier}")]
    NotFound { identifier: String },

    #[error("artifact {identifier} is not enabled for download")]
    NotEnabled { identifier: String },

    #[error("upstream unavailable for {identifier}: {message}")]
    UpstreamUnavailable { identifier: String, message: String },

    #[error("artifact {identifier} exceeds the {limit} byte transfer ceiling")]
    PayloadTooLarge { identifier: String, limit: u64 },

    #[error("stream interrupted after {bytes_sent} bytes: {message}")]
    StreamInterrupted { bytes_sent: u64, message: String },

    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },
}

impl DeliveryError {
    /// Shorthand for a malformed request
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound { .. }
            | Self::NotEnabled { .. }
            | Self::UpstreamUnavailable { .. }
            | Self::PayloadTooLarge { .. } => ErrorClass::Resolution,
            Self::StreamInterrupted { .. } => ErrorClass::Streaming,
            Self::ProtocolViolation { .. } => ErrorClass::Request,
        }
    }
}

impl UserFacingError for DeliveryError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NotEnabled { .. } => {
                Some("Ask the app owner to enable the file for distribution.")
            }
            Self::UpstreamUnavailable { .. } => Some("The file server is unreachable; retry later."),
            Self::StreamInterrupted { .. } => {
                Some("Discard the partial data and request the delivery again.")
            }
            Self::ProtocolViolation { .. } => {
                Some("Send `request-delivery` with an identifier or an app/file pair.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::StreamInterrupted { .. }
        )
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NotFound { .. } => "delivery.not_found",
            Self::NotEnabled { .. } => "delivery.not_enabled",
            Self::UpstreamUnavailable { .. } => "delivery.upstream_unavailable",
            Self::PayloadTooLarge { .. } => "delivery.payload_too_large",
            Self::StreamInterrupted { .. } => "delivery.stream_interrupted",
            Self::ProtocolViolation { .. } => "delivery.protocol_violation",
        };
        Some(code)
    }
}
