//! Connection and wire-level error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("connection refused: {reason}")]
    AdmissionRejected { reason: String },

    #[error("no delivery namespace at {path}")]
    UnknownNamespace { path: String },

    #[error("connection limit of {limit} reached")]
    CapacityExhausted { limit: usize },

    #[error("WebSocket handshake failed: {message}")]
    HandshakeFailed { message: String },

    #[error("malformed frame: {message}")]
    MalformedFrame { message: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("failed to bind {addr}: {message}")]
    BindFailed { addr: String, message: String },
}

impl UserFacingError for TransportError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::AdmissionRejected { .. } => Some("Connect with a `token` query parameter."),
            Self::BindFailed { .. } => Some("Choose a free address with `server.listen`."),
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::AdmissionRejected { .. } => "transport.admission_rejected",
            Self::UnknownNamespace { .. } => "transport.unknown_namespace",
            Self::CapacityExhausted { .. } => "transport.capacity_exhausted",
            Self::HandshakeFailed { .. } => "transport.handshake_failed",
            Self::MalformedFrame { .. } => "transport.malformed_frame",
            Self::ConnectionClosed => "transport.connection_closed",
            Self::BindFailed { .. } => "transport.bind_failed",
        };
        Some(code)
    }
}
