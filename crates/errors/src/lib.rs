#![warn(mismatched_lifetime_syntaxes)]
#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for the shipd delivery service
//!
//! This crate provides fine-grained error types organized by domain.
//! All error types implement Clone so they can cross task boundaries and be
//! rendered into protocol error payloads more than once.

use std::borrow::Cow;

use thiserror::Error;

pub mod config;
pub mod delivery;
pub mod network;
pub mod storage;
pub mod transport;

// Re-export all error types at the root
pub use config::ConfigError;
pub use delivery::DeliveryError;
pub use network::NetworkError;
pub use storage::StorageError;
pub use transport::TransportError;

/// Generic error type for cross-crate boundaries
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
        path: Option<std::path::PathBuf>,
    },
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Position of this error in the delivery error taxonomy
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Delivery(err) => err.class(),
            Error::Transport(TransportError::AdmissionRejected { .. }) => ErrorClass::Admission,
            Error::Transport(TransportError::MalformedFrame { .. }) => ErrorClass::Request,
            Error::Network(_) | Error::Io { .. } => ErrorClass::Streaming,
            Error::Storage(StorageError::ArtifactNotFound { .. }) => ErrorClass::Resolution,
            _ => ErrorClass::Internal,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {err}"))
    }
}

/// Result type alias for shipd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Where in the delivery lifecycle an error arises.
///
/// The class decides how far the failure reaches: admission errors close the
/// connection, everything else is confined to a single delivery session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Missing handshake token, fatal to the connection.
    Admission,
    /// Malformed delivery request, fatal to the would-be session only.
    Request,
    /// Failure before the first chunk (not found, not enabled, upstream down, too large).
    Resolution,
    /// Failure after chunks were sent; the client must discard and start over.
    Streaming,
    Internal,
}

impl ErrorClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admission => "admission",
            Self::Request => "request",
            Self::Resolution => "resolution",
            Self::Streaming => "streaming",
            Self::Internal => "internal",
        }
    }
}

/// Minimal interface for rendering user-facing error information without
/// requiring heavyweight envelopes.
pub trait UserFacingError {
    /// Short message suitable for protocol payloads and CLI output.
    fn user_message(&self) -> Cow<'_, str>;

    /// Optional remediation hint.
    fn user_hint(&self) -> Option<&'static str> {
        None
    }

    /// Whether retrying the same operation is likely to succeed.
    fn is_retryable(&self) -> bool {
        false
    }

    /// Stable error code for analytics / structured reporting.
    fn user_code(&self) -> Option<&'static str> {
        None
    }
}

impl UserFacingError for Error {
    fn user_message(&self) -> Cow<'_, str> {
        match self {
            Error::Delivery(err) => err.user_message(),
            Error::Network(err) => err.user_message(),
            Error::Storage(err) => err.user_message(),
            Error::Transport(err) => err.user_message(),
            Error::Io { message, .. } => Cow::Owned(message.clone()),
            _ => Cow::Owned(self.to_string()),
        }
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Error::Delivery(err) => err.user_hint(),
            Error::Network(err) => err.user_hint(),
            Error::Storage(err) => err.user_hint(),
            Error::Transport(err) => err.user_hint(),
            Error::Config(err) => err.user_hint(),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Error::Delivery(err) => err.is_retryable(),
            Error::Network(err) => err.is_retryable(),
            Error::Storage(err) => err.is_retryable(),
            Error::Io { .. } => true,
            _ => false,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        match self {
            Error::Delivery(err) => err.user_code(),
            Error::Network(err) => err.user_code(),
            Error::Storage(err) => err.user_code(),
            Error::Config(err) => err.user_code(),
            Error::Transport(err) => err.user_code(),
            Error::Internal(_) => Some("error.internal"),
            Error::Cancelled => Some("error.cancelled"),
            Error::Io { .. } => Some("error.io"),
        }
    }
}
