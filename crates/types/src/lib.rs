#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the shipd delivery service
//!
//! This crate provides the vocabulary shared by every other crate: artifact
//! identifiers and records, delivery requests, chunks, and session state.

pub mod artifact;
pub mod chunk;
pub mod request;
pub mod session;

// Re-export commonly used types
pub use artifact::{ArtifactId, ArtifactRecord, ArtifactRef};
pub use chunk::Chunk;
pub use request::{DeliveryRequest, RequestPayload};
pub use session::{ConnectionId, SessionId, SessionOutcome, SessionState};
pub use uuid::Uuid;

use serde::{Deserialize, Serialize};

/// Where delivery sessions read artifact bytes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Read from the managed storage root
    Local,
    /// Stream from the upstream file server
    Proxy,
    /// Serve from the storage root, falling back to a mirrored upstream fetch
    Cached,
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Proxy => write!(f, "proxy"),
            Self::Cached => write!(f, "cached"),
        }
    }
}

impl std::str::FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "proxy" => Ok(Self::Proxy),
            "cached" => Ok(Self::Cached),
            other => Err(format!("unknown source mode `{other}`")),
        }
    }
}

impl Default for SourceMode {
    fn default() -> Self {
        Self::Local
    }
}

// Implement clap::ValueEnum for SourceMode
impl clap::ValueEnum for SourceMode {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Local, Self::Proxy, Self::Cached]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Local => clap::builder::PossibleValue::new("local"),
            Self::Proxy => clap::builder::PossibleValue::new("proxy"),
            Self::Cached => clap::builder::PossibleValue::new("cached"),
        })
    }
}

/// Log line format for the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Text
    }
}

impl clap::ValueEnum for LogFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Text, Self::Json]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Text => clap::builder::PossibleValue::new("text"),
            Self::Json => clap::builder::PossibleValue::new("json"),
        })
    }
}
