use serde::{Deserialize, Serialize};
use shipd_types::{ArtifactId, ConnectionId, SessionId, SessionState};
use std::time::Duration;

use super::FailureContext;

/// Delivery session lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeliveryEvent {
    /// A request was accepted and a session created
    Requested {
        session_id: SessionId,
        connection_id: ConnectionId,
        identifier: ArtifactId,
    },

    /// Source provider open in flight
    Resolving {
        session_id: SessionId,
        identifier: ArtifactId,
        source: String,
    },

    /// Source opened, chunks about to flow
    Started {
        session_id: SessionId,
        identifier: ArtifactId,
        display_name: String,
        origin: String,
        total_size: Option<u64>,
    },

    /// Client confirmed receipt of a chunk (best-effort, never awaited)
    ChunkAcknowledged {
        connection_id: ConnectionId,
        number: u64,
    },

    /// All bytes sent and `delivery-complete` emitted
    Completed {
        session_id: SessionId,
        identifier: ArtifactId,
        bytes_sent: u64,
        chunks: u64,
        duration: Duration,
    },

    /// Session failed while resolving or streaming
    Failed {
        session_id: SessionId,
        identifier: ArtifactId,
        phase: SessionState,
        /// Taxonomy class of the error (`resolution`, `streaming`, ...)
        class: String,
        bytes_sent: u64,
        failure: FailureContext,
    },

    /// Session stopped because its connection went away
    Cancelled {
        session_id: SessionId,
        identifier: ArtifactId,
        bytes_sent: u64,
    },

    /// Request refused before a session existed (malformed or busy connection)
    Rejected {
        connection_id: ConnectionId,
        failure: FailureContext,
    },
}
