use serde::{Deserialize, Serialize};
use shipd_types::ConnectionId;

/// Transport gateway events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    Listening {
        addr: String,
        namespace: String,
    },

    ConnectionAdmitted {
        connection_id: ConnectionId,
        peer: String,
    },

    /// Handshake refused (missing token, wrong path, capacity)
    AdmissionRejected {
        peer: String,
        reason: String,
    },

    ConnectionClosed {
        connection_id: ConnectionId,
        reason: Option<String>,
    },

    ListenerFailed {
        error: String,
    },

    ShuttingDown {
        active_sessions: usize,
    },
}
