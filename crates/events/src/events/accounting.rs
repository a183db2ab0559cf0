use serde::{Deserialize, Serialize};
use shipd_types::ArtifactId;

use super::FailureContext;

/// Completed-delivery bookkeeping events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccountingEvent {
    Recorded {
        identifier: ArtifactId,
        bytes_sent: u64,
    },

    /// The collaborator returned an error; the delivery itself still succeeded
    RecordFailed {
        identifier: ArtifactId,
        failure: FailureContext,
    },

    /// The notification queue was full or closed
    Dropped {
        identifier: ArtifactId,
        reason: String,
    },
}
