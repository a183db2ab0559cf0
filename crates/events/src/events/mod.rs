use serde::{Deserialize, Serialize};

use shipd_errors::UserFacingError;

/// Structured failure information shared across domains.
///
/// The same structure is sent to clients as the `delivery-error` payload, so
/// the field names are part of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Stable error code (`delivery.not_found`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    /// Optional remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the operation might succeed.
    pub retryable: bool,
}

impl FailureContext {
    /// Construct a new failure context.
    #[must_use]
    pub fn new(
        code: Option<impl Into<String>>,
        message: impl Into<String>,
        hint: Option<impl Into<String>>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
            hint: hint.map(Into::into),
            retryable,
        }
    }

    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self::new(
            error.user_code(),
            error.user_message().into_owned(),
            error.user_hint(),
            error.is_retryable(),
        )
    }
}

// Declare all domain modules
pub mod accounting;
pub mod delivery;
pub mod gateway;
pub mod general;

// Re-export all domain events
pub use accounting::*;
pub use delivery::*;
pub use gateway::*;
pub use general::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// General utility events (warnings, errors, operations)
    General(GeneralEvent),

    /// Connection admission and lifecycle
    Gateway(GatewayEvent),

    /// Delivery session lifecycle
    Delivery(DeliveryEvent),

    /// Completed-delivery bookkeeping
    Accounting(AccountingEvent),
}

impl AppEvent {
    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            // Error-level events
            Self::General(GeneralEvent::Error { .. })
            | Self::Gateway(GatewayEvent::ListenerFailed { .. }) => Level::ERROR,

            // Warning-level events
            Self::General(GeneralEvent::Warning { .. })
            | Self::Delivery(DeliveryEvent::Failed { .. } | DeliveryEvent::Rejected { .. })
            | Self::Gateway(GatewayEvent::AdmissionRejected { .. })
            | Self::Accounting(AccountingEvent::RecordFailed { .. } | AccountingEvent::Dropped { .. }) => {
                Level::WARN
            }

            // Debug-level events (per-chunk traffic, internal state)
            Self::General(GeneralEvent::DebugLog { .. })
            | Self::Delivery(DeliveryEvent::ChunkAcknowledged { .. } | DeliveryEvent::Resolving { .. })
            | Self::Accounting(AccountingEvent::Recorded { .. }) => Level::DEBUG,

            // Default to INFO for most events
            _ => Level::INFO,
        }
    }

    /// Get the log target for this event (for structured logging)
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "shipd::events::general",
            Self::Gateway(_) => "shipd::events::gateway",
            Self::Delivery(_) => "shipd::events::delivery",
            Self::Accounting(_) => "shipd::events::accounting",
        }
    }
}
