#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for async communication in shipd
//!
//! Library crates report what happens through domain events instead of
//! logging directly; the daemon drains the channel and turns each event into
//! a structured log record.
//!
//! ## Architecture
//!
//! - **Domain-driven events**: Events grouped by functional domain (Gateway, Delivery, Accounting)
//! - **Unified `EventEmitter` trait**: Single, consistent API for all event emissions
//! - **Tracing integration**: Every event knows its log level and target

pub mod events;
pub use events::{
    AccountingEvent, AppEvent, DeliveryEvent, FailureContext, GatewayEvent, GeneralEvent,
};

use shipd_errors::UserFacingError;
use shipd_types::{ArtifactId, ConnectionId};
use tokio::sync::mpsc::UnboundedSender;

/// Type alias for event sender using the `AppEvent` system
pub type EventSender = UnboundedSender<AppEvent>;

/// Type alias for event receiver using the `AppEvent` system
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<AppEvent>;

/// Create a new event channel with the `AppEvent` system
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// The unified trait for emitting events throughout shipd
///
/// This trait provides a single, consistent API for emitting events regardless of
/// whether you have a raw `EventSender` or a struct that contains one.
pub trait EventEmitter {
    /// Get the event sender for this emitter
    fn event_sender(&self) -> Option<&EventSender>;

    /// Emit an event through this emitter
    fn emit(&self, event: AppEvent) {
        if let Some(sender) = self.event_sender() {
            // Ignore send errors - if receiver is dropped, we just continue
            let _ = sender.send(event);
        }
    }

    /// Emit a debug log event
    fn emit_debug(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::debug(message)));
    }

    /// Emit a warning event
    fn emit_warning(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning(message)));
    }

    /// Emit a warning event with context
    fn emit_warning_with_context(&self, message: impl Into<String>, context: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning_with_context(
            message, context,
        )));
    }

    /// Emit an error event
    fn emit_error(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::error(message)));
    }

    /// Emit a delivery lifecycle event
    fn emit_delivery(&self, event: DeliveryEvent) {
        self.emit(AppEvent::Delivery(event));
    }

    /// Emit a gateway event
    fn emit_gateway(&self, event: GatewayEvent) {
        self.emit(AppEvent::Gateway(event));
    }

    /// Emit a request rejection for a connection
    fn emit_rejected<E: UserFacingError + ?Sized>(&self, connection_id: ConnectionId, error: &E) {
        self.emit(AppEvent::Delivery(DeliveryEvent::Rejected {
            connection_id,
            failure: FailureContext::from_error(error),
        }));
    }

    /// Emit an accounting record failure
    fn emit_accounting_failed<E: UserFacingError + ?Sized>(
        &self,
        identifier: ArtifactId,
        error: &E,
    ) {
        self.emit(AppEvent::Accounting(AccountingEvent::RecordFailed {
            identifier,
            failure: FailureContext::from_error(error),
        }));
    }
}

/// Implementation of `EventEmitter` for the raw `EventSender`
/// This allows `EventSender` to be used directly where `EventEmitter` is expected
impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}
