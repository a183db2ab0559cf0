//! Structured logging integration for events
//!
//! Library crates report through the event channel; this module turns each
//! event into a tracing record with structured fields at the level the event
//! itself declares.

use shipd_events::{AccountingEvent, AppEvent, DeliveryEvent, GatewayEvent, GeneralEvent};
use shipd_types::LogFormat;
use tracing::Level;
use tracing_subscriber::EnvFilter;

macro_rules! event_at {
    ($level:expr, $($rest:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!($($rest)+),
            Level::WARN => tracing::warn!($($rest)+),
            Level::INFO => tracing::info!($($rest)+),
            Level::DEBUG => tracing::debug!($($rest)+),
            _ => tracing::trace!($($rest)+),
        }
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the defaults; `--debug` lowers the shipd crates to
/// debug level.
pub fn init_tracing(format: LogFormat, debug: bool) {
    let default_filter = if debug {
        "info,shipd=debug,shipd_gateway=debug,shipd_delivery=debug,shipd_source=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Log an `AppEvent` using the tracing infrastructure with structured fields
#[allow(clippy::too_many_lines)]
pub fn log_event_with_tracing(event: &AppEvent) {
    let level = event.log_level();
    let domain = event.log_target();

    match event {
        AppEvent::General(general) => match general {
            GeneralEvent::Warning { message, context } => {
                event_at!(level, domain, context = ?context, "{message}");
            }
            GeneralEvent::Error { message, details } => {
                event_at!(level, domain, details = ?details, "{message}");
            }
            GeneralEvent::DebugLog { message, context } => {
                event_at!(level, domain, context = ?context, "{message}");
            }
            GeneralEvent::OperationStarted { operation } => {
                event_at!(level, domain, operation = %operation, "Operation started");
            }
            GeneralEvent::OperationCompleted { operation, success } => {
                event_at!(
                    level,
                    domain,
                    operation = %operation,
                    success = success,
                    "Operation completed"
                );
            }
        },

        AppEvent::Gateway(gateway) => match gateway {
            GatewayEvent::Listening { addr, namespace } => {
                event_at!(level, domain, addr = %addr, namespace = %namespace, "Listening");
            }
            GatewayEvent::ConnectionAdmitted {
                connection_id,
                peer,
            } => {
                event_at!(
                    level,
                    domain,
                    connection = %connection_id,
                    peer = %peer,
                    "Connection admitted"
                );
            }
            GatewayEvent::AdmissionRejected { peer, reason } => {
                event_at!(level, domain, peer = %peer, reason = %reason, "Handshake refused");
            }
            GatewayEvent::ConnectionClosed {
                connection_id,
                reason,
            } => {
                event_at!(
                    level,
                    domain,
                    connection = %connection_id,
                    reason = ?reason,
                    "Connection closed"
                );
            }
            GatewayEvent::ListenerFailed { error } => {
                event_at!(level, domain, error = %error, "Accept failed");
            }
            GatewayEvent::ShuttingDown { active_sessions } => {
                event_at!(
                    level,
                    domain,
                    active_sessions = active_sessions,
                    "Shutting down"
                );
            }
        },

        AppEvent::Delivery(delivery) => log_delivery(level, domain, delivery),

        AppEvent::Accounting(accounting) => match accounting {
            AccountingEvent::Recorded {
                identifier,
                bytes_sent,
            } => {
                event_at!(
                    level,
                    domain,
                    identifier = %identifier,
                    bytes_sent = bytes_sent,
                    "Delivery recorded"
                );
            }
            AccountingEvent::RecordFailed {
                identifier,
                failure,
            } => {
                event_at!(
                    level,
                    domain,
                    identifier = %identifier,
                    code = ?failure.code,
                    retryable = failure.retryable,
                    message = %failure.message,
                    "Delivery record failed"
                );
            }
            AccountingEvent::Dropped { identifier, reason } => {
                event_at!(
                    level,
                    domain,
                    identifier = %identifier,
                    reason = %reason,
                    "Delivery record dropped"
                );
            }
        },
    }
}

#[allow(clippy::too_many_lines)]
fn log_delivery(level: Level, domain: &str, event: &DeliveryEvent) {
    match event {
        DeliveryEvent::Requested {
            session_id,
            connection_id,
            identifier,
        } => {
            event_at!(
                level,
                domain,
                session = %session_id,
                connection = %connection_id,
                identifier = %identifier,
                "Delivery requested"
            );
        }
        DeliveryEvent::Resolving {
            session_id,
            identifier,
            source,
        } => {
            event_at!(
                level,
                domain,
                session = %session_id,
                identifier = %identifier,
                source = %source,
                "Resolving artifact"
            );
        }
        DeliveryEvent::Started {
            session_id,
            identifier,
            display_name,
            origin,
            total_size,
        } => {
            event_at!(
                level,
                domain,
                session = %session_id,
                identifier = %identifier,
                display_name = %display_name,
                origin = %origin,
                total_size = ?total_size,
                "Delivery started"
            );
        }
        DeliveryEvent::ChunkAcknowledged {
            connection_id,
            number,
        } => {
            event_at!(
                level,
                domain,
                connection = %connection_id,
                number = number,
                "Chunk acknowledged"
            );
        }
        DeliveryEvent::Completed {
            session_id,
            identifier,
            bytes_sent,
            chunks,
            duration,
        } => {
            event_at!(
                level,
                domain,
                session = %session_id,
                identifier = %identifier,
                bytes_sent = bytes_sent,
                chunks = chunks,
                duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                "Delivery completed"
            );
        }
        DeliveryEvent::Failed {
            session_id,
            identifier,
            phase,
            class,
            bytes_sent,
            failure,
        } => {
            event_at!(
                level,
                domain,
                session = %session_id,
                identifier = %identifier,
                phase = %phase,
                class = %class,
                bytes_sent = bytes_sent,
                code = ?failure.code,
                retryable = failure.retryable,
                message = %failure.message,
                hint = ?failure.hint,
                "Delivery failed"
            );
        }
        DeliveryEvent::Cancelled {
            session_id,
            identifier,
            bytes_sent,
        } => {
            event_at!(
                level,
                domain,
                session = %session_id,
                identifier = %identifier,
                bytes_sent = bytes_sent,
                "Delivery cancelled"
            );
        }
        DeliveryEvent::Rejected {
            connection_id,
            failure,
        } => {
            event_at!(
                level,
                domain,
                connection = %connection_id,
                code = ?failure.code,
                message = %failure.message,
                "Request rejected"
            );
        }
    }
}
