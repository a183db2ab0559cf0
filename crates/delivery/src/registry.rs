//! Active sessions by connection

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use shipd_errors::{DeliveryError, Error};
use shipd_types::{ConnectionId, SessionId};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveSession {
    session_id: SessionId,
    cancel: CancellationToken,
}

/// Tracks the one active session a connection may have.
///
/// Session tokens are children of a registry-wide token, so shutting the
/// registry down cancels every session at once.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, ActiveSession>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new session to `connection_id`
    ///
    /// # Errors
    ///
    /// Returns `ProtocolViolation` if the connection already has an active
    /// session.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        session_id: SessionId,
    ) -> Result<CancellationToken, Error> {
        match self.sessions.entry(connection_id) {
            Entry::Occupied(_) => {
                Err(DeliveryError::protocol("delivery already in progress").into())
            }
            Entry::Vacant(slot) => {
                let cancel = self.shutdown.child_token();
                slot.insert(ActiveSession {
                    session_id,
                    cancel: cancel.clone(),
                });
                Ok(cancel)
            }
        }
    }

    /// Drop the entry for a finished session.
    ///
    /// A no-op if the connection has since been bound to another session.
    pub fn release(&self, connection_id: ConnectionId, session_id: SessionId) {
        self.sessions
            .remove_if(&connection_id, |_, active| active.session_id == session_id);
    }

    /// Cancel whatever session `connection_id` has, returning its id
    pub fn cancel(&self, connection_id: ConnectionId) -> Option<SessionId> {
        let (_, active) = self.sessions.remove(&connection_id)?;
        active.cancel.cancel();
        Some(active.session_id)
    }

    /// Cancel every session, current and future
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
        self.sessions.clear();
    }

    #[must_use]
    pub fn is_active(&self, connection_id: ConnectionId) -> bool {
        self.sessions.contains_key(&connection_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
