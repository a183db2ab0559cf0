//! Entry point the transport uses to start and stop sessions

use crate::accounting::{
    AccountingCollaborator, AccountingNotifier, DownloadLedger, HttpAccounting,
};
use crate::registry::SessionRegistry;
use crate::session::{DeliverySession, SessionContext};
use crate::sink::DeliverySink;
use shipd_config::Config;
use shipd_errors::{Error, UserFacingError};
use shipd_events::{DeliveryEvent, EventEmitter, EventSender, FailureContext};
use shipd_net::NetClient;
use shipd_source::{build_provider, net_config, ArtifactCatalog, SourceProvider, StaticCatalog};
use shipd_types::{ConnectionId, DeliveryRequest, RequestPayload, SessionId, SessionOutcome};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Starts delivery sessions and keeps track of which connection owns which
#[derive(Clone)]
pub struct DeliveryService {
    ctx: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
}

impl DeliveryService {
    #[must_use]
    pub fn new(
        provider: Arc<dyn SourceProvider>,
        catalog: Arc<dyn ArtifactCatalog>,
        accounting: AccountingNotifier,
        tx: EventSender,
    ) -> Self {
        Self {
            ctx: Arc::new(SessionContext {
                provider,
                catalog,
                accounting,
                tx,
            }),
            registry: Arc::new(SessionRegistry::new()),
        }
    }

    /// Wire up catalog, provider, and accounting from configuration.
    ///
    /// Returns the service and the accounting worker handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file cannot be loaded or the source
    /// provider cannot be built.
    pub async fn from_config(
        config: &Config,
        tx: EventSender,
    ) -> Result<(Self, JoinHandle<()>), Error> {
        let catalog: Arc<dyn ArtifactCatalog> = match &config.catalog.path {
            Some(path) => Arc::new(StaticCatalog::load(path).await?),
            None => Arc::new(StaticCatalog::permissive()),
        };

        let provider = build_provider(config, catalog.clone(), &tx)?;

        let collaborator: Arc<dyn AccountingCollaborator> = match &config.accounting.endpoint {
            Some(endpoint) => Arc::new(HttpAccounting::new(
                NetClient::new(net_config(config))?,
                endpoint.clone(),
            )),
            None => Arc::new(DownloadLedger::new()),
        };
        let (accounting, worker) =
            AccountingNotifier::spawn(collaborator, config.accounting.queue_capacity, tx.clone());

        Ok((Self::new(provider, catalog, accounting, tx), worker))
    }

    /// Handle a `request-delivery` from `connection_id`.
    ///
    /// A malformed request is answered on `sink` with a protocol violation,
    /// as a reply followed by `delivery-error`. While the connection is
    /// already streaming, refusals go out through the reply alone so the
    /// running delivery's event stream stays untouched. Otherwise a session
    /// task is spawned and its handle returned.
    pub async fn start(
        &self,
        connection_id: ConnectionId,
        ack: Option<u64>,
        payload: RequestPayload,
        sink: Arc<dyn DeliverySink>,
    ) -> Option<JoinHandle<SessionOutcome>> {
        let request = match DeliveryRequest::try_from(payload) {
            Ok(request) => request,
            Err(err) => {
                let err = Error::from(err);
                self.refuse(connection_id, ack, &err, sink.as_ref()).await;
                return None;
            }
        };

        let session_id = SessionId::new();
        let cancel = match self.registry.register(connection_id, session_id) {
            Ok(cancel) => cancel,
            Err(err) => {
                self.refuse(connection_id, ack, &err, sink.as_ref()).await;
                return None;
            }
        };

        self.ctx.emit_delivery(DeliveryEvent::Requested {
            session_id,
            connection_id,
            identifier: request.identifier().clone(),
        });

        let session = DeliverySession::new(session_id, connection_id, request, ack, cancel);
        let ctx = self.ctx.clone();
        let registry = self.registry.clone();
        Some(tokio::spawn(async move {
            let outcome = session.run(&ctx, sink.as_ref()).await;
            registry.release(connection_id, session_id);
            if let Some(err) = &outcome.error {
                tracing::debug!(
                    session = %session_id,
                    state = %outcome.state,
                    error = %err.user_message(),
                    "session ended"
                );
            }
            outcome
        }))
    }

    /// Answer a request or frame that could not be turned into a session
    pub async fn refuse(
        &self,
        connection_id: ConnectionId,
        ack: Option<u64>,
        err: &Error,
        sink: &dyn DeliverySink,
    ) {
        self.ctx.emit_rejected(connection_id, err);
        let failure = FailureContext::from_error(err);
        if sink.reject(ack, &failure).await.is_err() {
            return;
        }
        if !self.is_busy(connection_id) {
            let _ = sink.error(&failure).await;
        }
    }

    /// Cancel the session bound to a closing connection
    pub fn cancel_connection(&self, connection_id: ConnectionId) -> bool {
        self.registry.cancel(connection_id).is_some()
    }

    /// Cancel every session; new sessions start already cancelled
    pub fn shutdown(&self) {
        self.registry.cancel_all();
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn is_busy(&self, connection_id: ConnectionId) -> bool {
        self.registry.is_active(connection_id)
    }
}
