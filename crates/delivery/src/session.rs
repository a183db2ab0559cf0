//! The per-request delivery state machine

use crate::accounting::AccountingNotifier;
use crate::framer::ChunkFramer;
use crate::sink::DeliverySink;
use futures::StreamExt;
use shipd_errors::{DeliveryError, Error, UserFacingError};
use shipd_events::{DeliveryEvent, EventEmitter, EventSender, FailureContext};
use shipd_source::{ArtifactCatalog, SourceHandle, SourceProvider};
use shipd_types::{
    ArtifactId, ConnectionId, DeliveryRequest, SessionId, SessionOutcome, SessionState,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Collaborators shared by every session
#[derive(Clone)]
pub struct SessionContext {
    pub provider: Arc<dyn SourceProvider>,
    pub catalog: Arc<dyn ArtifactCatalog>,
    pub accounting: AccountingNotifier,
    pub tx: EventSender,
}

impl EventEmitter for SessionContext {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(&self.tx)
    }
}

/// Why the streaming loop stopped early
enum Abort {
    Cancelled,
    Failed(Error),
}

/// One transfer of one artifact over one connection.
///
/// The session only ever moves forward through
/// `Idle -> Resolving -> Streaming -> Completed`, dropping to `Failed` from
/// either active state. Cancellation is observed before every emission and
/// silences the session for good.
pub struct DeliverySession {
    session_id: SessionId,
    connection_id: ConnectionId,
    request: DeliveryRequest,
    ack: Option<u64>,
    cancel: CancellationToken,
    state: SessionState,
    bytes_sent: u64,
    chunks: u64,
}

impl DeliverySession {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        connection_id: ConnectionId,
        request: DeliveryRequest,
        ack: Option<u64>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            connection_id,
            request,
            ack,
            cancel,
            state: SessionState::Idle,
            bytes_sent: 0,
            chunks: 0,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    fn identifier(&self) -> ArtifactId {
        self.request.identifier().clone()
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid session transition {} -> {next}",
            self.state
        );
        self.state = next;
    }

    /// Drive the session to a terminal state
    pub async fn run(mut self, ctx: &SessionContext, sink: &dyn DeliverySink) -> SessionOutcome {
        let started = Instant::now();
        self.transition(SessionState::Resolving);
        ctx.emit_delivery(DeliveryEvent::Resolving {
            session_id: self.session_id,
            identifier: self.identifier(),
            source: ctx.provider.name().to_string(),
        });

        let cancel = self.cancel.clone();
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            opened = resolve(ctx, &self.request) => Some(opened),
        };

        let handle = match opened {
            None => return self.cancelled(ctx),
            Some(Ok(handle)) => handle,
            Some(Err(err)) => return self.fail_resolution(ctx, sink, err).await,
        };

        if self.cancel.is_cancelled() || sink.begin(self.ack).await.is_err() {
            return self.cancelled(ctx);
        }
        self.transition(SessionState::Streaming);
        ctx.emit_delivery(DeliveryEvent::Started {
            session_id: self.session_id,
            identifier: handle.artifact.identifier.clone(),
            display_name: handle.artifact.label().to_string(),
            origin: handle.origin.to_string(),
            total_size: handle.size,
        });

        let total_size = handle.size;
        match self.stream(handle, sink).await {
            Ok(()) => {}
            Err(Abort::Cancelled) => return self.cancelled(ctx),
            Err(Abort::Failed(err)) => return self.fail_streaming(ctx, sink, err).await,
        }

        if let Some(expected) = total_size {
            if expected != self.bytes_sent {
                let err = DeliveryError::StreamInterrupted {
                    bytes_sent: self.bytes_sent,
                    message: format!("source declared {expected} bytes"),
                };
                return self.fail_streaming(ctx, sink, err.into()).await;
            }
        }

        if self.cancel.is_cancelled() || sink.complete().await.is_err() {
            return self.cancelled(ctx);
        }
        self.transition(SessionState::Completed);

        let identifier = self.identifier();
        ctx.accounting.notify(identifier.clone(), self.bytes_sent);
        ctx.emit_delivery(DeliveryEvent::Completed {
            session_id: self.session_id,
            identifier,
            bytes_sent: self.bytes_sent,
            chunks: self.chunks,
            duration: started.elapsed(),
        });
        self.outcome(None)
    }

    /// Forward framed chunks until the source ends
    async fn stream(&mut self, handle: SourceHandle, sink: &dyn DeliverySink) -> Result<(), Abort> {
        let mut framer = ChunkFramer::new(handle.stream, handle.size);
        let cancel = self.cancel.clone();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Abort::Cancelled),
                next = framer.next() => next,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => return Err(Abort::Failed(self.interruption(err))),
                None => return Ok(()),
            };

            let size = chunk.size();
            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Abort::Cancelled),
                sent = sink.chunk(chunk) => sent,
            };
            if sent.is_err() {
                return Err(Abort::Cancelled);
            }
            self.bytes_sent += size;
            self.chunks += 1;
        }
    }

    /// Classify a mid-stream source error
    fn interruption(&self, err: Error) -> Error {
        match err {
            Error::Delivery(_) | Error::Cancelled => err,
            other => DeliveryError::StreamInterrupted {
                bytes_sent: self.bytes_sent,
                message: other.user_message().into_owned(),
            }
            .into(),
        }
    }

    async fn fail_resolution(
        self,
        ctx: &SessionContext,
        sink: &dyn DeliverySink,
        err: Error,
    ) -> SessionOutcome {
        if self.cancel.is_cancelled() {
            return self.cancelled(ctx);
        }
        let failure = FailureContext::from_error(&err);
        if sink.reject(self.ack, &failure).await.is_err() || sink.error(&failure).await.is_err() {
            return self.cancelled(ctx);
        }
        self.fail(ctx, failure, err)
    }

    async fn fail_streaming(
        self,
        ctx: &SessionContext,
        sink: &dyn DeliverySink,
        err: Error,
    ) -> SessionOutcome {
        if self.cancel.is_cancelled() {
            return self.cancelled(ctx);
        }
        let failure = FailureContext::from_error(&err);
        if sink.error(&failure).await.is_err() {
            return self.cancelled(ctx);
        }
        self.fail(ctx, failure, err)
    }

    fn fail(mut self, ctx: &SessionContext, failure: FailureContext, err: Error) -> SessionOutcome {
        let phase = self.state;
        self.transition(SessionState::Failed);
        ctx.emit_delivery(DeliveryEvent::Failed {
            session_id: self.session_id,
            identifier: self.identifier(),
            phase,
            class: err.class().as_str().to_string(),
            bytes_sent: self.bytes_sent,
            failure,
        });
        self.outcome(Some(err))
    }

    fn cancelled(mut self, ctx: &SessionContext) -> SessionOutcome {
        self.transition(SessionState::Failed);
        ctx.emit_delivery(DeliveryEvent::Cancelled {
            session_id: self.session_id,
            identifier: self.identifier(),
            bytes_sent: self.bytes_sent,
        });
        self.outcome(Some(Error::Cancelled))
    }

    fn outcome(self, error: Option<Error>) -> SessionOutcome {
        let identifier = self.identifier();
        SessionOutcome {
            session_id: self.session_id,
            identifier,
            state: self.state,
            bytes_sent: self.bytes_sent,
            chunks: self.chunks,
            error,
        }
    }
}

/// Resolve the request to an open source, going through the catalog for
/// app-scoped requests
async fn resolve(ctx: &SessionContext, request: &DeliveryRequest) -> Result<SourceHandle, Error> {
    match request {
        DeliveryRequest::Artifact(artifact) => ctx.provider.open(artifact).await,
        DeliveryRequest::AppFile {
            app_identifier,
            file_identifier,
        } => {
            let record = ctx
                .catalog
                .resolve_app_file(app_identifier, file_identifier)
                .await?;
            ctx.provider.open(&record.to_ref()).await
        }
    }
}
