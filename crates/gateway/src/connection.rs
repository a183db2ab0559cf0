//! One admitted WebSocket connection
//!
//! The reader loop decodes client frames and hands them to the delivery
//! service. Everything the connection sends goes through a bounded queue
//! drained by a single writer task, so a slow client pushes back on the
//! session feeding it instead of buffering the whole artifact.

use crate::protocol::{self, DecodeError, Inbound, Outbound};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shipd_delivery::{DeliveryService, DeliverySink};
use shipd_errors::{Error, TransportError, UserFacingError};
use shipd_events::{DeliveryEvent, EventEmitter, EventSender, FailureContext, GatewayEvent};
use shipd_types::{Chunk, ConnectionId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

/// How long a closing connection waits for queued frames to flush
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivery sink that queues frames for the connection's writer task
pub(crate) struct ConnectionSink {
    outbound: mpsc::Sender<Outbound>,
    next_ack: AtomicU64,
}

impl ConnectionSink {
    fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            outbound,
            next_ack: AtomicU64::new(1),
        }
    }

    async fn send(&self, frame: Outbound) -> Result<(), Error> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed.into())
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.outbound.is_closed() {
            Err(TransportError::ConnectionClosed.into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeliverySink for ConnectionSink {
    async fn begin(&self, ack: Option<u64>) -> Result<(), Error> {
        match ack {
            Some(ack) => {
                self.send(Outbound::Reply {
                    ack,
                    result: Ok(()),
                })
                .await
            }
            None => self.ensure_open(),
        }
    }

    async fn reject(&self, ack: Option<u64>, failure: &FailureContext) -> Result<(), Error> {
        match ack {
            Some(ack) => {
                self.send(Outbound::Reply {
                    ack,
                    result: Err(failure.clone()),
                })
                .await
            }
            None => self.ensure_open(),
        }
    }

    async fn chunk(&self, chunk: Chunk) -> Result<(), Error> {
        let ack = self.next_ack.fetch_add(1, Ordering::Relaxed);
        self.send(Outbound::Chunk { ack, chunk }).await
    }

    async fn complete(&self) -> Result<(), Error> {
        self.send(Outbound::Complete).await
    }

    async fn error(&self, failure: &FailureContext) -> Result<(), Error> {
        self.send(Outbound::Error(failure.clone())).await
    }
}

/// Everything a connection needs from the server
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub service: DeliveryService,
    pub tx: EventSender,
    pub outbound_buffer: usize,
}

impl EventEmitter for ConnectionContext {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(&self.tx)
    }
}

/// Serve an admitted connection until the client leaves or `shutdown` fires
pub(crate) async fn serve<S>(
    ws: WebSocketStream<S>,
    connection_id: ConnectionId,
    ctx: ConnectionContext,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, mut read) = ws.split();
    let (outbound, mut queue) = mpsc::channel::<Outbound>(ctx.outbound_buffer.max(1));

    let writer_ctx = ctx.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            let message = match frame.into_message() {
                Ok(message) => message,
                Err(err) => {
                    writer_ctx.emit_warning_with_context(
                        "dropping frame that could not be encoded",
                        err.user_message(),
                    );
                    continue;
                }
            };
            if write.send(message).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let sink = Arc::new(ConnectionSink::new(outbound));
    let reason = loop {
        let message = tokio::select! {
            biased;
            () = shutdown.cancelled() => break Some("server shutting down".to_string()),
            message = read.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                dispatch(text.as_str(), connection_id, &ctx, &sink).await;
            }
            Some(Ok(Message::Binary(_))) => {
                let err = TransportError::MalformedFrame {
                    message: "clients may not send binary frames".to_string(),
                }
                .into();
                ctx.service
                    .refuse(connection_id, None, &err, sink.as_ref())
                    .await;
            }
            Some(Ok(Message::Close(frame))) => {
                break frame
                    .map(|frame| frame.reason.as_str().to_string())
                    .filter(|reason| !reason.is_empty());
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => break Some(err.to_string()),
            None => break None,
        }
    };

    ctx.service.cancel_connection(connection_id);
    drop(sink);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }

    ctx.emit_gateway(GatewayEvent::ConnectionClosed {
        connection_id,
        reason,
    });
}

async fn dispatch(
    text: &str,
    connection_id: ConnectionId,
    ctx: &ConnectionContext,
    sink: &Arc<ConnectionSink>,
) {
    match protocol::decode_text(text) {
        Ok(Inbound::RequestDelivery { ack, payload }) => {
            let _ = ctx
                .service
                .start(connection_id, ack, payload, sink.clone())
                .await;
        }
        Ok(Inbound::ChunkAck { number }) => {
            ctx.emit_delivery(DeliveryEvent::ChunkAcknowledged {
                connection_id,
                number,
            });
        }
        Err(DecodeError { ack, error }) => {
            ctx.service
                .refuse(connection_id, ack, &error, sink.as_ref())
                .await;
        }
    }
}
