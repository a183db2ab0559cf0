//! Listener and accept loop

use crate::admission::{admit, rejection_response};
use crate::connection::{self, ConnectionContext};
use shipd_config::ServerConfig;
use shipd_delivery::DeliveryService;
use shipd_errors::{Error, TransportError};
use shipd_events::{EventEmitter, EventSender, GatewayEvent};
use shipd_types::ConnectionId;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The transport gateway: accepts WebSocket clients on the delivery
/// namespace and hands their requests to a [`DeliveryService`]
pub struct DeliveryServer {
    listener: TcpListener,
    namespace: String,
    max_connections: usize,
    limiter: Arc<Semaphore>,
    ctx: ConnectionContext,
}

impl DeliveryServer {
    /// Bind the listener described by `config`
    ///
    /// # Errors
    ///
    /// Returns `BindFailed` if the address cannot be bound.
    pub async fn bind(
        config: &ServerConfig,
        service: DeliveryService,
        tx: EventSender,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|e| TransportError::BindFailed {
                addr: config.listen.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            listener,
            namespace: config.namespace.clone(),
            max_connections: config.max_connections,
            limiter: Arc::new(Semaphore::new(config.max_connections)),
            ctx: ConnectionContext {
                service,
                tx,
                outbound_buffer: config.outbound_buffer,
            },
        })
    }

    /// Address actually bound, useful when listening on port 0
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled, then cancel every
    /// session and give open connections a grace period to close.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener address cannot be read.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Error> {
        let addr = self.local_addr()?;
        self.ctx.emit_gateway(GatewayEvent::Listening {
            addr: addr.to_string(),
            namespace: self.namespace.clone(),
        });

        let admission = Arc::new(Admission {
            namespace: self.namespace.clone(),
            max_connections: self.max_connections,
        });
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let permit = self.limiter.clone().try_acquire_owned().ok();
                        connections.spawn(accept_connection(
                            stream,
                            peer,
                            permit,
                            admission.clone(),
                            self.ctx.clone(),
                            shutdown.child_token(),
                        ));
                    }
                    Err(err) => {
                        self.ctx.emit_gateway(GatewayEvent::ListenerFailed {
                            error: err.to_string(),
                        });
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }

        self.ctx.emit_gateway(GatewayEvent::ShuttingDown {
            active_sessions: self.ctx.service.active_sessions(),
        });
        self.ctx.service.shutdown();

        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            connections.abort_all();
        }
        Ok(())
    }
}

struct Admission {
    namespace: String,
    max_connections: usize,
}

async fn accept_connection(
    stream: TcpStream,
    peer: SocketAddr,
    permit: Option<OwnedSemaphorePermit>,
    admission: Arc<Admission>,
    ctx: ConnectionContext,
    shutdown: CancellationToken,
) {
    let mut refused: Option<TransportError> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let verdict = if permit.is_some() {
            admit(request.uri(), &admission.namespace)
        } else {
            Err(TransportError::CapacityExhausted {
                limit: admission.max_connections,
            })
        };
        verdict.map(|()| response).map_err(|err| {
            let response = rejection_response(&err);
            refused = Some(err);
            response
        })
    };

    let handshake = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::accept_hdr_async(stream, callback),
    )
    .await;

    let ws = match handshake {
        Ok(Ok(ws)) => ws,
        Ok(Err(err)) => {
            let reason = refused.map_or_else(|| err.to_string(), |refusal| refusal.to_string());
            ctx.emit_gateway(GatewayEvent::AdmissionRejected {
                peer: peer.to_string(),
                reason,
            });
            return;
        }
        Err(_) => {
            ctx.emit_gateway(GatewayEvent::AdmissionRejected {
                peer: peer.to_string(),
                reason: "handshake timed out".to_string(),
            });
            return;
        }
    };

    let connection_id = ConnectionId::new();
    ctx.emit_gateway(GatewayEvent::ConnectionAdmitted {
        connection_id,
        peer: peer.to_string(),
    });
    connection::serve(ws, connection_id, ctx, shutdown).await;
    drop(permit);
}
