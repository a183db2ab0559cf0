//! Artifacts streamed from the upstream file server

use crate::{SourceHandle, SourceOrigin, SourceProvider};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use shipd_errors::{DeliveryError, Error, NetworkError, UserFacingError};
use shipd_events::{EventEmitter, EventSender};
use shipd_net::{fetch_stream, join_url, NetClient, StreamLimits};
use shipd_store::{ArtifactStore, MirrorWriter};
use shipd_types::{ArtifactId, ArtifactRef};

/// Proxies artifacts from `{base_url}/{remote key}`, the remote key
/// defaulting to the identifier.
///
/// With a mirror store attached, every body is also written to the store
/// and published there once it ended cleanly.
#[derive(Clone)]
pub struct RemoteProxyProvider {
    client: NetClient,
    base_url: String,
    limits: StreamLimits,
    mirror: Option<ArtifactStore>,
    tx: EventSender,
}

impl RemoteProxyProvider {
    #[must_use]
    pub fn new(
        client: NetClient,
        base_url: impl Into<String>,
        limits: StreamLimits,
        tx: EventSender,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            limits,
            mirror: None,
            tx,
        }
    }

    /// Mirror fetched bodies into `store`
    #[must_use]
    pub fn with_mirror(mut self, store: ArtifactStore) -> Self {
        self.mirror = Some(store);
        self
    }

    async fn begin_mirror(&self, identifier: &ArtifactId) -> Option<MirrorWriter> {
        let store = self.mirror.as_ref()?;
        match store.begin_mirror(identifier).await {
            Ok(writer) => Some(writer),
            Err(e) => {
                self.tx.emit_warning_with_context(
                    format!("mirroring disabled for {identifier}"),
                    e.user_message(),
                );
                None
            }
        }
    }
}

#[async_trait]
impl SourceProvider for RemoteProxyProvider {
    fn name(&self) -> &'static str {
        if self.mirror.is_some() {
            "proxy+mirror"
        } else {
            "proxy"
        }
    }

    async fn open(&self, artifact: &ArtifactRef) -> Result<SourceHandle, Error> {
        let identifier = artifact.identifier.clone();
        let url = join_url(&self.base_url, artifact.upstream_key())
            .map_err(|e| resolution_error(&identifier, e))?;

        let body = fetch_stream(&self.client, url.as_str(), self.limits, &self.tx)
            .await
            .map_err(|e| resolution_error(&identifier, e))?;

        let size = body.content_length;
        let limit = self.limits.max_content_length;
        let mapped_id = identifier.clone();
        let mut stream: BoxStream<'static, Result<Bytes, Error>> = body
            .stream
            .map(move |segment| segment.map_err(|e| streaming_error(&mapped_id, limit, e)))
            .boxed();

        if let Some(writer) = self.begin_mirror(&identifier).await {
            stream = tee_into_mirror(stream, writer, identifier, self.tx.clone());
        }

        Ok(SourceHandle {
            artifact: artifact.clone(),
            stream,
            size,
            origin: SourceOrigin::Upstream,
        })
    }
}

/// Map an open failure onto the resolution error class
fn resolution_error(identifier: &ArtifactId, err: Error) -> Error {
    let identifier = identifier.to_string();
    match err {
        Error::Network(NetworkError::HttpError { status: 404, .. }) => {
            DeliveryError::NotFound { identifier }.into()
        }
        Error::Network(NetworkError::ContentTooLarge { limit, .. }) => {
            DeliveryError::PayloadTooLarge { identifier, limit }.into()
        }
        other => DeliveryError::UpstreamUnavailable {
            identifier,
            message: other.user_message().into_owned(),
        }
        .into(),
    }
}

/// Overflow while streaming keeps its resolution-class meaning; everything
/// else is left for the session to report as an interruption.
fn streaming_error(identifier: &ArtifactId, limit: u64, err: Error) -> Error {
    match err {
        Error::Network(NetworkError::ContentTooLarge { .. }) => DeliveryError::PayloadTooLarge {
            identifier: identifier.to_string(),
            limit,
        }
        .into(),
        other => other,
    }
}

struct Tee {
    inner: BoxStream<'static, Result<Bytes, Error>>,
    writer: Option<MirrorWriter>,
    identifier: ArtifactId,
    tx: EventSender,
}

impl Tee {
    fn abandon(&mut self, reason: &str) {
        if self.writer.take().is_some() {
            self.tx
                .emit_warning_with_context(format!("mirror of {} abandoned", self.identifier), reason);
        }
    }
}

/// Forward segments unchanged while copying them into `writer`.
///
/// The mirror is committed only when the inner stream ends without error;
/// mirror write failures never affect the forwarded stream.
fn tee_into_mirror(
    inner: BoxStream<'static, Result<Bytes, Error>>,
    writer: MirrorWriter,
    identifier: ArtifactId,
    tx: EventSender,
) -> BoxStream<'static, Result<Bytes, Error>> {
    let state = Tee {
        inner,
        writer: Some(writer),
        identifier,
        tx,
    };

    stream::unfold(state, |mut state| async move {
        match state.inner.next().await {
            Some(Ok(segment)) => {
                if let Some(writer) = state.writer.as_mut() {
                    if let Err(e) = writer.write(&segment).await {
                        state.abandon(&e.user_message());
                    }
                }
                Some((Ok(segment), state))
            }
            Some(Err(e)) => {
                state.abandon(&e.user_message());
                Some((Err(e), state))
            }
            None => {
                if let Some(writer) = state.writer.take() {
                    match writer.commit().await {
                        Ok(path) => state.tx.emit_debug(format!(
                            "mirrored {} to {}",
                            state.identifier,
                            path.display()
                        )),
                        Err(e) => state.tx.emit_warning_with_context(
                            format!("mirror of {} not published", state.identifier),
                            e.user_message(),
                        ),
                    }
                }
                None
            }
        }
    })
    .boxed()
}
