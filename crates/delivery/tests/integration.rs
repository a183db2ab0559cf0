//! Integration tests for delivery crate

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::{self, StreamExt};
    use httpmock::prelude::*;
    use shipd_delivery::*;
    use shipd_errors::{Error, TransportError};
    use shipd_events::{channel, AppEvent, DeliveryEvent, EventReceiver, FailureContext};
    use shipd_net::{NetClient, NetConfig, StreamLimits};
    use shipd_source::{
        ArtifactCatalog, LocalFileProvider, RemoteProxyProvider, SourceHandle, SourceOrigin,
        SourceProvider, StaticCatalog,
    };
    use shipd_store::ArtifactStore;
    use shipd_types::{
        ArtifactId, ArtifactRecord, ArtifactRef, Chunk, ConnectionId, RequestPayload, SessionState,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Debug, Clone, PartialEq)]
    enum Frame {
        Begin(Option<u64>),
        Reject(Option<u64>, FailureContext),
        Chunk(Chunk),
        Complete,
        Error(FailureContext),
    }

    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<Frame>>,
        closed: AtomicBool,
    }

    impl RecordingSink {
        fn frames(&self) -> Vec<Frame> {
            self.frames.lock().unwrap().clone()
        }

        fn push(&self, frame: Frame) -> Result<(), Error> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::ConnectionClosed.into());
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }

        async fn wait_for(&self, count: usize) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.frames.lock().unwrap().len() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("sink never received enough frames");
        }
    }

    #[async_trait]
    impl DeliverySink for RecordingSink {
        async fn begin(&self, ack: Option<u64>) -> Result<(), Error> {
            self.push(Frame::Begin(ack))
        }
        async fn reject(&self, ack: Option<u64>, failure: &FailureContext) -> Result<(), Error> {
            self.push(Frame::Reject(ack, failure.clone()))
        }
        async fn chunk(&self, chunk: Chunk) -> Result<(), Error> {
            self.push(Frame::Chunk(chunk))
        }
        async fn complete(&self) -> Result<(), Error> {
            self.push(Frame::Complete)
        }
        async fn error(&self, failure: &FailureContext) -> Result<(), Error> {
            self.push(Frame::Error(failure.clone()))
        }
    }

    /// Provider producing whatever the closure builds
    struct ScriptedProvider<F>(F);

    #[async_trait]
    impl<F> SourceProvider for ScriptedProvider<F>
    where
        F: Fn(&ArtifactRef) -> SourceHandle + Send + Sync,
    {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn open(&self, artifact: &ArtifactRef) -> Result<SourceHandle, Error> {
            Ok((self.0)(artifact))
        }
    }

    /// Sets the flag when the source stream is dropped
    struct ReleaseFlag(Arc<AtomicBool>);

    impl Drop for ReleaseFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        service: DeliveryService,
        ledger: Arc<DownloadLedger>,
        worker: tokio::task::JoinHandle<()>,
        events: EventReceiver,
        _temp: Option<TempDir>,
    }

    impl Harness {
        fn new(provider: Arc<dyn SourceProvider>, catalog: Arc<dyn ArtifactCatalog>) -> Self {
            let (tx, events) = channel();
            let ledger = Arc::new(DownloadLedger::new());
            let (accounting, worker) = AccountingNotifier::spawn(ledger.clone(), 16, tx.clone());
            Self {
                service: DeliveryService::new(provider, catalog, accounting, tx),
                ledger,
                worker,
                events,
                _temp: None,
            }
        }

        /// Local storage holding `abc123` (10 bytes), read 6 bytes at a time
        async fn local() -> Self {
            let temp = tempdir().unwrap();
            tokio::fs::write(temp.path().join("abc123"), b"0123456789")
                .await
                .unwrap();
            let catalog: Arc<dyn ArtifactCatalog> =
                Arc::new(StaticCatalog::new([record("abc123", "com.example.app", true)]));
            let provider =
                LocalFileProvider::new(ArtifactStore::new(temp.path()), catalog.clone(), 6);
            let mut harness = Self::new(Arc::new(provider), catalog);
            harness._temp = Some(temp);
            harness
        }

        /// Stop accepting work and wait for accounting to drain
        async fn finish(self) -> (Arc<DownloadLedger>, Vec<AppEvent>) {
            let Harness {
                service,
                ledger,
                worker,
                mut events,
                ..
            } = self;
            drop(service);
            worker.await.unwrap();
            let mut seen = Vec::new();
            while let Ok(event) = events.try_recv() {
                seen.push(event);
            }
            (ledger, seen)
        }
    }

    fn record(id: &str, app: &str, enabled: bool) -> ArtifactRecord {
        ArtifactRecord {
            identifier: ArtifactId::parse(id).unwrap(),
            display_name: "app.apk".to_string(),
            declared_type: Some("apk".to_string()),
            owning_app: app.to_string(),
            download_enabled: enabled,
            path: None,
            remote_ref: None,
        }
    }

    fn proxy(base_url: String, limits: StreamLimits) -> RemoteProxyProvider {
        let (tx, _rx) = channel();
        let client = NetClient::new(NetConfig {
            retry_count: 0,
            ..NetConfig::default()
        })
        .unwrap();
        RemoteProxyProvider::new(client, base_url, limits, tx)
    }

    /// Upstream that announces 100 bytes, sends 10, then goes silent
    async fn stalling_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n0123456789")
                .await
                .unwrap();
            futures::future::pending::<()>().await;
        });
        format!("http://{addr}/files")
    }

    fn failed_class(events: &[AppEvent]) -> Option<&str> {
        events.iter().find_map(|e| match e {
            AppEvent::Delivery(DeliveryEvent::Failed { class, .. }) => Some(class.as_str()),
            _ => None,
        })
    }

    fn request(id: &str) -> RequestPayload {
        RequestPayload {
            identifier: Some(id.to_string()),
            display_name: Some("app.apk".to_string()),
            ..RequestPayload::default()
        }
    }

    fn chunks(frames: &[Frame]) -> Vec<&Chunk> {
        frames
            .iter()
            .filter_map(|f| match f {
                Frame::Chunk(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_local_delivery_in_two_chunks() {
        let harness = Harness::local().await;
        let sink = Arc::new(RecordingSink::default());

        let outcome = harness
            .service
            .start(ConnectionId::new(), Some(7), request("abc123"), sink.clone())
            .await
            .unwrap()
            .await
            .unwrap();

        assert!(outcome.is_completed());
        assert_eq!(outcome.bytes_sent, 10);
        assert_eq!(outcome.chunks, 2);

        let frames = sink.frames();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], Frame::Begin(Some(7)));
        let sent = chunks(&frames);
        assert_eq!(
            sent.iter()
                .map(|c| (c.number, c.size(), c.total_size))
                .collect::<Vec<_>>(),
            vec![(1, 6, Some(10)), (2, 4, Some(10))]
        );
        assert_eq!(frames[3], Frame::Complete);

        let (ledger, events) = harness.finish().await;
        let entry = ledger
            .entry(&ArtifactId::parse("abc123").unwrap())
            .unwrap();
        assert_eq!((entry.downloads, entry.bytes_sent), (1, 10));
        assert!(events.iter().any(|e| matches!(
            e,
            AppEvent::Delivery(DeliveryEvent::Completed { bytes_sent: 10, chunks: 2, .. })
        )));
    }

    #[tokio::test]
    async fn test_missing_artifact_never_reaches_accounting() {
        let harness = Harness::local().await;
        let sink = Arc::new(RecordingSink::default());

        let outcome = harness
            .service
            .start(ConnectionId::new(), Some(1), request("ghost"), sink.clone())
            .await
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome.state, SessionState::Failed);
        let frames = sink.frames();
        assert_eq!(frames.len(), 2);
        match (&frames[0], &frames[1]) {
            (Frame::Reject(Some(1), reply), Frame::Error(event)) => {
                assert_eq!(reply.code.as_deref(), Some("delivery.not_found"));
                assert_eq!(reply, event);
            }
            other => panic!("unexpected frames {other:?}"),
        }

        let (ledger, events) = harness.finish().await;
        assert_eq!(ledger.total_downloads(), 0);
        assert_eq!(failed_class(&events), Some("resolution"));
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_connection_usable() {
        let harness = Harness::local().await;
        let sink = Arc::new(RecordingSink::default());
        let conn = ConnectionId::new();

        let handle = harness
            .service
            .start(conn, Some(3), RequestPayload::default(), sink.clone())
            .await;
        assert!(handle.is_none());

        let frames = sink.frames();
        assert!(matches!(
            &frames[..],
            [Frame::Reject(Some(3), f), Frame::Error(_)]
                if f.code.as_deref() == Some("delivery.protocol_violation")
        ));

        // Same connection can still request a delivery
        let outcome = harness
            .service
            .start(conn, Some(4), request("abc123"), sink.clone())
            .await
            .unwrap()
            .await
            .unwrap();
        assert!(outcome.is_completed());
    }

    #[tokio::test]
    async fn test_two_connections_receive_identical_content() {
        let harness = Harness::local().await;
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());

        let first = harness
            .service
            .start(ConnectionId::new(), None, request("abc123"), a.clone())
            .await
            .unwrap();
        let second = harness
            .service
            .start(ConnectionId::new(), None, request("abc123"), b.clone())
            .await
            .unwrap();
        assert!(first.await.unwrap().is_completed());
        assert!(second.await.unwrap().is_completed());

        let payload = |sink: &RecordingSink| -> Vec<u8> {
            chunks(&sink.frames())
                .iter()
                .flat_map(|c| c.data.to_vec())
                .collect()
        };
        assert_eq!(payload(&a), b"0123456789");
        assert_eq!(payload(&a), payload(&b));

        let (ledger, _) = harness.finish().await;
        assert_eq!(
            ledger
                .entry(&ArtifactId::parse("abc123").unwrap())
                .unwrap()
                .downloads,
            2
        );
    }

    #[tokio::test]
    async fn test_cancellation_stops_emission_and_releases_source() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let provider = ScriptedProvider(move |artifact: &ArtifactRef| {
            let guard = ReleaseFlag(flag.clone());
            // One segment, then stall forever while holding the guard
            let stream = stream::unfold((true, guard), |(first, guard)| async move {
                if first {
                    return Some((Ok::<_, Error>(Bytes::from_static(b"first")), (false, guard)));
                }
                futures::future::pending::<()>().await;
                Some((Ok(Bytes::new()), (false, guard)))
            });
            SourceHandle {
                artifact: artifact.clone(),
                stream: stream.boxed(),
                size: Some(100),
                origin: SourceOrigin::Local,
            }
        });
        let harness = Harness::new(Arc::new(provider), Arc::new(StaticCatalog::permissive()));
        let sink = Arc::new(RecordingSink::default());
        let conn = ConnectionId::new();

        let handle = harness
            .service
            .start(conn, Some(1), request("slow"), sink.clone())
            .await
            .unwrap();
        sink.wait_for(2).await;
        assert!(harness.service.is_busy(conn));

        assert!(harness.service.cancel_connection(conn));
        let outcome = handle.await.unwrap();

        assert!(matches!(outcome.error, Some(Error::Cancelled)));
        assert_eq!(outcome.bytes_sent, 5);
        assert!(released.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let frames = sink.frames();
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[1], Frame::Chunk(_)));

        let (ledger, _) = harness.finish().await;
        assert_eq!(ledger.total_downloads(), 0);
    }

    #[tokio::test]
    async fn test_busy_connection_rejects_second_request() {
        let provider = ScriptedProvider(|artifact: &ArtifactRef| SourceHandle {
            artifact: artifact.clone(),
            stream: stream::pending().boxed(),
            size: None,
            origin: SourceOrigin::Upstream,
        });
        let harness = Harness::new(Arc::new(provider), Arc::new(StaticCatalog::permissive()));
        let sink = Arc::new(RecordingSink::default());
        let conn = ConnectionId::new();

        let running = harness
            .service
            .start(conn, Some(1), request("first"), sink.clone())
            .await
            .unwrap();
        sink.wait_for(1).await;

        let second = harness
            .service
            .start(conn, Some(2), request("second"), sink.clone())
            .await;
        assert!(second.is_none());

        let frames = sink.frames();
        assert_eq!(frames.len(), 2);
        match &frames[1] {
            Frame::Reject(Some(2), failure) => {
                assert!(failure.message.contains("already in progress"));
            }
            other => panic!("unexpected frame {other:?}"),
        }

        harness.service.shutdown();
        assert!(matches!(running.await.unwrap().error, Some(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_closed_sink_is_cancellation() {
        let harness = Harness::local().await;
        let sink = Arc::new(RecordingSink::default());
        sink.closed.store(true, Ordering::SeqCst);

        let outcome = harness
            .service
            .start(ConnectionId::new(), Some(1), request("abc123"), sink.clone())
            .await
            .unwrap()
            .await
            .unwrap();

        assert!(matches!(outcome.error, Some(Error::Cancelled)));
        assert!(sink.frames().is_empty());
        let (ledger, _) = harness.finish().await;
        assert_eq!(ledger.total_downloads(), 0);
    }

    #[tokio::test]
    async fn test_short_source_is_interrupted() {
        let provider = ScriptedProvider(|artifact: &ArtifactRef| SourceHandle {
            artifact: artifact.clone(),
            stream: stream::iter(vec![Ok(Bytes::from_static(b"0123"))]).boxed(),
            size: Some(10),
            origin: SourceOrigin::Upstream,
        });
        let harness = Harness::new(Arc::new(provider), Arc::new(StaticCatalog::permissive()));
        let sink = Arc::new(RecordingSink::default());

        let outcome = harness
            .service
            .start(ConnectionId::new(), None, request("short"), sink.clone())
            .await
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome.state, SessionState::Failed);
        let frames = sink.frames();
        assert!(matches!(
            &frames[..],
            [Frame::Begin(None), Frame::Chunk(_), Frame::Error(f)]
                if f.code.as_deref() == Some("delivery.stream_interrupted") && f.retryable
        ));
        let (ledger, _) = harness.finish().await;
        assert_eq!(ledger.total_downloads(), 0);
    }

    #[tokio::test]
    async fn test_read_error_mid_stream() {
        let provider = ScriptedProvider(|artifact: &ArtifactRef| SourceHandle {
            artifact: artifact.clone(),
            stream: stream::iter(vec![
                Ok(Bytes::from_static(b"ab")),
                Err(Error::internal("disk vanished")),
            ])
            .boxed(),
            size: None,
            origin: SourceOrigin::Local,
        });
        let harness = Harness::new(Arc::new(provider), Arc::new(StaticCatalog::permissive()));
        let sink = Arc::new(RecordingSink::default());

        let outcome = harness
            .service
            .start(ConnectionId::new(), None, request("flaky"), sink.clone())
            .await
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome.bytes_sent, 2);
        let frames = sink.frames();
        assert!(matches!(frames.last(), Some(Frame::Error(_))));
        assert!(!frames.contains(&Frame::Complete));
    }

    #[tokio::test]
    async fn test_unknown_size_completes_with_bytes_sent() {
        let provider = ScriptedProvider(|artifact: &ArtifactRef| SourceHandle {
            artifact: artifact.clone(),
            stream: stream::iter(vec![
                Ok(Bytes::from_static(b"abc")),
                Ok(Bytes::new()),
                Ok(Bytes::from_static(b"de")),
            ])
            .boxed(),
            size: None,
            origin: SourceOrigin::Upstream,
        });
        let harness = Harness::new(Arc::new(provider), Arc::new(StaticCatalog::permissive()));
        let sink = Arc::new(RecordingSink::default());

        let outcome = harness
            .service
            .start(ConnectionId::new(), None, request("stream"), sink.clone())
            .await
            .unwrap()
            .await
            .unwrap();

        assert!(outcome.is_completed());
        let frames = sink.frames();
        let sent = chunks(&frames);
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|c| c.total_size.is_none()));
        assert_eq!(sent.iter().map(|c| c.size()).sum::<u64>(), outcome.bytes_sent);
    }

    #[tokio::test]
    async fn test_app_scoped_request_goes_through_catalog() {
        let harness = Harness::local().await;
        let sink = Arc::new(RecordingSink::default());
        let payload = RequestPayload {
            app_identifier: Some("com.example.app".to_string()),
            file_identifier: Some("abc123".to_string()),
            ..RequestPayload::default()
        };

        let outcome = harness
            .service
            .start(ConnectionId::new(), Some(9), payload, sink.clone())
            .await
            .unwrap()
            .await
            .unwrap();
        assert!(outcome.is_completed());

        let foreign = RequestPayload {
            app_identifier: Some("com.other.app".to_string()),
            file_identifier: Some("abc123".to_string()),
            ..RequestPayload::default()
        };
        let sink = Arc::new(RecordingSink::default());
        let outcome = harness
            .service
            .start(ConnectionId::new(), Some(10), foreign, sink.clone())
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(outcome.state, SessionState::Failed);
        assert!(chunks(&sink.frames()).is_empty());
    }

    #[tokio::test]
    async fn test_upstream_over_ceiling_fails_before_streaming() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/xyz");
                then.status(200).body(vec![1u8; 4096]);
            })
            .await;

        let (tx, _rx) = channel();
        let client = NetClient::new(NetConfig {
            retry_count: 0,
            ..NetConfig::default()
        })
        .unwrap();
        let provider = RemoteProxyProvider::new(
            client,
            server.url("/files"),
            StreamLimits {
                max_content_length: 1024,
                idle_timeout: Duration::from_secs(5),
            },
            tx,
        );
        let harness = Harness::new(Arc::new(provider), Arc::new(StaticCatalog::permissive()));
        let sink = Arc::new(RecordingSink::default());

        let outcome = harness
            .service
            .start(ConnectionId::new(), Some(5), request("xyz"), sink.clone())
            .await
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome.state, SessionState::Failed);
        assert_eq!(outcome.chunks, 0);
        let frames = sink.frames();
        assert!(matches!(
            &frames[..],
            [Frame::Reject(Some(5), f), Frame::Error(_)]
                if f.code.as_deref() == Some("delivery.payload_too_large")
        ));
        let (ledger, _) = harness.finish().await;
        assert_eq!(ledger.total_downloads(), 0);
    }

    #[tokio::test]
    async fn test_app_scoped_request_uses_remote_ref_upstream() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/files/blob-key");
                then.status(200).body("0123456789");
            })
            .await;

        let mut stored = record("abc123", "com.example.app", true);
        stored.remote_ref = Some("blob-key".to_string());
        let provider = proxy(
            server.url("/files"),
            StreamLimits {
                max_content_length: 1024,
                idle_timeout: Duration::from_secs(5),
            },
        );
        let harness = Harness::new(Arc::new(provider), Arc::new(StaticCatalog::new([stored])));
        let sink = Arc::new(RecordingSink::default());
        let payload = RequestPayload {
            app_identifier: Some("com.example.app".to_string()),
            file_identifier: Some("abc123".to_string()),
            ..RequestPayload::default()
        };

        let outcome = harness
            .service
            .start(ConnectionId::new(), Some(2), payload, sink.clone())
            .await
            .unwrap()
            .await
            .unwrap();

        assert!(outcome.is_completed());
        let data: Vec<u8> = chunks(&sink.frames())
            .iter()
            .flat_map(|c| c.data.to_vec())
            .collect();
        assert_eq!(data, b"0123456789");
        mock.assert_hits_async(1).await;

        let (ledger, _) = harness.finish().await;
        let entry = ledger
            .entry(&ArtifactId::parse("abc123").unwrap())
            .unwrap();
        assert_eq!((entry.downloads, entry.bytes_sent), (1, 10));
    }

    #[tokio::test]
    async fn test_stalled_upstream_is_interrupted() {
        let provider = proxy(
            stalling_upstream().await,
            StreamLimits {
                max_content_length: 1024,
                idle_timeout: Duration::from_millis(200),
            },
        );
        let harness = Harness::new(Arc::new(provider), Arc::new(StaticCatalog::permissive()));
        let sink = Arc::new(RecordingSink::default());

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            harness
                .service
                .start(ConnectionId::new(), Some(6), request("abc123"), sink.clone())
                .await
                .unwrap(),
        )
        .await
        .expect("idle timeout never fired")
        .unwrap();

        assert_eq!(outcome.state, SessionState::Failed);
        assert_eq!(outcome.bytes_sent, 10);
        let frames = sink.frames();
        assert_eq!(frames[0], Frame::Begin(Some(6)));
        assert!(matches!(
            frames.last(),
            Some(Frame::Error(f))
                if f.code.as_deref() == Some("delivery.stream_interrupted") && f.retryable
        ));
        let sent = chunks(&frames);
        assert!(sent.iter().all(|c| c.total_size == Some(100)));
        let data: Vec<u8> = sent.iter().flat_map(|c| c.data.to_vec()).collect();
        assert_eq!(data, b"0123456789");

        let (ledger, events) = harness.finish().await;
        assert_eq!(ledger.total_downloads(), 0);
        assert_eq!(failed_class(&events), Some("streaming"));
    }
}
