//! Integration tests for source crate

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use httpmock::prelude::*;
    use shipd_config::Config;
    use shipd_errors::{DeliveryError, Error};
    use shipd_events::channel;
    use shipd_net::{NetClient, NetConfig, StreamLimits};
    use shipd_source::*;
    use shipd_store::ArtifactStore;
    use shipd_types::{ArtifactId, ArtifactRecord, ArtifactRef, SourceMode};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::fs;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn artifact(id: &str) -> ArtifactRef {
        ArtifactRef::new(ArtifactId::parse(id).unwrap())
    }

    fn record(id: &str, enabled: bool) -> ArtifactRecord {
        ArtifactRecord {
            identifier: ArtifactId::parse(id).unwrap(),
            display_name: format!("{id}.apk"),
            declared_type: Some("apk".to_string()),
            owning_app: "com.example.app".to_string(),
            download_enabled: enabled,
            path: None,
            remote_ref: None,
        }
    }

    async fn segments(handle: SourceHandle) -> Vec<Vec<u8>> {
        handle
            .stream
            .map(|segment| segment.unwrap().to_vec())
            .collect()
            .await
    }

    fn remote(server: &MockServer, limit: u64) -> RemoteProxyProvider {
        proxy(server.url("/files"), limit)
    }

    fn proxy(base_url: String, limit: u64) -> RemoteProxyProvider {
        let (tx, _rx) = channel();
        let client = NetClient::new(NetConfig {
            retry_count: 0,
            ..NetConfig::default()
        })
        .unwrap();
        RemoteProxyProvider::new(
            client,
            base_url,
            StreamLimits {
                max_content_length: limit,
                idle_timeout: Duration::from_secs(5),
            },
            tx,
        )
    }

    /// One-shot upstream answering with a chunked body of `chunks` x 16 bytes
    async fn chunked_upstream(chunks: usize) -> String {
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
            let mut response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
            for _ in 0..chunks {
                response.extend_from_slice(b"10\r\n");
                response.extend_from_slice(&[7u8; 16]);
                response.extend_from_slice(b"\r\n");
            }
            response.extend_from_slice(b"0\r\n\r\n");
            socket.write_all(&response).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/files")
    }

    #[tokio::test]
    async fn test_local_reads_follow_buffer_size() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("abc123"), b"0123456789")
            .await
            .unwrap();

        let catalog = Arc::new(StaticCatalog::new([record("abc123", true)]));
        let provider = LocalFileProvider::new(ArtifactStore::new(temp.path()), catalog, 6);

        let handle = provider.open(&artifact("abc123")).await.unwrap();
        assert_eq!(handle.size, Some(10));
        assert_eq!(handle.origin, SourceOrigin::Local);
        assert_eq!(handle.artifact.display_name.as_deref(), Some("abc123.apk"));

        let parts = segments(handle).await;
        assert_eq!(parts, vec![b"012345".to_vec(), b"6789".to_vec()]);
    }

    #[tokio::test]
    async fn test_local_missing_file_is_not_found() {
        let temp = tempdir().unwrap();
        let catalog = Arc::new(StaticCatalog::permissive());
        let provider = LocalFileProvider::new(ArtifactStore::new(temp.path()), catalog, 64);

        let err = provider.open(&artifact("ghost")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery(DeliveryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_unknown_and_disabled() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("draft01"), b"data").await.unwrap();
        let catalog = Arc::new(StaticCatalog::new([record("draft01", false)]));
        let provider = LocalFileProvider::new(ArtifactStore::new(temp.path()), catalog, 64);

        let err = provider.open(&artifact("draft01")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery(DeliveryError::NotEnabled { .. })
        ));

        let err = provider.open(&artifact("unlisted")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery(DeliveryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_record_path() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("apps")).await.unwrap();
        fs::write(temp.path().join("apps/demo.apk"), b"demo").await.unwrap();

        let mut rec = record("abc123", true);
        rec.path = Some("apps/demo.apk".into());
        let provider = LocalFileProvider::new(
            ArtifactStore::new(temp.path()),
            Arc::new(StaticCatalog::new([rec])),
            64,
        );

        let handle = provider.open(&artifact("abc123")).await.unwrap();
        assert_eq!(segments(handle).await.concat(), b"demo");
    }

    #[tokio::test]
    async fn test_remote_streams_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/abc123");
                then.status(200).body("0123456789");
            })
            .await;

        let handle = remote(&server, 1024).open(&artifact("abc123")).await.unwrap();
        assert_eq!(handle.size, Some(10));
        assert_eq!(handle.origin, SourceOrigin::Upstream);
        assert_eq!(segments(handle).await.concat(), b"0123456789");
    }

    #[tokio::test]
    async fn test_remote_fetches_record_remote_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/files/blob-key");
                then.status(200).body("stored elsewhere");
            })
            .await;

        let mut record = record("abc123", true);
        record.remote_ref = Some("blob-key".to_string());

        let handle = remote(&server, 1024).open(&record.to_ref()).await.unwrap();
        assert_eq!(handle.artifact.identifier.as_str(), "abc123");
        assert_eq!(segments(handle).await.concat(), b"stored elsewhere");
        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_remote_undeclared_overflow_is_payload_too_large() {
        let provider = proxy(chunked_upstream(4).await, 40);

        let handle = provider.open(&artifact("abc123")).await.unwrap();
        assert_eq!(handle.size, None);

        let items: Vec<_> = handle.stream.collect().await;
        let (last, before) = items.split_last().unwrap();
        let delivered: usize = before.iter().map(|i| i.as_ref().unwrap().len()).sum();
        assert!(delivered <= 40);
        assert!(matches!(
            last,
            Err(Error::Delivery(DeliveryError::PayloadTooLarge { limit: 40, .. }))
        ));
    }

    #[tokio::test]
    async fn test_remote_error_mapping() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/missing");
                then.status(404);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/broken");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/xyz");
                then.status(200).body(vec![7u8; 300]);
            })
            .await;

        let provider = remote(&server, 200);

        let err = provider.open(&artifact("missing")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery(DeliveryError::NotFound { .. })
        ));

        let err = provider.open(&artifact("broken")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery(DeliveryError::UpstreamUnavailable { .. })
        ));

        let err = provider.open(&artifact("xyz")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Delivery(DeliveryError::PayloadTooLarge { limit: 200, .. })
        ));
    }

    #[tokio::test]
    async fn test_cache_first_mirrors_then_serves_locally() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/files/abc123");
                then.status(200).body("cached body");
            })
            .await;

        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        let provider = CacheFirstProvider::new(
            store.clone(),
            remote(&server, 1024).with_mirror(store.clone()),
            4,
        );

        let first = provider.open(&artifact("abc123")).await.unwrap();
        assert_eq!(first.origin, SourceOrigin::Upstream);
        assert_eq!(segments(first).await.concat(), b"cached body");
        assert!(store.contains(&ArtifactId::parse("abc123").unwrap()).await);

        let second = provider.open(&artifact("abc123")).await.unwrap();
        assert_eq!(second.origin, SourceOrigin::Cache);
        assert_eq!(second.size, Some(11));
        assert_eq!(segments(second).await.concat(), b"cached body");

        mock.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn test_abandoned_mirror_is_not_published() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/abc123");
                then.status(200).body("0123456789");
            })
            .await;

        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        let provider = remote(&server, 1024).with_mirror(store.clone());

        let handle = provider.open(&artifact("abc123")).await.unwrap();
        drop(handle);

        assert!(!store.contains(&ArtifactId::parse("abc123").unwrap()).await);
    }

    #[test]
    fn test_build_provider_requires_upstream() {
        let (tx, _rx) = channel();
        let mut config = Config::default();
        config.source.mode = SourceMode::Proxy;

        let result = build_provider(&config, Arc::new(StaticCatalog::permissive()), &tx);
        assert!(result.is_err());

        config.upstream.base_url = Some("http://127.0.0.1:1080/files".to_string());
        let provider = build_provider(&config, Arc::new(StaticCatalog::permissive()), &tx).unwrap();
        assert_eq!(provider.name(), "proxy");

        config.source.mode = SourceMode::Local;
        let provider = build_provider(&config, Arc::new(StaticCatalog::permissive()), &tx).unwrap();
        assert_eq!(provider.name(), "local");
    }
}
