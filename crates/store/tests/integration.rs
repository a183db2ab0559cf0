//! Integration tests for store crate

#[cfg(test)]
mod tests {
    use shipd_errors::{Error, StorageError};
    use shipd_store::*;
    use shipd_types::ArtifactId;
    use std::path::Path;
    use tempfile::tempdir;
    use tokio::fs;
    use tokio::io::AsyncReadExt;

    fn id(s: &str) -> ArtifactId {
        ArtifactId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_open_existing_artifact() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        fs::write(temp.path().join("abc123"), b"0123456789")
            .await
            .unwrap();

        let identifier = id("abc123");
        assert!(store.contains(&identifier).await);

        let mut stored = store
            .open(&identifier, &store.artifact_path(&identifier))
            .await
            .unwrap();
        assert_eq!(stored.len, 10);

        let mut content = Vec::new();
        stored.file.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"0123456789");
    }

    #[tokio::test]
    async fn test_open_missing_artifact() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        let identifier = id("nope");

        assert!(!store.contains(&identifier).await);
        let err = store
            .open(&identifier, &store.artifact_path(&identifier))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(StorageError::ArtifactNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_directory_is_not_an_artifact() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        fs::create_dir(temp.path().join("dir")).await.unwrap();

        let identifier = id("dir");
        assert!(!store.contains(&identifier).await);
        assert!(store
            .open(&identifier, &store.artifact_path(&identifier))
            .await
            .is_err());
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let store = ArtifactStore::new("/srv/artifacts");

        assert_eq!(
            store.resolve(Path::new("apps/demo.apk")).unwrap(),
            Path::new("/srv/artifacts/apps/demo.apk")
        );
        assert!(store.resolve(Path::new("../etc/passwd")).is_err());
        assert!(store.resolve(Path::new("/etc/passwd")).is_err());
        assert!(store.resolve(Path::new("")).is_err());
    }

    #[tokio::test]
    async fn test_mirror_commit_publishes_file() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        store.initialize().await.unwrap();
        let identifier = id("abc123");

        let mut writer = store.begin_mirror(&identifier).await.unwrap();
        let partial = writer.partial_path().to_path_buf();
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        assert_eq!(writer.written(), 11);
        assert!(!store.contains(&identifier).await);

        let dest = writer.commit().await.unwrap();
        assert_eq!(dest, store.artifact_path(&identifier));
        assert_eq!(fs::read(&dest).await.unwrap(), b"hello world");
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_dropped_mirror_leaves_nothing_behind() {
        let temp = tempdir().unwrap();
        let store = ArtifactStore::new(temp.path());
        let identifier = id("abc123");

        let mut writer = store.begin_mirror(&identifier).await.unwrap();
        let partial = writer.partial_path().to_path_buf();
        writer.write(b"partial").await.unwrap();
        assert!(partial.exists());

        drop(writer);
        assert!(!partial.exists());
        assert!(!store.contains(&identifier).await);
    }
}
