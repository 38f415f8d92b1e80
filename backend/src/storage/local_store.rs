use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;

use super::{ArtifactStore, FetchError};

/// Serves artifacts from a directory laid out as `<root>/<bucket>/<object>`.
#[derive(Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn fetch(&self, bucket: &str, object: &str) -> Result<Vec<u8>, FetchError> {
        if object.split('/').any(|part| part == "..") {
            return Err(FetchError::InvalidLocation(object.to_string()));
        }
        let path = self.root.join(bucket).join(object);
        tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                FetchError::NotFound {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                }
            } else {
                FetchError::Io { path, source }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn reads_from_bucket_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bucket/models")).unwrap();
        std::fs::write(dir.path().join("bucket/models/labels.json"), b"[\"a\"]").unwrap();

        let store = LocalArtifactStore::new(dir.path().to_path_buf());
        let data = store.fetch("bucket", "models/labels.json").await.unwrap();
        assert_eq!(data, b"[\"a\"]");

        let err = store.fetch("bucket", "models/missing.json").await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound { .. }));
    }

    #[actix_web::test]
    async fn rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path().to_path_buf());
        let err = store.fetch("bucket", "../secret").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidLocation(_)));
    }
}
