pub mod local_store;
pub mod s3_service;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid artifact location: {0}")]
    InvalidLocation(String),
    #[error("Object {bucket}/{object} does not exist")]
    NotFound { bucket: String, object: String },
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Checksum mismatch for {object}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        object: String,
        expected: String,
        actual: String,
    },
}

/// Remote blob storage, used only while the service starts up.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn fetch(&self, bucket: &str, object: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct ArtifactFetcher {
    store: Box<dyn ArtifactStore>,
    bucket: String,
}

impl ArtifactFetcher {
    pub fn new(store: Box<dyn ArtifactStore>, bucket: String) -> Self {
        Self { store, bucket }
    }

    pub fn calculate_digest(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Downloads `object` into `dest`, replacing whatever was there.
    pub async fn fetch_to(
        &self,
        object: &str,
        dest: &Path,
        expected_sha256: Option<&str>,
    ) -> Result<(), FetchError> {
        if self.bucket.is_empty() || object.is_empty() {
            return Err(FetchError::InvalidLocation(format!(
                "bucket '{}' object '{}'",
                self.bucket, object
            )));
        }

        let data = self.store.fetch(&self.bucket, object).await?;
        let digest = Self::calculate_digest(&data);

        if let Some(expected) = expected_sha256 {
            if !expected.eq_ignore_ascii_case(&digest) {
                return Err(FetchError::ChecksumMismatch {
                    object: object.to_string(),
                    expected: expected.to_string(),
                    actual: digest,
                });
            }
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| FetchError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(dest, &data)
            .await
            .map_err(|source| FetchError::Io {
                path: dest.to_path_buf(),
                source,
            })?;

        log::info!(
            "Fetched {}/{} -> {} ({} bytes, sha256 {})",
            self.bucket,
            object,
            dest.display(),
            data.len(),
            digest
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// In-memory store keyed by `bucket/object`.
    #[derive(Default)]
    pub struct MemoryStore {
        objects: HashMap<String, Vec<u8>>,
    }

    impl MemoryStore {
        pub fn with(mut self, bucket: &str, object: &str, data: impl Into<Vec<u8>>) -> Self {
            self.objects
                .insert(format!("{}/{}", bucket, object), data.into());
            self
        }
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn fetch(&self, bucket: &str, object: &str) -> Result<Vec<u8>, FetchError> {
            self.objects
                .get(&format!("{}/{}", bucket, object))
                .cloned()
                .ok_or_else(|| FetchError::NotFound {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                })
        }
    }
}
