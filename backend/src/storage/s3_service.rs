use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};

use super::{ArtifactStore, FetchError};

#[derive(Clone)]
pub struct S3Service {
    client: Client,
}

impl S3Service {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the ambient AWS configuration. With an explicit
    /// endpoint (for example an S3-compatible interop gateway) path-style
    /// addressing is used.
    pub async fn from_env(endpoint_url: Option<&str>) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(url) = endpoint_url {
            builder = builder.endpoint_url(url).force_path_style(true);
        }
        Self::new(Client::from_conf(builder.build()))
    }
}

#[async_trait]
impl ArtifactStore for S3Service {
    async fn fetch(&self, bucket: &str, object: &str) -> Result<Vec<u8>, FetchError> {
        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(object)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(service) if service.err().is_no_such_key() => {
                    FetchError::NotFound {
                        bucket: bucket.to_string(),
                        object: object.to_string(),
                    }
                }
                _ => FetchError::Backend(DisplayErrorContext(&e).to_string()),
            })?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| FetchError::Backend(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }
}
