use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client as S3Client;
use aws_types::SdkConfig;
use bytes::Bytes;
use tracing::{debug, info, instrument};

/// Object store read access
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Fetch the whole object into memory
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes>;
}

/// Blob fetcher for S3 objects
pub struct S3Fetcher {
    client: S3Client,
}

impl S3Fetcher {
    /// Create a new S3 fetcher from the shared AWS configuration
    pub fn new(aws_config: &SdkConfig, force_path_style: bool) -> Self {
        let mut s3_config_builder = S3ConfigBuilder::from(aws_config);

        // Force path-style access for LocalStack/MinIO compatibility
        if force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            region = ?aws_config.region(),
            force_path_style,
            "S3 fetcher initialized"
        );

        Self { client }
    }
}

#[async_trait]
impl BlobFetcher for S3Fetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let response = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Err(PipelineError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }
                return Err(PipelineError::transport(
                    "s3 get_object",
                    DisplayErrorContext(&e),
                ));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::transport("s3 read body", e))?
            .into_bytes();

        debug!(size_bytes = data.len(), "Object fetched from S3");

        Ok(data)
    }
}
