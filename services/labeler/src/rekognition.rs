use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use aws_sdk_rekognition::error::DisplayErrorContext;
use aws_sdk_rekognition::primitives::Blob;
use aws_sdk_rekognition::types::Image;
use aws_sdk_rekognition::Client as RekognitionClient;
use aws_types::SdkConfig;
use bytes::Bytes;
use tracing::{debug, info, instrument};

/// A label detected in an image
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub name: String,
    /// Confidence in percent (0-100)
    pub confidence: f64,
    pub categories: Vec<String>,
}

/// Image classification capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelExtractor: Send + Sync {
    /// Detect up to `max_labels` labels with at least `min_confidence`.
    ///
    /// Both limits are applied by the service and passed through unchanged.
    async fn detect_labels(
        &self,
        image: Bytes,
        max_labels: i32,
        min_confidence: f32,
    ) -> Result<Vec<Label>>;
}

/// Label extractor backed by AWS Rekognition DetectLabels
pub struct RekognitionExtractor {
    client: RekognitionClient,
}

impl RekognitionExtractor {
    pub fn new(aws_config: &SdkConfig) -> Self {
        let client = RekognitionClient::new(aws_config);

        info!(
            region = ?aws_config.region(),
            "Rekognition label extractor initialized"
        );

        Self { client }
    }
}

#[async_trait]
impl LabelExtractor for RekognitionExtractor {
    #[instrument(skip(self, image), fields(size_bytes = image.len()))]
    async fn detect_labels(
        &self,
        image: Bytes,
        max_labels: i32,
        min_confidence: f32,
    ) -> Result<Vec<Label>> {
        let response = self
            .client
            .detect_labels()
            .image(Image::builder().bytes(Blob::new(image.to_vec())).build())
            .max_labels(max_labels)
            .min_confidence(min_confidence)
            .send()
            .await
            .map_err(|e| PipelineError::Extraction(DisplayErrorContext(&e).to_string()))?;

        let labels: Vec<Label> = response
            .labels()
            .iter()
            .map(|label| Label {
                name: label.name().unwrap_or_default().to_string(),
                confidence: label.confidence().map(widen_confidence).unwrap_or(0.0),
                categories: label
                    .categories()
                    .iter()
                    .filter_map(|c| c.name())
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect(),
            })
            .collect();

        debug!(label_count = labels.len(), "Detected labels");

        Ok(labels)
    }
}

/// Widen an f32 confidence to f64 without picking up binary noise (98.2 stays 98.2)
fn widen_confidence(confidence: f32) -> f64 {
    confidence
        .to_string()
        .parse()
        .unwrap_or_else(|_| f64::from(confidence))
}
