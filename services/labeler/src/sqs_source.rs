use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client as SqsClient;
use aws_types::SdkConfig;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Opaque handle used to delete a received message
#[derive(Clone, PartialEq, Eq)]
pub struct AckToken(String);

impl AckToken {
    pub fn new(receipt_handle: impl Into<String>) -> Self {
        Self(receipt_handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Only the tail of the receipt handle is logged
impl fmt::Debug for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AckToken(..{})", tail(&self.0, 8))
    }
}

/// A message pulled from the queue, not yet parsed
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: Option<String>,
    pub body: String,
    pub ack_token: AckToken,
}

/// Pull-based notification queue
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Receive at most one message, long-polling for up to `wait`.
    ///
    /// `Ok(None)` means the wait elapsed with nothing available.
    async fn receive_one(&self, wait: Duration) -> Result<Option<ReceivedMessage>>;

    /// Permanently remove a received message from the queue
    async fn acknowledge(&self, token: &AckToken) -> Result<()>;
}

/// Message source backed by an SQS queue
pub struct SqsMessageSource {
    client: SqsClient,
    queue_url: String,
}

impl SqsMessageSource {
    pub fn new(aws_config: &SdkConfig, queue_url: impl Into<String>) -> Self {
        let client = SqsClient::new(aws_config);
        let queue_url = queue_url.into();

        info!(queue_url = %queue_url, "SQS message source initialized");

        Self { client, queue_url }
    }
}

#[async_trait]
impl MessageSource for SqsMessageSource {
    #[instrument(skip(self))]
    async fn receive_one(&self, wait: Duration) -> Result<Option<ReceivedMessage>> {
        let wait_secs = i32::try_from(wait.as_secs()).unwrap_or(20).min(20);

        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(wait_secs)
            .send()
            .await
            .map_err(|e| PipelineError::transport("sqs receive_message", DisplayErrorContext(&e)))?;

        let Some(message) = response.messages().first() else {
            return Ok(None);
        };

        let receipt_handle = message.receipt_handle().ok_or_else(|| {
            PipelineError::transport("sqs receive_message", "message has no receipt handle")
        })?;

        debug!(message_id = ?message.message_id(), "Received message");

        Ok(Some(ReceivedMessage {
            message_id: message.message_id().map(String::from),
            body: message.body().unwrap_or_default().to_string(),
            ack_token: AckToken::new(receipt_handle),
        }))
    }

    #[instrument(skip(self))]
    async fn acknowledge(&self, token: &AckToken) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(token.as_str())
            .send()
            .await
            .map_err(|e| PipelineError::transport("sqs delete_message", DisplayErrorContext(&e)))?;

        Ok(())
    }
}

fn tail(s: &str, n: usize) -> &str {
    let start = s
        .char_indices()
        .rev()
        .nth(n.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    &s[start..]
}
