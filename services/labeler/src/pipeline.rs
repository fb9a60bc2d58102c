use crate::config::{AckPolicy, Config};
use crate::error::{with_timeout, PipelineError, Result};
use crate::firestore_store::DocumentStore;
use crate::notification::Notification;
use crate::rekognition::LabelExtractor;
use crate::result_document::ResultDocument;
use crate::s3_fetcher::BlobFetcher;
use crate::sqs_source::{MessageSource, ReceivedMessage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Tunables for the pipeline loop
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Long-poll wait per receive
    pub wait_time: Duration,
    /// Pause after a failed receive
    pub error_backoff: Duration,
    /// Upper bound for every other external call
    pub call_timeout: Duration,
    pub ack_policy: AckPolicy,
    /// Collection receiving result documents
    pub collection: String,
    pub max_labels: i32,
    pub min_confidence: f32,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            wait_time: config.wait_time(),
            error_backoff: config.error_backoff(),
            call_timeout: config.call_timeout(),
            ack_policy: config.queue.ack_policy,
            collection: config.firestore.collection.clone(),
            max_labels: config.rekognition.max_labels,
            min_confidence: config.rekognition.min_confidence,
        }
    }
}

/// What a single iteration did
#[derive(Debug)]
pub enum IterationOutcome {
    /// The wait elapsed without a message
    Empty,
    /// A result document was written
    Stored { image_id: String, tag_count: usize },
    /// The message can never be processed (bad body, missing object)
    Skipped { error: PipelineError },
    /// Processing failed on a transient error
    Failed { error: PipelineError },
    /// The receive call itself failed
    ReceiveFailed { error: PipelineError },
}

impl IterationOutcome {
    fn from_error(error: PipelineError) -> Self {
        if error.is_permanent() {
            Self::Skipped { error }
        } else {
            Self::Failed { error }
        }
    }
}

/// Receive → acknowledge → fetch → extract → transform → persist, one message at a time
pub struct Pipeline {
    source: Arc<dyn MessageSource>,
    fetcher: Arc<dyn BlobFetcher>,
    extractor: Arc<dyn LabelExtractor>,
    store: Arc<dyn DocumentStore>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn MessageSource>,
        fetcher: Arc<dyn BlobFetcher>,
        extractor: Arc<dyn LabelExtractor>,
        store: Arc<dyn DocumentStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            fetcher,
            extractor,
            store,
            settings,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between iterations and while waiting on the
    /// queue; a message that has already been received is always processed to
    /// the end.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            ack_policy = ?self.settings.ack_policy,
            collection = %self.settings.collection,
            "Starting pipeline loop"
        );

        while !shutdown.is_cancelled() {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                received = self.receive() => received,
            };

            let outcome = self.handle_received(received).await;

            if matches!(outcome, IterationOutcome::ReceiveFailed { .. }) {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.settings.error_backoff) => {}
                }
            }
        }

        info!("Pipeline loop stopped");
    }

    /// Receive and fully process at most one message
    pub async fn run_iteration(&self) -> IterationOutcome {
        let received = self.receive().await;
        self.handle_received(received).await
    }

    async fn receive(&self) -> Result<Option<ReceivedMessage>> {
        // The long poll itself may take the whole wait time
        let bound = self.settings.wait_time + self.settings.call_timeout;
        with_timeout("receive", bound, self.source.receive_one(self.settings.wait_time)).await
    }

    async fn handle_received(&self, received: Result<Option<ReceivedMessage>>) -> IterationOutcome {
        match received {
            Ok(Some(message)) => {
                let started = Instant::now();
                metrics::counter!("labeler.messages.received").increment(1);

                let outcome = self.handle_message(message).await;

                metrics::histogram!("labeler.iteration.duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                match &outcome {
                    IterationOutcome::Stored { .. } => {
                        metrics::counter!("labeler.messages.processed").increment(1)
                    }
                    _ => metrics::counter!("labeler.messages.failed").increment(1),
                }

                outcome
            }
            Ok(None) => {
                info!("No messages in queue");
                metrics::counter!("labeler.messages.empty_polls").increment(1);
                IterationOutcome::Empty
            }
            Err(error) => {
                error!(error = %error, "Failed to receive from queue");
                metrics::counter!("labeler.queue.receive_errors").increment(1);
                IterationOutcome::ReceiveFailed { error }
            }
        }
    }

    #[instrument(skip(self, message), fields(message_id = ?message.message_id))]
    async fn handle_message(&self, message: ReceivedMessage) -> IterationOutcome {
        if self.settings.ack_policy == AckPolicy::BeforeProcessing {
            if let Err(error) = self.acknowledge(&message).await {
                error!(error = %error, "Failed to acknowledge message, abandoning it");
                return IterationOutcome::Failed { error };
            }
        }

        let notification = match Notification::parse(&message.body) {
            Ok(notification) => notification,
            Err(error) => {
                error!(error = %error, body = %message.body, "Malformed notification");
                self.settle_failure(&message, &error).await;
                return IterationOutcome::Skipped { error };
            }
        };

        if let Err(error) = notification.validate() {
            error!(
                error = %error,
                bucket = %notification.bucket_name,
                key = %notification.object_key,
                "Bucket or key not found in notification"
            );
            self.settle_failure(&message, &error).await;
            return IterationOutcome::Skipped { error };
        }

        match self.process(&notification).await {
            Ok(document) => {
                info!(
                    bucket = %notification.bucket_name,
                    key = %notification.object_key,
                    image_id = %document.image_id,
                    tag_count = document.tags.len(),
                    "Labeling result saved"
                );

                if self.settings.ack_policy == AckPolicy::AfterSuccess {
                    if let Err(error) = self.acknowledge(&message).await {
                        // The document is already stored; redelivery overwrites it
                        warn!(error = %error, "Failed to acknowledge processed message");
                    }
                }

                IterationOutcome::Stored {
                    image_id: document.image_id,
                    tag_count: document.tags.len(),
                }
            }
            Err(error) => {
                error!(
                    error = %error,
                    kind = error.kind(),
                    bucket = %notification.bucket_name,
                    key = %notification.object_key,
                    image_id = %notification.image_id(),
                    "Failed to process notification"
                );
                self.settle_failure(&message, &error).await;
                IterationOutcome::from_error(error)
            }
        }
    }

    /// Fetch, label, transform and persist one validated notification
    async fn process(&self, notification: &Notification) -> Result<ResultDocument> {
        let timeout = self.settings.call_timeout;
        let image_id = notification.image_id();

        let image = with_timeout(
            "fetch",
            timeout,
            self.fetcher
                .fetch(&notification.bucket_name, &notification.object_key),
        )
        .await?;

        debug!(image_id = %image_id, size_bytes = image.len(), "Fetched image");

        let labels = with_timeout(
            "detect_labels",
            timeout,
            self.extractor.detect_labels(
                image,
                self.settings.max_labels,
                self.settings.min_confidence,
            ),
        )
        .await?;

        info!(image_id = %image_id, label_count = labels.len(), "Detected labels");
        metrics::counter!("labeler.labels.detected").increment(labels.len() as u64);

        let document = ResultDocument::from_labels(image_id, &labels);

        with_timeout(
            "upsert",
            timeout,
            self.store
                .upsert(&self.settings.collection, image_id, &document),
        )
        .await?;

        Ok(document)
    }

    async fn acknowledge(&self, message: &ReceivedMessage) -> Result<()> {
        with_timeout(
            "acknowledge",
            self.settings.call_timeout,
            self.source.acknowledge(&message.ack_token),
        )
        .await?;

        metrics::counter!("labeler.messages.acknowledged").increment(1);
        Ok(())
    }

    /// Under `AfterSuccess`, drop messages that will never succeed; leave the rest for redelivery
    async fn settle_failure(&self, message: &ReceivedMessage, error: &PipelineError) {
        if self.settings.ack_policy != AckPolicy::AfterSuccess {
            return;
        }

        if error.is_permanent() {
            if let Err(ack_error) = self.acknowledge(message).await {
                warn!(error = %ack_error, "Failed to acknowledge unprocessable message");
            }
        } else {
            debug!("Leaving message on the queue for redelivery");
        }
    }
}
