use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the labeler service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Shared AWS client configuration
    #[serde(default)]
    pub aws: AwsConfig,
    /// SQS queue configuration
    pub queue: QueueConfig,
    /// Label detection configuration
    #[serde(default)]
    pub rekognition: RekognitionConfig,
    /// Firestore document store configuration
    pub firestore: FirestoreConfig,
    /// Pipeline loop configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// AWS configuration shared by the SQS, S3 and Rekognition clients
#[derive(Debug, Clone, Deserialize)]
pub struct AwsConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for LocalStack and similar)
    pub endpoint_url: Option<String>,
    /// Force path-style S3 access
    #[serde(default)]
    pub force_path_style: bool,
}

/// When a received message is deleted from the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Delete on receipt, before any processing. A failed iteration loses the
    /// notification (at-most-once).
    #[default]
    BeforeProcessing,
    /// Delete once the document is stored, or once the message is known to be
    /// unprocessable. Transient failures leave the message for redelivery.
    AfterSuccess,
}

/// SQS queue configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Queue URL
    pub url: String,
    /// Long-poll wait per receive, in seconds (SQS allows 0-20)
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,
    /// Pause after a failed receive, in milliseconds
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Acknowledgment policy
    #[serde(default)]
    pub ack_policy: AckPolicy,
}

/// Rekognition DetectLabels parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RekognitionConfig {
    /// Maximum number of labels returned per image
    #[serde(default = "default_max_labels")]
    pub max_labels: i32,
    /// Minimum confidence (0-100) applied by the service
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

/// Firestore configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FirestoreConfig {
    /// Path to the service account JSON key
    pub credentials_path: PathBuf,
    /// Collection receiving result documents
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Project id override (defaults to the one in the key file)
    pub project_id: Option<String>,
    /// Database id
    #[serde(default = "default_database")]
    pub database: String,
    /// REST API base URL
    #[serde(default = "default_firestore_base_url")]
    pub base_url: String,
}

/// Pipeline loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound for each external call within an iteration, in seconds
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "labeler-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "ap-northeast-1".to_string()
}

fn default_wait_time_secs() -> u64 {
    10
}

fn default_error_backoff_ms() -> u64 {
    1000
}

fn default_max_labels() -> i32 {
    10
}

fn default_min_confidence() -> f32 {
    50.0
}

fn default_collection() -> String {
    "rekognition_results".to_string()
}

fn default_database() -> String {
    "(default)".to_string()
}

fn default_firestore_base_url() -> String {
    "https://firestore.googleapis.com/v1".to_string()
}

fn default_call_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from `.env`, config files and environment
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/labeler").required(false))
            .add_source(config::File::with_name("/etc/labeler/labeler").required(false))
            // LABELER__QUEUE__URL -> queue.url
            .add_source(
                config::Environment::with_prefix("LABELER")
                    .separator("__")
                    .try_parsing(true),
            )
            // Variable names used by existing deployments
            .set_override_option("queue.url", env_var("SQS_QUEUE_URL"))?
            .set_override_option("aws.region", env_var("AWS_REGION"))?
            .set_override_option("firestore.collection", env_var("FIRESTORE_COLLECTION"))?
            .set_override_option(
                "firestore.credentials_path",
                env_var("FIREBASE_CREDENTIALS_PATH"),
            )?
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.queue.url.trim().is_empty() {
            anyhow::bail!("queue.url must not be empty");
        }
        if self.queue.wait_time_secs > 20 {
            anyhow::bail!(
                "queue.wait_time_secs must be at most 20, got {}",
                self.queue.wait_time_secs
            );
        }
        if self.firestore.collection.trim().is_empty() {
            anyhow::bail!("firestore.collection must not be empty");
        }
        // Nested collections alternate collection/document segments, so the count is odd
        let segments: Vec<&str> = self.firestore.collection.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) || segments.len() % 2 == 0 {
            anyhow::bail!(
                "firestore.collection {:?} is not a collection path",
                self.firestore.collection
            );
        }
        Ok(())
    }

    /// Get the receive long-poll wait as Duration
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.queue.wait_time_secs)
    }

    /// Get the receive error backoff as Duration
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.queue.error_backoff_ms)
    }

    /// Get the per-call timeout as Duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.call_timeout_secs)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for RekognitionConfig {
    fn default() -> Self {
        Self {
            max_labels: default_max_labels(),
            min_confidence: default_min_confidence(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_wait_time_secs(), 10);
        assert_eq!(default_max_labels(), 10);
        assert_eq!(default_min_confidence(), 50.0);
        assert_eq!(default_collection(), "rekognition_results");
    }

    #[test]
    fn test_minimal_config() {
        let config = from_toml(
            r#"
            [queue]
            url = "https://sqs.ap-northeast-1.amazonaws.com/123456789012/images"

            [firestore]
            credentials_path = "/secrets/firebase.json"
            "#,
        );

        assert!(config.validate().is_ok());
        assert_eq!(config.queue.ack_policy, AckPolicy::BeforeProcessing);
        assert_eq!(config.wait_time(), Duration::from_secs(10));
        assert_eq!(config.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.firestore.database, "(default)");
        assert_eq!(config.service.name, "labeler-service");
    }

    #[test]
    fn test_ack_policy_and_validation() {
        let config = from_toml(
            r#"
            [queue]
            url = "https://sqs.example/queue"
            wait_time_secs = 25
            ack_policy = "after_success"

            [firestore]
            credentials_path = "key.json"
            "#,
        );

        assert_eq!(config.queue.ack_policy, AckPolicy::AfterSuccess);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nested_collection_paths() {
        let mut config = from_toml(
            r#"
            [queue]
            url = "https://sqs.example/queue"

            [firestore]
            credentials_path = "key.json"
            collection = "users/u1/results"
            "#,
        );
        assert!(config.validate().is_ok());

        for collection in ["users/u1", "users//results", "/results", "results/"] {
            config.firestore.collection = collection.to_string();
            assert!(config.validate().is_err(), "{} should be rejected", collection);
        }
    }
}
