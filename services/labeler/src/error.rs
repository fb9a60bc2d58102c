use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while running the labeling pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to parse notification: {0}")]
    Parse(String),

    #[error("Invalid notification: {0}")]
    Validation(String),

    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    #[error("Object s3://{bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("Label detection failed: {0}")]
    Extraction(String),

    #[error("Failed to persist document: {0}")]
    Persistence(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl PipelineError {
    pub fn transport(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation,
            message: err.to_string(),
        }
    }

    /// Permanent errors will fail the same way on redelivery.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::Validation(_) | Self::NotFound { .. }
        )
    }

    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
            Self::Transport { .. } => "transport",
            Self::NotFound { .. } => "not_found",
            Self::Extraction(_) => "extraction",
            Self::Persistence(_) => "persistence",
            Self::Timeout { .. } => "timeout",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Bound an external call by `after`, reporting expiry as [`PipelineError::Timeout`].
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout { operation, after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_errors() {
        assert!(PipelineError::Parse("bad json".into()).is_permanent());
        assert!(PipelineError::NotFound {
            bucket: "imgs".into(),
            key: "a.png".into()
        }
        .is_permanent());
        assert!(!PipelineError::transport("fetch", "connection reset").is_permanent());
        assert!(!PipelineError::Persistence("503".into()).is_permanent());
    }

    #[test]
    fn test_transport_display() {
        let err = PipelineError::transport("receive", "dns failure");
        assert_eq!(err.to_string(), "receive failed: dns failure");
        assert_eq!(err.kind(), "transport");
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_expires() {
        let result: Result<()> = with_timeout("persist", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(
            result,
            Err(PipelineError::Timeout {
                operation: "persist",
                ..
            })
        ));
    }
}
