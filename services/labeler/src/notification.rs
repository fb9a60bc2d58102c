use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// Upload notification delivered through the queue
///
/// Parsed from an EventBridge "Object Created" event:
/// `{"detail": {"bucket": {"name": ...}, "object": {"key": ...}}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub bucket_name: String,
    pub object_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectCreatedEvent {
    detail: EventDetail,
}

#[derive(Debug, Serialize, Deserialize)]
struct EventDetail {
    bucket: BucketRef,
    object: ObjectRef,
}

#[derive(Debug, Serialize, Deserialize)]
struct BucketRef {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ObjectRef {
    #[serde(default)]
    key: Option<String>,
}

impl Notification {
    /// Parse a queue message body.
    ///
    /// Missing `name`/`key` fields parse to empty strings so that [`Notification::validate`]
    /// can reject them; any other shape is a [`PipelineError::Parse`].
    pub fn parse(body: &str) -> Result<Self> {
        let event: ObjectCreatedEvent =
            serde_json::from_str(body).map_err(|e| PipelineError::Parse(e.to_string()))?;

        Ok(Self {
            bucket_name: event.detail.bucket.name.unwrap_or_default(),
            object_key: event.detail.object.key.unwrap_or_default(),
        })
    }

    /// Reject notifications without a bucket or key, or whose key has no file name.
    pub fn validate(&self) -> Result<()> {
        if self.bucket_name.is_empty() || self.object_key.is_empty() {
            return Err(PipelineError::Validation(format!(
                "bucket or key missing (bucket={:?}, key={:?})",
                self.bucket_name, self.object_key
            )));
        }

        if self.image_id().is_empty() {
            return Err(PipelineError::Validation(format!(
                "object key {:?} has no file name",
                self.object_key
            )));
        }

        Ok(())
    }

    /// Document id for this object: the final path segment of the key
    pub fn image_id(&self) -> &str {
        basename(&self.object_key)
    }
}

/// Final segment of a `/`-separated path, ignoring trailing separators
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}
