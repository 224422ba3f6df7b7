//! Trigger records extracted from object-storage notifications.

use aws_lambda_events::event::s3::{S3Event, S3EventRecord};
use tracing::warn;

/// One uploaded object that may start a pull.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TriggerRecord {
    /// Service that emitted the notification (for example `aws:s3`).
    pub source: String,
    /// RFC 3339 timestamp of the upload.
    pub event_time: String,
    /// Bucket holding the object.
    pub bucket: String,
    /// Key of the uploaded object, as delivered in the notification.
    pub key: String,
}

impl TriggerRecord {
    /// Builds a record, returning `None` when the bucket or key is missing.
    #[must_use]
    pub fn from_s3(record: &S3EventRecord) -> Option<Self> {
        let bucket = record.s3.bucket.name.clone()?;
        let key = record.s3.object.key.clone()?;
        Some(Self {
            source: record.event_source.clone().unwrap_or_default(),
            event_time: record.event_time.to_rfc3339(),
            bucket,
            key,
        })
    }

    /// Extracts every usable record from `event`, preserving arrival order.
    #[must_use]
    pub fn batch(event: &S3Event) -> Vec<Self> {
        event
            .records
            .iter()
            .filter_map(|record| {
                let parsed = Self::from_s3(record);
                if parsed.is_none() {
                    warn!(
                        event_name = record.event_name.as_deref().unwrap_or("unknown"),
                        "skipping notification without bucket name or object key"
                    );
                }
                parsed
            })
            .collect()
    }
}
