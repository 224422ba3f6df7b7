//! [`ObjectStore`] over the AWS S3 SDK.

use std::fmt::Display;

use aws_sdk_s3::Client;
use camino::Utf8Path;
use tracing::debug;

use crate::error::PullError;

use super::{ObjectStore, StoreFuture};

/// S3 client scoped to one region.
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Wraps an existing client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the ambient AWS configuration pinned to `region`.
    pub async fn for_region(region: &str) -> Self {
        let config = aws_config::from_env()
            .region(aws_config::Region::new(region.to_owned()))
            .load()
            .await;
        Self::new(Client::new(&config))
    }
}

fn transfer_error(
    operation: &'static str,
    bucket: &str,
    key: &str,
    message: &dyn Display,
) -> PullError {
    PullError::Transfer {
        operation,
        bucket: bucket.to_owned(),
        key: key.to_owned(),
        message: message.to_string(),
    }
}

impl ObjectStore for S3ObjectStore {
    fn download<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        destination: &'a Utf8Path,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let object = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| transfer_error("download", bucket, key, &err.into_service_error()))?;
            let bytes = object
                .body
                .collect()
                .await
                .map_err(|err| transfer_error("download", bucket, key, &err))?
                .into_bytes();
            tokio::fs::write(destination, &bytes)
                .await
                .map_err(|err| transfer_error("download", bucket, key, &err))?;
            debug!(bucket, key, bytes = bytes.len(), "object downloaded");
            Ok(())
        })
    }

    fn fetch<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, Option<i64>> {
        Box::pin(async move {
            let object = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| transfer_error("fetch", bucket, key, &err.into_service_error()))?;
            Ok(object.content_length())
        })
    }
}
