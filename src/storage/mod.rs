//! Object-storage collaborators: the credential download and the check
//! against the uploaded object.

use std::future::Future;
use std::pin::Pin;

use camino::Utf8Path;

use crate::error::PullError;

mod credential;
mod s3;

pub use credential::CredentialScratch;
pub use s3::S3ObjectStore;

/// Future returned by object-storage operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PullError>> + Send + 'a>>;

/// Minimal interface over the object store.
pub trait ObjectStore {
    /// Downloads `bucket/key` into `destination`, replacing its contents.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Transfer`] when the object cannot be read or the
    /// file cannot be written.
    fn download<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        destination: &'a Utf8Path,
    ) -> StoreFuture<'a, ()>;

    /// Fetches `bucket/key` to confirm it exists and is readable, returning
    /// its size in bytes when known.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Transfer`] when the object cannot be fetched.
    fn fetch<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, Option<i64>>;
}
