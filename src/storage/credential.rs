//! Per-record scratch storage for the downloaded private key.
//!
//! Each record gets its own uniquely named temporary file, readable only by
//! the current user and removed when the scratch value is dropped.

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;

use crate::error::PullError;
use crate::remote::Signer;

use super::ObjectStore;

/// Temporary file holding credential material for one record.
#[derive(Debug)]
pub struct CredentialScratch {
    // Held so the file is deleted on drop.
    _file: NamedTempFile,
    path: Utf8PathBuf,
}

impl CredentialScratch {
    /// Creates an empty scratch file in the system temporary directory.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::KeyParse`] when no scratch file can be created,
    /// since no key can be read without one.
    pub fn acquire() -> Result<Self, PullError> {
        let file = tempfile::Builder::new()
            .prefix("pullhook-key-")
            .tempfile()
            .map_err(|err| PullError::KeyParse(format!("scratch file unavailable: {err}")))?;
        let path = Utf8PathBuf::from_path_buf(file.path().to_path_buf()).map_err(|path| {
            PullError::KeyParse(format!(
                "scratch path is not valid UTF-8: {}",
                path.display()
            ))
        })?;
        Ok(Self { _file: file, path })
    }

    /// Location of the scratch file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Downloads `bucket/key` into the scratch file.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::Transfer`] from the store.
    pub async fn fill<S>(&self, store: &S, bucket: &str, key: &str) -> Result<(), PullError>
    where
        S: ObjectStore + ?Sized,
    {
        store.download(bucket, key, &self.path).await
    }

    /// Reads the raw credential bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PullError::KeyParse`] when the file cannot be read.
    pub async fn read(&self) -> Result<Vec<u8>, PullError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|err| PullError::KeyParse(format!("reading {} failed: {err}", self.path)))
    }

    /// Reads and parses the credential into a [`Signer`].
    ///
    /// # Errors
    ///
    /// Returns [`PullError::KeyParse`] when the bytes are absent, unreadable,
    /// or not a valid private key.
    pub async fn signer(&self) -> Result<Signer, PullError> {
        let bytes = self.read().await?;
        Signer::parse(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::{FakeObjectStore, TEST_PRIVATE_KEY};

    #[tokio::test]
    async fn filled_scratch_parses_into_signer() {
        let store = FakeObjectStore::new();
        store.insert("b1", "deploy.pem", TEST_PRIVATE_KEY);
        let scratch = CredentialScratch::acquire().expect("scratch file");

        scratch
            .fill(&store, "b1", "deploy.pem")
            .await
            .expect("download should succeed");
        let signer = scratch.signer().await.expect("key should parse");

        assert_eq!(signer.algorithm(), "ssh-ed25519");
    }

    #[tokio::test]
    async fn empty_scratch_is_a_fatal_parse_error() {
        let scratch = CredentialScratch::acquire().expect("scratch file");

        let error = scratch.signer().await.expect_err("empty file has no key");

        assert_eq!(error.kind(), ErrorKind::Fatal);
        assert!(error.to_string().contains("empty"), "error: {error}");
    }

    #[tokio::test]
    async fn failed_download_leaves_scratch_empty() {
        let store = FakeObjectStore::new();
        let scratch = CredentialScratch::acquire().expect("scratch file");

        let error = scratch
            .fill(&store, "b1", "deploy.pem")
            .await
            .expect_err("missing object should fail");

        assert_eq!(error.kind(), ErrorKind::Transfer);
        assert!(scratch.read().await.expect("scratch readable").is_empty());
    }

    #[test]
    fn scratch_file_is_removed_on_drop() {
        let scratch = CredentialScratch::acquire().expect("scratch file");
        let path = scratch.path().to_path_buf();
        assert!(path.exists());

        drop(scratch);

        assert!(!path.exists());
    }

    #[test]
    fn each_record_gets_a_distinct_scratch_file() {
        let first = CredentialScratch::acquire().expect("scratch file");
        let second = CredentialScratch::acquire().expect("scratch file");

        assert_ne!(first.path(), second.path());
    }
}
