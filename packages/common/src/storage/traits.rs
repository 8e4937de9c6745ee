use std::path::Path;

use async_trait::async_trait;

use super::error::StorageError;

/// Logical buckets of the judging pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Compiled submission binaries, keyed by submission id.
    Binaries,
    /// Testcase inputs/outputs, keyed by "{problem_id}/{filename}".
    Testcases,
    /// Compiled checkers, keyed by problem id.
    Checkers,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binaries => "binaries",
            Self::Testcases => "testcases",
            Self::Checkers => "checkers",
        }
    }
}

/// Versioned object storage, content-addressed by name plus version.
///
/// Every read specifies an exact version id; a missing object or a version
/// mismatch is a hard [`StorageError::NotFound`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under the given name; returns the new version id.
    async fn put(&self, bucket: Bucket, name: &str, data: &[u8]) -> Result<String, StorageError>;

    /// Retrieve an object at an exact version.
    async fn get(&self, bucket: Bucket, name: &str, version: &str)
    -> Result<Vec<u8>, StorageError>;

    /// Retrieve the most recently written version of an object.
    async fn get_latest(&self, bucket: Bucket, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Delete every version of an object. Returns whether anything existed.
    async fn delete_all(&self, bucket: Bucket, name: &str) -> Result<bool, StorageError>;

    /// Fetch an object at an exact version into a local file.
    async fn fetch_to_file(
        &self,
        bucket: Bucket,
        name: &str,
        version: &str,
        dest: &Path,
    ) -> Result<(), StorageError> {
        let data = self.get(bucket, name, version).await?;
        tokio::fs::write(dest, data).await?;
        Ok(())
    }

    /// Fetch the latest version of an object into a local file.
    async fn fetch_latest_to_file(
        &self,
        bucket: Bucket,
        name: &str,
        dest: &Path,
    ) -> Result<(), StorageError> {
        let data = self.get_latest(bucket, name).await?;
        tokio::fs::write(dest, data).await?;
        Ok(())
    }
}
