use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::error::StorageError;
use super::hash::ContentHash;
use super::traits::{Bucket, ObjectStore};

/// Filesystem-backed versioned object store.
///
/// Objects live at `{base}/{bucket}/{name}/{version}` where the version id is
/// the hex SHA-256 of the content. A `latest` marker file inside the object
/// directory names the most recently written version. Writes go through a
/// temp file plus rename so readers never observe partial content.
pub struct FilesystemObjectStore {
    base_path: PathBuf,
    max_size: u64,
}

const LATEST_MARKER: &str = "latest";

impl FilesystemObjectStore {
    pub async fn new(base_path: PathBuf, max_size: u64) -> Result<Self, StorageError> {
        fs::create_dir_all(&base_path).await?;
        fs::create_dir_all(base_path.join(".tmp")).await?;
        Ok(Self {
            base_path,
            max_size,
        })
    }

    fn object_dir(&self, bucket: Bucket, name: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(name);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidVersion(format!(
                "object name escapes the store: {name}"
            )));
        }
        Ok(self.base_path.join(bucket.as_str()).join(rel))
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }

    async fn read_version(&self, dir: &Path, name: &str, version: &str) -> Result<Vec<u8>, StorageError> {
        // Validates the shape before touching the filesystem.
        ContentHash::from_hex(version)?;

        match fs::read(dir.join(version)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                name: name.to_string(),
                version: version.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, bucket: Bucket, name: &str, data: &[u8]) -> Result<String, StorageError> {
        if data.len() as u64 > self.max_size {
            return Err(StorageError::SizeLimitExceeded {
                actual: data.len() as u64,
                limit: self.max_size,
            });
        }

        let version = ContentHash::compute(data).to_hex();
        let dir = self.object_dir(bucket, name)?;
        fs::create_dir_all(&dir).await?;

        let blob_path = dir.join(&version);
        if !fs::try_exists(&blob_path).await? {
            let temp_path = self.temp_path();
            if let Err(e) = fs::write(&temp_path, data).await {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e.into());
            }
            if let Err(e) = fs::rename(&temp_path, &blob_path).await {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e.into());
            }
        }

        // Advance the latest marker, also via rename.
        let temp_path = self.temp_path();
        fs::write(&temp_path, version.as_bytes()).await?;
        if let Err(e) = fs::rename(&temp_path, dir.join(LATEST_MARKER)).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(version)
    }

    async fn get(
        &self,
        bucket: Bucket,
        name: &str,
        version: &str,
    ) -> Result<Vec<u8>, StorageError> {
        let dir = self.object_dir(bucket, name)?;
        self.read_version(&dir, name, version).await
    }

    async fn get_latest(&self, bucket: Bucket, name: &str) -> Result<Vec<u8>, StorageError> {
        let dir = self.object_dir(bucket, name)?;
        let version = match fs::read_to_string(dir.join(LATEST_MARKER)).await {
            Ok(v) => v.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    name: name.to_string(),
                    version: LATEST_MARKER.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        self.read_version(&dir, name, &version).await
    }

    async fn delete_all(&self, bucket: Bucket, name: &str) -> Result<bool, StorageError> {
        let dir = self.object_dir(bucket, name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (FilesystemObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path().join("objects"), 10 * 1024 * 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn put_then_get_exact_version() {
        let (store, _dir) = temp_store().await;
        let version = store.put(Bucket::Binaries, "s1", b"binary").await.unwrap();
        let data = store.get(Bucket::Binaries, "s1", &version).await.unwrap();
        assert_eq!(data, b"binary");
    }

    #[tokio::test]
    async fn version_is_content_derived() {
        let (store, _dir) = temp_store().await;
        let v1 = store.put(Bucket::Testcases, "p1/1.in", b"1 2").await.unwrap();
        let v2 = store.put(Bucket::Testcases, "p1/1.in", b"1 2").await.unwrap();
        assert_eq!(v1, v2);

        let v3 = store.put(Bucket::Testcases, "p1/1.in", b"3 4").await.unwrap();
        assert_ne!(v1, v3);
    }

    #[tokio::test]
    async fn mismatched_version_is_not_found() {
        let (store, _dir) = temp_store().await;
        store.put(Bucket::Checkers, "p1", b"checker v1").await.unwrap();
        let other = ContentHash::compute(b"something else").to_hex();
        let err = store.get(Bucket::Checkers, "p1", &other).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn get_latest_tracks_newest_write() {
        let (store, _dir) = temp_store().await;
        store.put(Bucket::Binaries, "s1", b"old").await.unwrap();
        store.put(Bucket::Binaries, "s1", b"new").await.unwrap();
        let data = store.get_latest(Bucket::Binaries, "s1").await.unwrap();
        assert_eq!(data, b"new");
    }

    #[tokio::test]
    async fn old_versions_stay_readable() {
        let (store, _dir) = temp_store().await;
        let v1 = store.put(Bucket::Testcases, "p1/1.out", b"42").await.unwrap();
        store.put(Bucket::Testcases, "p1/1.out", b"43").await.unwrap();
        let data = store.get(Bucket::Testcases, "p1/1.out", &v1).await.unwrap();
        assert_eq!(data, b"42");
    }

    #[tokio::test]
    async fn delete_all_removes_every_version() {
        let (store, _dir) = temp_store().await;
        let v1 = store.put(Bucket::Checkers, "p1", b"v1").await.unwrap();
        store.put(Bucket::Checkers, "p1", b"v2").await.unwrap();

        assert!(store.delete_all(Bucket::Checkers, "p1").await.unwrap());
        assert!(matches!(
            store.get(Bucket::Checkers, "p1", &v1).await.unwrap_err(),
            StorageError::NotFound { .. }
        ));
        // Second delete is a no-op.
        assert!(!store.delete_all(Bucket::Checkers, "p1").await.unwrap());
    }

    #[tokio::test]
    async fn size_limit_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path().join("objects"), 4)
            .await
            .unwrap();
        let err = store
            .put(Bucket::Binaries, "s1", b"way too big")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SizeLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn rejects_escaping_names() {
        let (store, _dir) = temp_store().await;
        let err = store
            .put(Bucket::Testcases, "../outside", b"data")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidVersion(_)));
    }

    #[tokio::test]
    async fn fetch_to_file_writes_content() {
        let (store, dir) = temp_store().await;
        let version = store.put(Bucket::Binaries, "s1", b"payload").await.unwrap();
        let dest = dir.path().join("fetched");
        store
            .fetch_to_file(Bucket::Binaries, "s1", &version, &dest)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }
}
