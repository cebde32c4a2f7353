// =============================================================================
// Mediaron Federated Media Repository - Datastore Module
// =============================================================================
//
// Project: Mediaron - Ultra High Performance Federated Media Repository
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Date: 2025-04-02
// Version: 0.1.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Pluggable blob backends addressed by `(datastore id, location)`, the
//   registry that resolves a record's datastore id to a live handle, and the
//   filesystem-backed implementation used for locally persisted blobs.
//   Locations are opaque to the rest of the core.
//
// =============================================================================

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::debug;

use super::stream::ByteStream;
use crate::{Error, Result};

/// A pluggable blob backend.
#[async_trait]
pub trait Datastore: Send + Sync {
    fn id(&self) -> &str;

    /// Opens a readable stream over the blob stored at `location`.
    async fn open(&self, location: &str, ctx: &CancellationToken) -> Result<ByteStream>;

    /// Stores `contents` under its content address and returns the location
    /// it can be read back from.
    async fn create(&self, sha256_hex: &str, contents: Bytes) -> Result<String>;
}

/// Registry of configured datastores. `default_id` names the store newly
/// downloaded blobs are written to.
pub struct Datastores {
    stores: HashMap<String, Arc<dyn Datastore>>,
    default_id: String,
}

impl Datastores {
    pub fn new(default_id: impl Into<String>) -> Self {
        Self {
            stores: HashMap::new(),
            default_id: default_id.into(),
        }
    }

    pub fn register(&mut self, store: Arc<dyn Datastore>) {
        self.stores.insert(store.id().to_owned(), store);
    }

    pub fn get(&self, datastore_id: &str) -> Result<Arc<dyn Datastore>> {
        self.stores.get(datastore_id).cloned().ok_or_else(|| {
            Error::BadConfig(format!("datastore {datastore_id} is not configured"))
        })
    }

    pub fn default_store(&self) -> Result<Arc<dyn Datastore>> {
        self.get(&self.default_id)
    }
}

/// Filesystem-backed datastore with a two-level hash fan-out below
/// `base_path` (`ab/cd/abcd...`).
pub struct FilesystemDatastore {
    id: String,
    base_path: PathBuf,
}

impl FilesystemDatastore {
    pub fn new(id: impl Into<String>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            base_path: base_path.into(),
        }
    }

    fn blob_path(&self, location: &str) -> PathBuf {
        self.base_path.join(location)
    }
}

#[async_trait]
impl Datastore for FilesystemDatastore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&self, location: &str, ctx: &CancellationToken) -> Result<ByteStream> {
        let path = self.blob_path(location);
        let file = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(Error::Cancelled),
            file = fs::File::open(&path) => file?,
        };

        debug!("Opened blob {location} from datastore {}", self.id);
        Ok(Box::pin(
            ReaderStream::new(file).map(|chunk| chunk.map_err(Error::from)),
        ))
    }

    async fn create(&self, sha256_hex: &str, contents: Bytes) -> Result<String> {
        if sha256_hex.len() < 4 {
            return Err(Error::BadRequest(
                "sha256 hex digest is too short".to_owned(),
            ));
        }

        let location = format!("{}/{}/{}", &sha256_hex[..2], &sha256_hex[2..4], sha256_hex);
        let path = self.blob_path(&location);

        // Content-addressed: an existing blob already holds identical bytes.
        if fs::try_exists(&path).await? {
            return Ok(location);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&path).await?;
        file.write_all(&contents).await?;
        file.flush().await?;

        debug!("Stored blob {location} in datastore {}", self.id);
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::media::stream;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_create_then_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemDatastore::new("fs-test", dir.path());
        let digest = "ab".repeat(32);

        let location = assert_ok!(store.create(&digest, Bytes::from_static(b"blob body")).await);
        assert_eq!(location, format!("ab/ab/{digest}"));

        let opened = store
            .open(&location, &CancellationToken::new())
            .await
            .unwrap();
        let contents = stream::collect(opened, None).await.unwrap();
        assert_eq!(contents, b"blob body");
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemDatastore::new("fs-test", dir.path());
        let digest = "cd".repeat(32);

        let first = store
            .create(&digest, Bytes::from_static(b"same bytes"))
            .await
            .unwrap();
        let second = store
            .create(&digest, Bytes::from_static(b"same bytes"))
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_open_missing_blob_is_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemDatastore::new("fs-test", dir.path());

        let err = store
            .open("no/such/blob", &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_open_honours_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemDatastore::new("fs-test", dir.path());

        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = store.open("irrelevant", &ctx).await.err().unwrap();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut datastores = Datastores::new("fs-test");
        datastores.register(Arc::new(FilesystemDatastore::new("fs-test", dir.path())));

        assert_eq!(datastores.get("fs-test").unwrap().id(), "fs-test");
        assert_eq!(datastores.default_store().unwrap().id(), "fs-test");

        let err = datastores.get("s3-main").err().unwrap();
        assert!(matches!(err, Error::BadConfig(_)));
    }
}
