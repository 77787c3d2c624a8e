// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Blob store access
//!
//! [`BlobStore`] is the seam between the pipeline and durable storage. The
//! production implementation, [`ObjectStoreBlobs`], sits on `object_store`
//! and speaks to Google Cloud Storage, a local directory, or memory.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{ObjectStore, WriteMultipart};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Error;
use crate::key::ObjectKey;
use diagnostics::*;

/// Parts allowed in flight before `write` waits for uploads to drain.
const MAX_IN_FLIGHT_PARTS: usize = 8;

/// Byte stream of a stored blob, positioned at offset zero.
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket this store is scoped to, for messages.
    fn bucket(&self) -> &str;

    async fn exists(&self, key: &ObjectKey) -> Result<bool, Error>;

    async fn open_writer(&self, key: &ObjectKey) -> Result<Box<dyn BlobWriter>, Error>;

    async fn open_reader(&self, key: &ObjectKey) -> Result<BlobReader, Error>;

    /// Every key in the bucket, sorted.
    async fn list(&self) -> Result<Vec<ObjectKey>, Error>;
}

/// Write side of a single blob.
///
/// The blob only becomes visible once [`BlobWriter::finalize`] succeeds.
/// Both `finalize` and `abort` consume the writer, so a writer is ended at
/// most once.
#[async_trait]
pub trait BlobWriter: Send {
    async fn write(&mut self, chunk: Bytes) -> std::io::Result<()>;

    async fn finalize(self: Box<Self>) -> std::io::Result<()>;

    /// Discard everything written so far without publishing it.
    async fn abort(self: Box<Self>) -> std::io::Result<()>;
}

/// [`BlobStore`] backed by an `object_store` implementation.
#[derive(Debug, Clone)]
pub struct ObjectStoreBlobs {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBlobs {
    /// Wrap an already constructed store.
    pub fn new<S: Into<String>>(bucket: S, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            store,
        }
    }

    /// Build a client for the configured backend.
    pub fn connect(config: &StoreConfig) -> Result<Self, Error> {
        let bucket = config.bucket.clone();
        let client_init = |source| Error::ClientInit {
            bucket: bucket.clone(),
            source,
        };

        let store: Arc<dyn ObjectStore> = match &config.backend {
            StoreBackend::Gcs => {
                let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&bucket);
                if let Some(path) = &config.credentials_path {
                    builder = builder.with_service_account_path(path.to_string_lossy());
                }
                Arc::new(builder.build().map_err(client_init)?)
            }
            StoreBackend::Local { root } => {
                let dir = root.join(&bucket);
                std::fs::create_dir_all(&dir).map_err(|e| {
                    client_init(object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: Box::new(e),
                    })
                })?;
                Arc::new(LocalFileSystem::new_with_prefix(&dir).map_err(client_init)?)
            }
            StoreBackend::Memory => Arc::new(InMemory::new()),
        };

        let backend = format!("{:?}", config.backend);
        debug!("blob store client ready for {bucket} ({backend})", bucket: bucket.as_str(), backend: backend.as_str());
        Ok(Self::new(bucket, store))
    }

    /// The underlying store.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn lookup_failed(&self, key: &ObjectKey, source: object_store::Error) -> Error {
        Error::Lookup {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            source,
        }
    }

    fn reader_open(&self, key: &ObjectKey, source: object_store::Error) -> Error {
        match source {
            object_store::Error::NotFound { .. } => Error::ObjectNotFound {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            },
            source => Error::ReaderOpen {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source,
            },
        }
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobs {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn exists(&self, key: &ObjectKey) -> Result<bool, Error> {
        match self.store.head(&key.to_path()).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(source) => Err(self.lookup_failed(key, source)),
        }
    }

    async fn open_writer(&self, key: &ObjectKey) -> Result<Box<dyn BlobWriter>, Error> {
        let upload = self
            .store
            .put_multipart(&key.to_path())
            .await
            .map_err(|source| Error::WriterOpen {
                bucket: self.bucket.clone(),
                key: key.to_string(),
                source,
            })?;
        Ok(Box::new(ObjectStoreWriter {
            upload: WriteMultipart::new(upload),
        }))
    }

    async fn open_reader(&self, key: &ObjectKey) -> Result<BlobReader, Error> {
        let result = self
            .store
            .get(&key.to_path())
            .await
            .map_err(|source| self.reader_open(key, source))?;
        let stream = result.into_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn list(&self) -> Result<Vec<ObjectKey>, Error> {
        let metas: Vec<object_store::ObjectMeta> = self
            .store
            .list(None)
            .try_collect()
            .await
            .map_err(|source| Error::List {
                bucket: self.bucket.clone(),
                source,
            })?;
        let mut keys: Vec<ObjectKey> = metas
            .into_iter()
            .filter_map(|meta| ObjectKey::new(meta.location.to_string()))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

struct ObjectStoreWriter {
    upload: WriteMultipart,
}

#[async_trait]
impl BlobWriter for ObjectStoreWriter {
    async fn write(&mut self, chunk: Bytes) -> std::io::Result<()> {
        self.upload
            .wait_for_capacity(MAX_IN_FLIGHT_PARTS)
            .await
            .map_err(std::io::Error::other)?;
        self.upload.put(chunk);
        Ok(())
    }

    async fn finalize(self: Box<Self>) -> std::io::Result<()> {
        self.upload
            .finish()
            .await
            .map(|_| ())
            .map_err(std::io::Error::other)
    }

    async fn abort(self: Box<Self>) -> std::io::Result<()> {
        self.upload.abort().await.map_err(std::io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn memory() -> ObjectStoreBlobs {
        ObjectStoreBlobs::new("archives", Arc::new(InMemory::new()))
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(name).expect("non-empty key")
    }

    #[tokio::test]
    async fn test_finalized_blob_is_readable() {
        let blobs = memory();
        let k = key("2024-01-01T00:00:00Z");

        let mut writer = blobs.open_writer(&k).await.expect("writer");
        writer.write(Bytes::from_static(b"DUMP")).await.expect("write");
        writer.write(Bytes::from_static(b"DATA")).await.expect("write");
        writer.finalize().await.expect("finalize");

        assert!(blobs.exists(&k).await.expect("head"));
        let mut reader = blobs.open_reader(&k).await.expect("reader");
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.expect("read");
        assert_eq!(content, b"DUMPDATA");
    }

    #[tokio::test]
    async fn test_aborted_blob_is_not_published() {
        let blobs = memory();
        let k = key("2024-01-01T00:00:01Z");

        let mut writer = blobs.open_writer(&k).await.expect("writer");
        writer.write(Bytes::from_static(b"partial")).await.expect("write");
        writer.abort().await.expect("abort");

        assert!(!blobs.exists(&k).await.expect("head"));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let blobs = memory();
        let err = match blobs.open_reader(&key("2024-01-01T00:00:00Z")).await {
            Ok(_) => panic!("reader for a missing object"),
            Err(err) => err,
        };
        assert!(matches!(err, Error::ObjectNotFound { .. }), "got {err}");
    }

    #[test]
    fn test_lookup_failure_is_not_a_reader_error() {
        let blobs = memory();
        let source = object_store::Error::Generic {
            store: "test",
            source: Box::new(std::io::Error::other("permission denied")),
        };
        let err = blobs.lookup_failed(&key("2024-01-01T00:00:00Z"), source);
        assert!(matches!(err, Error::Lookup { .. }), "got {err}");
        assert!(err.to_string().starts_with("unable to check whether"));
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let blobs = memory();
        for name in ["2024-03-01T00:00:00Z", "2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z"] {
            let mut writer = blobs.open_writer(&key(name)).await.expect("writer");
            writer.write(Bytes::from_static(b"x")).await.expect("write");
            writer.finalize().await.expect("finalize");
        }

        let listed: Vec<String> = blobs
            .list()
            .await
            .expect("list")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            listed,
            vec!["2024-01-01T00:00:00Z", "2024-02-01T00:00:00Z", "2024-03-01T00:00:00Z"]
        );
    }

    #[tokio::test]
    async fn test_local_backend_creates_bucket_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StoreConfig {
            bucket: "archives".to_string(),
            credentials_path: None,
            backend: StoreBackend::Local {
                root: dir.path().to_path_buf(),
            },
        };
        let blobs = ObjectStoreBlobs::connect(&config).expect("local store");
        let k = key("2024-01-01T00:00:00Z");

        let mut writer = blobs.open_writer(&k).await.expect("writer");
        writer.write(Bytes::from_static(b"on disk")).await.expect("write");
        writer.finalize().await.expect("finalize");

        let stored = std::fs::read(dir.path().join("archives").join(k.as_str())).expect("blob file");
        assert_eq!(stored, b"on disk");
    }

    #[test]
    fn test_missing_credentials_file_fails_client_init() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StoreConfig {
            bucket: "archives".to_string(),
            credentials_path: Some(dir.path().join("absent.json")),
            backend: StoreBackend::Gcs,
        };
        let err = ObjectStoreBlobs::connect(&config).expect_err("unreadable credentials");
        assert!(matches!(err, Error::ClientInit { .. }), "got {err}");
    }
}
