// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Blob uploader: copies a staging file into a freshly keyed blob

use std::path::Path;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::error::{Error, FirstError};
use crate::key::{Clock, ObjectKey, SystemClock};
use crate::store::{BlobStore, BlobWriter, ObjectStoreBlobs};
use diagnostics::*;

/// Size of each read from the staging file.
pub const COPY_CHUNK_SIZE: usize = 1024 * 1024;

pub struct BlobUploader {
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

impl BlobUploader {
    pub fn new(store: Arc<dyn BlobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Uploader with a client built from `config` and the system clock.
    pub fn connect(config: &StoreConfig) -> Result<Self, Error> {
        let store = ObjectStoreBlobs::connect(config)?;
        Ok(Self::new(Arc::new(store), Arc::new(SystemClock)))
    }

    /// Persist the staging file under a key minted from the current time.
    ///
    /// The key is returned only once the blob has been finalized. If the copy
    /// fails the writer is still finalized, so a partial blob may exist under
    /// the key; the copy error is what gets reported. Cancellation aborts the
    /// writer instead, publishing nothing.
    pub async fn upload(
        &self,
        staging: &Path,
        cancel: &CancellationToken,
    ) -> Result<ObjectKey, Error> {
        let bucket = self.store.bucket().to_string();
        let key = ObjectKey::from_time(self.clock.now());

        if self.store.exists(&key).await? {
            return Err(Error::ObjectExists {
                bucket,
                key: key.to_string(),
            });
        }

        let mut file = tokio::fs::File::open(staging)
            .await
            .map_err(|source| Error::StagingRead {
                path: staging.to_path_buf(),
                source,
            })?;

        let source_path = staging.display().to_string();
        info!(
            "uploading {staging} to {bucket} as {key}",
            staging: source_path.as_str(),
            bucket: bucket.as_str(),
            key: key.as_str()
        );

        let mut writer = self.store.open_writer(&key).await?;

        let copied = tokio::select! {
            copied = copy_into(&mut file, writer.as_mut()) => Some(copied),
            () = cancel.cancelled() => None,
        };

        let target = format!("'{key}' in bucket '{bucket}'");
        let mut errs = FirstError::new();
        match copied {
            Some(Ok(bytes)) => {
                debug!("copied {bytes} bytes into {key}", bytes: bytes, key: key.as_str());
                errs.record(finalize(writer, &target).await);
            }
            Some(Err(source)) => {
                errs.record(Err(Error::Copy {
                    from: source_path,
                    to: target.clone(),
                    source,
                }));
                errs.record(finalize(writer, &target).await);
            }
            None => {
                errs.record(Err(Error::cancelled(format!("uploading {target}"))));
                errs.record(writer.abort().await.map_err(|source| Error::Finalize {
                    what: format!("aborted writer for {target}"),
                    source,
                }));
            }
        }
        drop(file);

        let key = errs.finish(key)?;
        info!("stored archive {key} in {bucket}", key: key.as_str(), bucket: bucket.as_str());
        Ok(key)
    }
}

async fn finalize(writer: Box<dyn BlobWriter>, target: &str) -> Result<(), Error> {
    writer.finalize().await.map_err(|source| Error::Finalize {
        what: format!("writer for {target}"),
        source,
    })
}

/// Copy everything from `reader` into `writer`, returning the byte count.
pub(crate) async fn copy_into<R>(reader: &mut R, writer: &mut dyn BlobWriter) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut total = 0u64;
    let mut buf = BytesMut::with_capacity(COPY_CHUNK_SIZE);
    loop {
        buf.reserve(COPY_CHUNK_SIZE);
        let read = reader.read_buf(&mut buf).await?;
        if read == 0 {
            return Ok(total);
        }
        total += read as u64;
        writer.write(buf.split().freeze()).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::FixedClock;
    use crate::store::BlobReader;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// How the scripted writer misbehaves.
    #[derive(Clone, Copy, Default)]
    struct Faults {
        fail_write_after: Option<usize>,
        fail_finalize: bool,
        stall_writes: bool,
    }

    #[derive(Default)]
    struct Counters {
        finalized: AtomicUsize,
        aborted: AtomicUsize,
        written: Mutex<Vec<u8>>,
    }

    struct ScriptedStore {
        faults: Faults,
        counters: Arc<Counters>,
        existing: Vec<String>,
    }

    struct ScriptedWriter {
        faults: Faults,
        writes: usize,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl BlobStore for ScriptedStore {
        fn bucket(&self) -> &str {
            "scripted"
        }

        async fn exists(&self, key: &ObjectKey) -> Result<bool, Error> {
            Ok(self.existing.iter().any(|k| k == key.as_str()))
        }

        async fn open_writer(&self, _key: &ObjectKey) -> Result<Box<dyn BlobWriter>, Error> {
            Ok(Box::new(ScriptedWriter {
                faults: self.faults,
                writes: 0,
                counters: self.counters.clone(),
            }))
        }

        async fn open_reader(&self, key: &ObjectKey) -> Result<BlobReader, Error> {
            Err(Error::ObjectNotFound {
                bucket: "scripted".to_string(),
                key: key.to_string(),
            })
        }

        async fn list(&self) -> Result<Vec<ObjectKey>, Error> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl BlobWriter for ScriptedWriter {
        async fn write(&mut self, chunk: Bytes) -> std::io::Result<()> {
            if self.faults.stall_writes {
                std::future::pending::<()>().await;
            }
            if self.faults.fail_write_after == Some(self.writes) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset mid-transfer",
                ));
            }
            self.writes += 1;
            self.counters
                .written
                .lock()
                .expect("lock")
                .extend_from_slice(&chunk);
            Ok(())
        }

        async fn finalize(self: Box<Self>) -> std::io::Result<()> {
            let _ = self.counters.finalized.fetch_add(1, Ordering::SeqCst);
            if self.faults.fail_finalize {
                Err(std::io::Error::other("finalize rejected"))
            } else {
                Ok(())
            }
        }

        async fn abort(self: Box<Self>) -> std::io::Result<()> {
            let _ = self.counters.aborted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scripted(faults: Faults) -> (BlobUploader, Arc<Counters>) {
        scripted_with_existing(faults, Vec::new())
    }

    fn scripted_with_existing(faults: Faults, existing: Vec<String>) -> (BlobUploader, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let store = ScriptedStore {
            faults,
            counters: counters.clone(),
            existing,
        };
        let clock = FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .expect("valid time"),
        );
        (BlobUploader::new(Arc::new(store), Arc::new(clock)), counters)
    }

    /// A staging file large enough to need several chunks.
    fn staging_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("staging.dump");
        let content: Vec<u8> = (0..(COPY_CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, content).expect("write staging");
        path
    }

    #[tokio::test]
    async fn test_upload_copies_everything_and_finalizes_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = staging_file(dir.path());
        let (uploader, counters) = scripted(Faults::default());

        let key = uploader
            .upload(&path, &CancellationToken::new())
            .await
            .expect("upload");

        assert_eq!(key.as_str(), "2024-01-01T00:00:00Z");
        assert_eq!(counters.finalized.load(Ordering::SeqCst), 1);
        assert_eq!(counters.aborted.load(Ordering::SeqCst), 0);
        let written = counters.written.lock().expect("lock").clone();
        assert_eq!(written, std::fs::read(&path).expect("read staging"));
    }

    #[tokio::test]
    async fn test_copy_failure_still_finalizes_and_reports_copy_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = staging_file(dir.path());
        let (uploader, counters) = scripted(Faults {
            fail_write_after: Some(1),
            ..Faults::default()
        });

        let err = uploader
            .upload(&path, &CancellationToken::new())
            .await
            .expect_err("copy fails");

        assert!(matches!(err, Error::Copy { .. }), "got {err}");
        assert_eq!(counters.finalized.load(Ordering::SeqCst), 1);
        assert_eq!(counters.aborted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_copy_error_wins_over_finalize_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = staging_file(dir.path());
        let (uploader, counters) = scripted(Faults {
            fail_write_after: Some(0),
            fail_finalize: true,
            ..Faults::default()
        });

        let err = uploader
            .upload(&path, &CancellationToken::new())
            .await
            .expect_err("copy and finalize fail");

        assert!(matches!(err, Error::Copy { .. }), "got {err}");
        assert_eq!(counters.finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finalize_error_surfaces_when_copy_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = staging_file(dir.path());
        let (uploader, counters) = scripted(Faults {
            fail_finalize: true,
            ..Faults::default()
        });

        let err = uploader
            .upload(&path, &CancellationToken::new())
            .await
            .expect_err("finalize fails");

        assert!(matches!(err, Error::Finalize { .. }), "got {err}");
        assert_eq!(counters.finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_instead_of_finalizing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = staging_file(dir.path());
        let (uploader, counters) = scripted(Faults {
            stall_writes: true,
            ..Faults::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            uploader.upload(&path, &cancel),
        )
        .await
        .expect("cancellation is prompt")
        .expect_err("cancelled");

        assert!(err.is_cancelled(), "got {err}");
        assert_eq!(counters.finalized.load(Ordering::SeqCst), 0);
        assert_eq!(counters.aborted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_staging_file_opens_no_writer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (uploader, counters) = scripted(Faults::default());

        let err = uploader
            .upload(&dir.path().join("absent.dump"), &CancellationToken::new())
            .await
            .expect_err("no staging file");

        assert!(matches!(err, Error::StagingRead { .. }), "got {err}");
        assert_eq!(counters.finalized.load(Ordering::SeqCst), 0);
        assert_eq!(counters.aborted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_existing_key_is_not_overwritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = staging_file(dir.path());
        let (uploader, counters) =
            scripted_with_existing(Faults::default(), vec!["2024-01-01T00:00:00Z".to_string()]);

        let err = uploader
            .upload(&path, &CancellationToken::new())
            .await
            .expect_err("collision");

        assert!(matches!(err, Error::ObjectExists { .. }), "got {err}");
        assert!(counters.written.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_copy_into_counts_bytes() {
        let counters = Arc::new(Counters::default());
        let mut writer = ScriptedWriter {
            faults: Faults::default(),
            writes: 0,
            counters: counters.clone(),
        };
        let mut source: &[u8] = b"DUMPDATA";
        let copied = copy_into(&mut source, &mut writer).await.expect("copy");
        assert_eq!(copied, 8);
        assert_eq!(writer.writes, 1);
        assert_eq!(counters.written.lock().expect("lock").as_slice(), b"DUMPDATA");
    }
}
