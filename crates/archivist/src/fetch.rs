// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Blob fetcher: opens a stored archive for reading

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::error::Error;
use crate::key::ObjectKey;
use crate::store::{BlobReader, BlobStore, ObjectStoreBlobs};
use diagnostics::*;

pub struct BlobFetcher {
    store: Arc<dyn BlobStore>,
}

impl BlobFetcher {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub fn connect(config: &StoreConfig) -> Result<Self, Error> {
        Ok(Self::new(Arc::new(ObjectStoreBlobs::connect(config)?)))
    }

    /// Open `key` for reading. The stream stays open until the reader is dropped.
    pub async fn fetch(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<BlobReader, Error> {
        let bucket = self.store.bucket();
        info!("fetching {key} from {bucket}", key: key.as_str(), bucket: bucket);

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::cancelled(format!(
                "opening '{key}' in bucket '{bucket}'"
            ))),
            reader = self.store.open_reader(key) => reader,
        }
    }

    /// Every key available for restore, oldest first for timestamp keys.
    pub async fn list(&self) -> Result<Vec<ObjectKey>, Error> {
        self.store.list().await
    }
}
