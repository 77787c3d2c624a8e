// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Archiver and Restorer: the two single-shot pipelines
//!
//! ```text
//! Archiver: Start -> Dumping  -> Uploading -> Done
//! Restorer: Start -> Fetching -> Restoring -> Done
//! ```
//!
//! Any stage failure moves straight to `Failed` with the error tagged by
//! stage. Nothing is retried and nothing already done is rolled back.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dump::DumpStager;
use crate::error::{Error, Stage};
use crate::fetch::BlobFetcher;
use crate::key::{Clock, ObjectKey, SystemClock};
use crate::restore::RestoreApplier;
use crate::secret::{SecretProvider, provider_for};
use crate::store::{BlobStore, ObjectStoreBlobs};
use crate::upload::BlobUploader;
use diagnostics::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Start,
    Dumping,
    Uploading,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Start,
    Fetching,
    Restoring,
    Done,
    Failed,
}

impl fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Current state of one run, logged on every transition.
struct Progress<S> {
    run: &'static str,
    state: S,
}

impl<S: fmt::Display + Copy> Progress<S> {
    fn new(run: &'static str, start: S) -> Self {
        Self { run, state: start }
    }

    fn advance(&mut self, next: S) {
        let from = self.state.to_string();
        let to = next.to_string();
        debug!("{run}: {from} -> {to}", run: self.run, from: from.as_str(), to: to.as_str());
        self.state = next;
    }

    /// Enter `stage_state`, failing early if the run was already cancelled.
    fn enter(&mut self, stage_state: S, stage: Stage, cancel: &CancellationToken) -> Result<(), Error> {
        self.advance(stage_state);
        if cancel.is_cancelled() {
            return Err(Error::cancelled(format!("starting the {stage} stage")).in_stage(stage));
        }
        Ok(())
    }
}

/// Dump a database and store the dump as a blob.
pub struct Archiver {
    stager: DumpStager,
    uploader: BlobUploader,
    retain_staging: bool,
}

impl Archiver {
    pub fn new(
        config: &Config,
        store: Arc<dyn BlobStore>,
        secrets: Arc<dyn SecretProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stager: DumpStager::new(config, secrets),
            uploader: BlobUploader::new(store, clock),
            retain_staging: config.staging.retain,
        }
    }

    /// Validate `config` and build the production collaborators.
    ///
    /// The blob store client is created here, before any dump runs.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        config.validate()?;
        let store = ObjectStoreBlobs::connect(&config.store).map_err(|e| e.in_stage(Stage::Uploading))?;
        Ok(Self::new(
            config,
            Arc::new(store),
            provider_for(&config.database.password),
            Arc::new(SystemClock),
        ))
    }

    /// Run the pipeline once, returning the key of the stored archive.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ObjectKey, Error> {
        let mut progress = Progress::new("archive", ArchiveState::Start);
        let result = self.run_stages(&mut progress, cancel).await;
        progress.advance(if result.is_ok() {
            ArchiveState::Done
        } else {
            ArchiveState::Failed
        });
        result
    }

    async fn run_stages(
        &self,
        progress: &mut Progress<ArchiveState>,
        cancel: &CancellationToken,
    ) -> Result<ObjectKey, Error> {
        progress.enter(ArchiveState::Dumping, Stage::Dumping, cancel)?;
        let staging = self
            .stager
            .stage(cancel)
            .await
            .map_err(|e| e.in_stage(Stage::Dumping))?;

        progress.enter(ArchiveState::Uploading, Stage::Uploading, cancel)?;
        let key = self
            .uploader
            .upload(staging.path(), cancel)
            .await
            .map_err(|e| e.in_stage(Stage::Uploading))?;

        let path = staging.path().display().to_string();
        if self.retain_staging {
            info!("staging file {path} retained", path: path.as_str());
        } else if let Err(err) = staging.remove().await {
            // The archive is stored; a stray staging file does not fail the run.
            let err = err.to_string();
            warn!("unable to remove staging file {path}: {err}", path: path.as_str(), err: err.as_str());
        }
        Ok(key)
    }
}

/// Fetch a stored archive and replay it into a database.
pub struct Restorer {
    fetcher: BlobFetcher,
    applier: RestoreApplier,
}

impl Restorer {
    pub fn new(config: &Config, store: Arc<dyn BlobStore>, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            fetcher: BlobFetcher::new(store),
            applier: RestoreApplier::new(config, secrets),
        }
    }

    /// Validate `config` and build the production collaborators.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        config.validate()?;
        let store = ObjectStoreBlobs::connect(&config.store).map_err(|e| e.in_stage(Stage::Fetching))?;
        Ok(Self::new(
            config,
            Arc::new(store),
            provider_for(&config.database.password),
        ))
    }

    pub async fn run(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<(), Error> {
        let mut progress = Progress::new("restore", RestoreState::Start);
        let result = self.run_stages(key, &mut progress, cancel).await;
        progress.advance(if result.is_ok() {
            RestoreState::Done
        } else {
            RestoreState::Failed
        });
        result
    }

    async fn run_stages(
        &self,
        key: &ObjectKey,
        progress: &mut Progress<RestoreState>,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        progress.enter(RestoreState::Fetching, Stage::Fetching, cancel)?;
        let reader = self
            .fetcher
            .fetch(key, cancel)
            .await
            .map_err(|e| e.in_stage(Stage::Fetching))?;

        progress.enter(RestoreState::Restoring, Stage::Restoring, cancel)?;
        self.applier
            .apply(reader, cancel)
            .await
            .map_err(|e| e.in_stage(Stage::Restoring))
    }

    /// Keys available in the configured bucket.
    pub async fn available(&self) -> Result<Vec<ObjectKey>, Error> {
        self.fetcher.list().await.map_err(|e| e.in_stage(Stage::Fetching))
    }
}

/// Keys stored in the configured bucket, oldest first.
///
/// Only the `store` section is consulted; no database settings are needed.
pub async fn list_archives(config: &Config) -> Result<Vec<ObjectKey>, Error> {
    config.validate_store()?;
    let fetcher = BlobFetcher::connect(&config.store).map_err(|e| e.in_stage(Stage::Fetching))?;
    fetcher.list().await.map_err(|e| e.in_stage(Stage::Fetching))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::NoSecret;
    use object_store::memory::InMemory;

    fn config() -> Config {
        let mut config = Config::default();
        config.database.host = "db1".to_string();
        config.database.name = "app".to_string();
        config.store.bucket = "archives".to_string();
        config
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let config = config();
        let store = Arc::new(ObjectStoreBlobs::new("archives", Arc::new(InMemory::new())));
        let archiver = Archiver::new(&config, store, Arc::new(NoSecret), Arc::new(SystemClock));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = archiver.run(&cancel).await.expect_err("cancelled");
        assert_eq!(err.stage(), Some(Stage::Dumping));
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_from_config_validates() {
        let mut invalid = config();
        invalid.database.name.clear();
        assert!(matches!(Archiver::from_config(&invalid), Err(Error::Config(_))));
        assert!(matches!(Restorer::from_config(&invalid), Err(Error::Config(_))));
    }

    #[test]
    fn test_client_init_is_tagged_with_owning_stage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = config();
        config.store.credentials_path = Some(dir.path().join("missing.json"));

        let err = match Archiver::from_config(&config) {
            Ok(_) => panic!("client should not build"),
            Err(err) => err,
        };
        assert_eq!(err.stage(), Some(Stage::Uploading));
        assert!(matches!(err.root(), Error::ClientInit { .. }));

        let err = match Restorer::from_config(&config) {
            Ok(_) => panic!("client should not build"),
            Err(err) => err,
        };
        assert_eq!(err.stage(), Some(Stage::Fetching));
    }

    #[tokio::test]
    async fn test_list_archives_needs_only_store_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.store.bucket = "archives".to_string();
        config.store.backend = crate::config::StoreBackend::Local {
            root: dir.path().to_path_buf(),
        };
        std::fs::create_dir_all(dir.path().join("archives")).expect("bucket dir");
        std::fs::write(dir.path().join("archives").join("2024-01-01T00:00:00Z"), b"a")
            .expect("seed blob");

        let keys = list_archives(&config).await.expect("list");
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].as_str(), "2024-01-01T00:00:00Z");

        config.store.bucket.clear();
        assert!(matches!(list_archives(&config).await, Err(Error::Config(_))));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(ArchiveState::Uploading.to_string(), "Uploading");
        assert_eq!(RestoreState::Failed.to_string(), "Failed");
    }
}
