// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Archivist - database archives kept in a blob store
//!
//! An archive run dumps a PostgreSQL database with `pg_dump` into a local
//! staging file and copies that file to a blob store bucket under a key
//! derived from the current UTC time. A restore run streams a stored blob
//! into `pg_restore`.
//!
//! Each run is a linear pipeline of two stages. The first error ends the
//! run and is returned tagged with the stage it came from; errors raised
//! while releasing resources after that are logged and dropped. Every
//! blocking step observes a [`CancellationToken`](tokio_util::sync::CancellationToken).

mod config;
mod dump;
mod error;
mod fetch;
mod key;
mod pipeline;
mod process;
mod restore;
mod secret;
mod store;
mod upload;

pub use config::{
    Config, DEFAULT_DUMP_PROGRAM, DEFAULT_RESTORE_PROGRAM, DEFAULT_USERNAME, DatabaseConfig,
    SecretSource, StagingConfig, StoreBackend, StoreConfig, ToolConfig,
};
pub use dump::{DumpStager, StagingFile};
pub use error::{Error, FirstError, ProcessFailure, Stage};
pub use fetch::BlobFetcher;
pub use key::{Clock, FixedClock, KEY_FORMAT, ObjectKey, SystemClock};
pub use pipeline::{ArchiveState, Archiver, RestoreState, Restorer, list_archives};
pub use restore::RestoreApplier;
pub use secret::{EnvSecret, FileSecret, NoSecret, PASSWORD_ENV, Secret, SecretProvider, provider_for};
pub use store::{BlobReader, BlobStore, BlobWriter, ObjectStoreBlobs};
pub use upload::BlobUploader;

pub type Result<T> = std::result::Result<T, Error>;
