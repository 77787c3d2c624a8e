// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for archive and restore runs

use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

use diagnostics::*;

/// Pipeline stage that an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dumping,
    Uploading,
    Fetching,
    Restoring,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Dumping => "dump",
            Stage::Uploading => "upload",
            Stage::Fetching => "fetch",
            Stage::Restoring => "restore",
        };
        f.write_str(name)
    }
}

/// Why an external utility did not complete successfully.
#[derive(Debug, Error)]
pub enum ProcessFailure {
    #[error("could not be started: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("could not be waited on: {0}")]
    Wait(#[source] std::io::Error),

    #[error("exited unsuccessfully ({0})")]
    Exit(ExitStatus),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unable to create a staging file in {}: {source}", dir.display())]
    StagingCreate {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to dump database '{database}' with {program}: {source}")]
    DumpProcess {
        database: String,
        program: String,
        #[source]
        source: ProcessFailure,
    },

    #[error("unable to create a blob store client for bucket '{bucket}': {source}")]
    ClientInit {
        bucket: String,
        #[source]
        source: object_store::Error,
    },

    #[error("unable to open the staging file at {}: {source}", path.display())]
    StagingRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to open a writer for '{key}' in bucket '{bucket}': {source}")]
    WriterOpen {
        bucket: String,
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("unable to copy from {from} to {to}: {source}")]
    Copy {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to finalize {what}: {source}")]
    Finalize {
        what: String,
        #[source]
        source: std::io::Error,
    },

    #[error("object '{key}' does not exist in bucket '{bucket}'")]
    ObjectNotFound { bucket: String, key: String },

    #[error("unable to create a reader for '{key}' in bucket '{bucket}': {source}")]
    ReaderOpen {
        bucket: String,
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("unable to check whether '{key}' exists in bucket '{bucket}': {source}")]
    Lookup {
        bucket: String,
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("object '{key}' already exists in bucket '{bucket}'; refusing to overwrite")]
    ObjectExists { bucket: String, key: String },

    #[error("unable to list objects in bucket '{bucket}': {source}")]
    List {
        bucket: String,
        #[source]
        source: object_store::Error,
    },

    #[error("unable to restore database '{database}' with {program}: {source}")]
    RestoreProcess {
        database: String,
        program: String,
        #[source]
        source: ProcessFailure,
    },

    #[error("cancelled while {during}")]
    Cancelled { during: String },

    #[error("unable to read the database password from {}: {source}", path.display())]
    Secret {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn cancelled<S: Into<String>>(during: S) -> Self {
        Error::Cancelled {
            during: during.into(),
        }
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Tag this error with the stage it escaped from.
    #[must_use]
    pub fn in_stage(self, stage: Stage) -> Self {
        Error::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// The leaf cause beneath any stage tags.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The outermost stage tag, if any.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled { .. })
    }
}

/// Keeps the first error out of a sequence of fallible steps.
///
/// Release steps (finalize, close, remove) run on every exit path; an error
/// from a later step never replaces one that was already recorded. Later
/// errors are logged and dropped.
#[derive(Debug, Default)]
pub struct FirstError {
    first: Option<Error>,
}

impl FirstError {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: Result<(), Error>) {
        if let Err(err) = result {
            if self.first.is_none() {
                self.first = Some(err);
            } else {
                let discarded = err.to_string();
                warn!("discarding subsequent error: {discarded}", discarded: discarded.as_str());
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// `Ok(value)` unless an error was recorded.
    pub fn finish<T>(self, value: T) -> Result<T, Error> {
        match self.first {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }
}
