// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Run configuration
//!
//! A [`Config`] is assembled once at process start (from a YAML file and/or
//! command line flags) and handed by reference to the pipeline constructors.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::secret::PASSWORD_ENV;

/// Role used for both dumping and restoring unless configured otherwise.
pub const DEFAULT_USERNAME: &str = "backup";
pub const DEFAULT_DUMP_PROGRAM: &str = "pg_dump";
pub const DEFAULT_RESTORE_PROGRAM: &str = "pg_restore";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub dump: ToolConfig,
    pub restore: ToolConfig,
    pub staging: StagingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub name: String,
    pub username: String,
    pub password: SecretSource,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            name: String::new(),
            username: DEFAULT_USERNAME.to_string(),
            password: SecretSource::default(),
        }
    }
}

/// Where the database password comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "lowercase")]
pub enum SecretSource {
    Env { var: String },
    File { path: PathBuf },
    None,
}

impl Default for SecretSource {
    fn default() -> Self {
        SecretSource::Env {
            var: PASSWORD_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub bucket: String,
    /// Service account file for the cloud backend.
    pub credentials_path: Option<PathBuf>,
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreBackend {
    /// Google Cloud Storage
    #[default]
    Gcs,
    /// Buckets are subdirectories of `root`.
    Local { root: PathBuf },
    /// Process-local, for tests and dry runs.
    Memory,
}

/// An external utility and the arguments placed before the pipeline's own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Empty means the stage's default program.
    pub program: String,
    pub prefix_args: Vec<String>,
}

impl ToolConfig {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_prefix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn program_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.program.is_empty() {
            default
        } else {
            &self.program
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Directory for staging files; the OS temp dir when unset.
    pub dir: Option<PathBuf>,
    /// Keep the staging file after a successful upload.
    pub retain: bool,
}

impl StagingConfig {
    #[must_use]
    pub fn dir_or_default(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Config {
    /// Check the fields both archive and restore runs rely on.
    pub fn validate(&self) -> Result<(), Error> {
        self.validate_database()?;
        self.validate_store()
    }

    fn validate_database(&self) -> Result<(), Error> {
        require("database.host", &self.database.host)?;
        require("database.name", &self.database.name)?;
        require("database.username", &self.database.username)?;
        if let SecretSource::Env { var } = &self.database.password {
            require("database.password.var", var)?;
        }
        Ok(())
    }

    /// Check only the `store` section, for runs that never touch the database.
    pub fn validate_store(&self) -> Result<(), Error> {
        require("store.bucket", &self.store.bucket)?;
        if self.store.bucket.contains('/') {
            return Err(Error::config("store.bucket must not contain '/'"));
        }
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        Err(Error::config(format!("{field} is required")))
    } else {
        Ok(())
    }
}
