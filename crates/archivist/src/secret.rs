// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Database password handed to the dump and restore utilities
//!
//! The pipeline never inspects the password. A [`SecretProvider`] is asked
//! for it right before a child process is spawned, and the value is placed
//! in the child's environment only.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SecretSource;
use crate::error::Error;

/// Environment variable the PostgreSQL client utilities read.
pub const PASSWORD_ENV: &str = "PGPASSWORD";

/// A credential whose `Debug` output never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn new<S: Into<String>>(value: S) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

pub trait SecretProvider: Send + Sync {
    /// The password to pass along, or `None` to pass nothing and let the
    /// utility decide what a missing password means.
    fn password(&self) -> Result<Option<Secret>, Error>;
}

/// Reads the password from this process's environment.
#[derive(Debug, Clone)]
pub struct EnvSecret {
    var: String,
}

impl EnvSecret {
    pub fn new<S: Into<String>>(var: S) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvSecret {
    fn default() -> Self {
        Self::new(PASSWORD_ENV)
    }
}

impl SecretProvider for EnvSecret {
    fn password(&self) -> Result<Option<Secret>, Error> {
        Ok(std::env::var(&self.var).ok().map(Secret))
    }
}

/// Reads the password from a file, e.g. a mounted secret volume.
#[derive(Debug, Clone)]
pub struct FileSecret {
    path: PathBuf,
}

impl FileSecret {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SecretProvider for FileSecret {
    fn password(&self) -> Result<Option<Secret>, Error> {
        let content = std::fs::read_to_string(&self.path).map_err(|source| Error::Secret {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(Secret(content.trim_end_matches(['\r', '\n']).to_string())))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecret;

impl SecretProvider for NoSecret {
    fn password(&self) -> Result<Option<Secret>, Error> {
        Ok(None)
    }
}

/// Build the provider a configuration asks for.
#[must_use]
pub fn provider_for(source: &SecretSource) -> Arc<dyn SecretProvider> {
    match source {
        SecretSource::Env { var } => Arc::new(EnvSecret::new(var.clone())),
        SecretSource::File { path } => Arc::new(FileSecret::new(path)),
        SecretSource::None => Arc::new(NoSecret),
    }
}
