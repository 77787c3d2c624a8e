// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use archivist::{Config, StoreBackend};
use clap::Args;

/// Connection and storage flags shared by every subcommand.
///
/// Flags override values loaded from `--config`.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// YAML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database server host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Database name
    #[arg(long, global = true, conflicts_with = "database_path")]
    pub database: Option<String>,

    /// File holding the database name
    #[arg(long, global = true)]
    pub database_path: Option<PathBuf>,

    /// Database user
    #[arg(long, global = true)]
    pub username: Option<String>,

    /// Blob store bucket
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Blob store service account credentials file
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,

    /// Keep blobs under this local directory instead of the cloud bucket
    #[arg(long, global = true)]
    pub local_store: Option<PathBuf>,

    /// Directory for staging files
    #[arg(long, global = true)]
    pub staging_dir: Option<PathBuf>,

    /// Keep the staging file after a successful upload
    #[arg(long, global = true)]
    pub retain_staging: bool,

    /// Dump utility to run
    #[arg(long, global = true)]
    pub dump_program: Option<String>,

    /// Restore utility to run
    #[arg(long, global = true)]
    pub restore_program: Option<String>,
}

/// Read a YAML configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
    serde_yaml_ng::from_str(&content).with_context(|| "Failed to parse YAML configuration")
}

impl ConfigArgs {
    /// Build the run configuration: the file if given, then flag overrides.
    ///
    /// The result is validated by the pipeline constructors.
    pub fn resolve(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => Config::default(),
        };

        if let Some(host) = &self.host {
            config.database.host.clone_from(host);
        }
        if let Some(database) = &self.database {
            config.database.name.clone_from(database);
        }
        if let Some(path) = &self.database_path {
            config.database.name = read_trimmed(path)?;
        }
        if let Some(username) = &self.username {
            config.database.username.clone_from(username);
        }
        if let Some(bucket) = &self.bucket {
            config.store.bucket.clone_from(bucket);
        }
        if let Some(credentials) = &self.credentials {
            config.store.credentials_path = Some(credentials.clone());
        }
        if let Some(root) = &self.local_store {
            config.store.backend = StoreBackend::Local { root: root.clone() };
        }
        if let Some(dir) = &self.staging_dir {
            config.staging.dir = Some(dir.clone());
        }
        if self.retain_staging {
            config.staging.retain = true;
        }
        if let Some(program) = &self.dump_program {
            config.dump.program.clone_from(program);
        }
        if let Some(program) = &self.restore_program {
            config.restore.program.clone_from(program);
        }
        Ok(config)
    }
}

fn read_trimmed(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read database name from {}", path.display()))?;
    Ok(content.trim().to_string())
}
