// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Dump stager: runs the dump utility into a local staging file

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{Config, DEFAULT_DUMP_PROGRAM};
use crate::error::{Error, ProcessFailure};
use crate::process::{Waited, tool_command, wait_or_kill};
use crate::secret::SecretProvider;
use diagnostics::*;

/// A local file holding one complete dump.
///
/// Dropping a `StagingFile` leaves the file on disk; only [`StagingFile::remove`]
/// deletes it.
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(self) -> std::io::Result<()> {
        tokio::fs::remove_file(&self.path).await
    }
}

pub struct DumpStager {
    host: String,
    database: String,
    username: String,
    program: String,
    prefix_args: Vec<String>,
    staging_dir: PathBuf,
    secrets: Arc<dyn SecretProvider>,
}

impl DumpStager {
    pub fn new(config: &Config, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            host: config.database.host.clone(),
            database: config.database.name.clone(),
            username: config.database.username.clone(),
            program: config.dump.program_or(DEFAULT_DUMP_PROGRAM).to_string(),
            prefix_args: config.dump.prefix_args.clone(),
            staging_dir: config.staging.dir_or_default(),
            secrets,
        }
    }

    /// Arguments passed after any configured prefix.
    #[must_use]
    pub fn arguments(&self) -> Vec<String> {
        vec![
            "--format=custom".to_string(),
            "--no-password".to_string(),
            format!("--host={}", self.host),
            format!("--username={}", self.username),
            format!("--dbname={}", self.database),
        ]
    }

    /// Dump the database into a fresh staging file.
    ///
    /// On failure the staging file, possibly partial, is left in place and its
    /// path is logged.
    pub async fn stage(&self, cancel: &CancellationToken) -> Result<StagingFile, Error> {
        let (file, path) = tempfile::Builder::new()
            .prefix("archivist-")
            .suffix(".dump")
            .tempfile_in(&self.staging_dir)
            .and_then(|staging| staging.keep().map_err(|e| e.error))
            .map_err(|source| Error::StagingCreate {
                dir: self.staging_dir.clone(),
                source,
            })?;

        let staging = path.display().to_string();
        info!(
            "dumping database {database} on {host} into {staging}",
            database: self.database.as_str(),
            host: self.host.as_str(),
            staging: staging.as_str()
        );

        let password = self.secrets.password().inspect_err(|_| retained(&staging))?;
        let mut child = {
            let mut command = tool_command(
                &self.program,
                &self.prefix_args,
                &self.arguments(),
                password.as_ref(),
            );
            command
                .stdin(Stdio::null())
                .stdout(Stdio::from(file))
                .stderr(Stdio::inherit());
            // The command owns our handle on the staging file; it is closed
            // when the command goes out of scope, whether or not spawn worked.
            command.spawn().map_err(|e| self.failure(ProcessFailure::Spawn(e)))
        }
        .inspect_err(|_| retained(&staging))?;

        let outcome = match wait_or_kill(&mut child, cancel).await {
            Waited::Exited(Ok(status)) if status.success() => Ok(StagingFile { path }),
            Waited::Exited(Ok(status)) => Err(self.failure(ProcessFailure::Exit(status))),
            Waited::Exited(Err(e)) => Err(self.failure(ProcessFailure::Wait(e))),
            Waited::Cancelled => Err(Error::cancelled(format!(
                "dumping database '{}'",
                self.database
            ))),
        };

        match &outcome {
            Ok(_) => {
                debug!("dump of {database} complete", database: self.database.as_str());
            }
            Err(_) => retained(&staging),
        }
        outcome
    }

    fn failure(&self, source: ProcessFailure) -> Error {
        Error::DumpProcess {
            database: self.database.clone(),
            program: self.program.clone(),
            source,
        }
    }
}

fn retained(staging: &str) {
    warn!("staging file {staging} retained for inspection", staging: staging);
}
