// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Restore applier: feeds an archive stream into the restore utility

use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, DEFAULT_RESTORE_PROGRAM};
use crate::error::{Error, FirstError, ProcessFailure};
use crate::process::{kill, tool_command};
use crate::secret::SecretProvider;
use diagnostics::*;

/// Size of each read from the archive stream.
const FEED_CHUNK_SIZE: usize = 256 * 1024;

pub struct RestoreApplier {
    host: String,
    database: String,
    username: String,
    program: String,
    prefix_args: Vec<String>,
    secrets: Arc<dyn SecretProvider>,
}

impl RestoreApplier {
    pub fn new(config: &Config, secrets: Arc<dyn SecretProvider>) -> Self {
        Self {
            host: config.database.host.clone(),
            database: config.database.name.clone(),
            username: config.database.username.clone(),
            program: config.restore.program_or(DEFAULT_RESTORE_PROGRAM).to_string(),
            prefix_args: config.restore.prefix_args.clone(),
            secrets,
        }
    }

    /// Arguments passed after any configured prefix.
    ///
    /// `--exit-on-error` makes the utility stop at the first failing
    /// statement; the database is then left partially restored.
    #[must_use]
    pub fn arguments(&self) -> Vec<String> {
        vec![
            "--no-password".to_string(),
            format!("--host={}", self.host),
            format!("--username={}", self.username),
            format!("--dbname={}", self.database),
            "--exit-on-error".to_string(),
        ]
    }

    /// Replay `input` through the restore utility.
    ///
    /// A failed read of `input` is reported ahead of the utility's exit
    /// status, since truncated input is what makes the utility fail. A broken
    /// pipe on stdin ranks below a non-zero exit, since an early exit is what
    /// breaks the pipe.
    pub async fn apply<R>(&self, mut input: R, cancel: &CancellationToken) -> Result<(), Error>
    where
        R: AsyncRead + Unpin + Send,
    {
        info!(
            "restoring database {database} on {host}",
            database: self.database.as_str(),
            host: self.host.as_str()
        );

        let password = self.secrets.password()?;
        let mut child = {
            let mut command = tool_command(
                &self.program,
                &self.prefix_args,
                &self.arguments(),
                password.as_ref(),
            );
            command
                .stdin(Stdio::piped())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
            command
                .spawn()
                .map_err(|e| self.failure(ProcessFailure::Spawn(e)))?
        };

        let Some(mut stdin) = child.stdin.take() else {
            kill(&mut child).await;
            return Err(self.failure(ProcessFailure::Spawn(std::io::Error::other(
                "stdin of the restore utility was not captured",
            ))));
        };

        let outcome = {
            let feeding = async move {
                let fed = feed(&mut input, &mut stdin).await;
                let flushed = stdin.shutdown().await.map_err(Feed::Write);
                // Dropping stdin closes the pipe, which ends the utility's input.
                drop(stdin);
                fed.and_then(|bytes| flushed.map(|()| bytes))
            };
            let run = async { tokio::join!(feeding, child.wait()) };
            tokio::select! {
                done = run => Some(done),
                () = cancel.cancelled() => None,
            }
        };

        let Some((fed, status)) = outcome else {
            kill(&mut child).await;
            return Err(Error::cancelled(format!(
                "restoring database '{}'",
                self.database
            )));
        };

        let exit = match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(self.failure(ProcessFailure::Exit(status))),
            Err(e) => Err(self.failure(ProcessFailure::Wait(e))),
        };

        let mut errs = FirstError::new();
        match fed {
            Ok(bytes) => {
                debug!("fed {bytes} bytes to {program}", bytes: bytes, program: self.program.as_str());
                errs.record(exit);
            }
            // A closed pipe is the utility going away early; its exit says why.
            Err(Feed::Write(source)) if source.kind() == ErrorKind::BrokenPipe => {
                errs.record(exit);
                errs.record(Err(self.feed_failure(source)));
            }
            // Otherwise the feed failed first. A failed read truncates the
            // input, which is what makes the utility fail.
            Err(Feed::Read(source) | Feed::Write(source)) => {
                errs.record(Err(self.feed_failure(source)));
                errs.record(exit);
            }
        }
        errs.finish(())
    }

    fn feed_failure(&self, source: std::io::Error) -> Error {
        Error::Copy {
            from: "archive stream".to_string(),
            to: format!("{} stdin", self.program),
            source,
        }
    }

    fn failure(&self, source: ProcessFailure) -> Error {
        Error::RestoreProcess {
            database: self.database.clone(),
            program: self.program.clone(),
            source,
        }
    }
}

/// Which side of the stdin feed failed.
enum Feed {
    Read(std::io::Error),
    Write(std::io::Error),
}

/// Copy `input` into `stdin`, keeping read and write failures apart.
async fn feed<R, W>(input: &mut R, stdin: &mut W) -> Result<u64, Feed>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = BytesMut::with_capacity(FEED_CHUNK_SIZE);
    loop {
        buf.reserve(FEED_CHUNK_SIZE);
        let read = input.read_buf(&mut buf).await.map_err(Feed::Read)?;
        if read == 0 {
            return Ok(total);
        }
        total += read as u64;
        stdin.write_all(&buf).await.map_err(Feed::Write)?;
        buf.clear();
    }
}
