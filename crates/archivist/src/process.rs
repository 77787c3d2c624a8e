// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Spawning and waiting on the external database utilities

use std::process::ExitStatus;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::secret::{PASSWORD_ENV, Secret};
use diagnostics::*;

/// Result of waiting on a child that may be cancelled.
#[derive(Debug)]
pub(crate) enum Waited {
    Exited(std::io::Result<ExitStatus>),
    /// The token fired; the child has been killed and reaped.
    Cancelled,
}

/// Build a command for `program`, with `prefix_args` ahead of `args`.
///
/// The password, if any, only ever travels through the child's environment.
/// With no password the child's `PGPASSWORD` is cleared, not inherited.
pub(crate) fn tool_command(
    program: &str,
    prefix_args: &[String],
    args: &[String],
    password: Option<&Secret>,
) -> Command {
    let mut command = Command::new(program);
    command.args(prefix_args).args(args).kill_on_drop(true);
    match password {
        Some(password) => command.env(PASSWORD_ENV, password.expose()),
        // Without a secret the child must not pick one up from our environment.
        None => command.env_remove(PASSWORD_ENV),
    };
    let rendered = prefix_args
        .iter()
        .chain(args)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    debug!("prepared {program} {rendered}", program: program, rendered: rendered.as_str());
    command
}

/// Wait for `child` to exit, killing it if `cancel` fires first.
pub(crate) async fn wait_or_kill(child: &mut Child, cancel: &CancellationToken) -> Waited {
    tokio::select! {
        status = child.wait() => Waited::Exited(status),
        () = cancel.cancelled() => {
            kill(child).await;
            Waited::Cancelled
        }
    }
}

/// Kill and reap `child`. Failures are logged; the child is already abandoned.
pub(crate) async fn kill(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        let err = err.to_string();
        warn!("unable to signal child process: {err}", err: err.as_str());
        return;
    }
    if let Err(err) = child.wait().await {
        let err = err.to_string();
        warn!("unable to reap killed child process: {err}", err: err.as_str());
    }
}
