// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;

use archivist::ObjectKey;
use clap::{Parser, Subcommand};
use diagnostics::*;
use tokio_util::sync::CancellationToken;

mod commands;
mod config;

use config::ConfigArgs;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "archivist")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the database and store the dump in the bucket
    Archive,
    /// Restore the database from a stored archive
    Restore {
        /// Key of the archive to restore, as printed by `list`
        #[arg(long, value_parser = parse_key)]
        key: ObjectKey,
    },
    /// List stored archives, oldest first
    List,
}

fn parse_key(value: &str) -> Result<ObjectKey, String> {
    ObjectKey::new(value).ok_or_else(|| "key must not be empty".to_string())
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    diagnostics::init();

    let cli = Cli::parse();
    let config = match cli.config.resolve() {
        Ok(config) => config,
        Err(err) => {
            let err = format!("{err:#}");
            error!("{err}", err: err.as_str());
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let result = match &cli.command {
        Commands::Archive => commands::archive_command(&config, &cancel).await.map(drop),
        Commands::Restore { key } => commands::restore_command(&config, key, &cancel).await,
        Commands::List => commands::list_command(&config).await.map(drop),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let err = err.to_string();
            error!("{err}", err: err.as_str());
            ExitCode::FAILURE
        }
    }
}
