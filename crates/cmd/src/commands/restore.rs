// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use archivist::{Config, ObjectKey, Restorer};
use tokio_util::sync::CancellationToken;

/// Replay the archive stored under `key` into the configured database.
pub async fn restore_command(
    config: &Config,
    key: &ObjectKey,
    cancel: &CancellationToken,
) -> archivist::Result<()> {
    let restorer = Restorer::from_config(config)?;
    restorer.run(key, cancel).await?;

    let database = config.database.name.as_str();
    diagnostics::log_info!("restored {key} into {database}", key: key.as_str(), database: database);
    Ok(())
}
