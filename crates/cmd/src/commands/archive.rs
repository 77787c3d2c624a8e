// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use archivist::{Archiver, Config, ObjectKey};
use tokio_util::sync::CancellationToken;

/// Dump the configured database and store it, returning the new key.
pub async fn archive_command(
    config: &Config,
    cancel: &CancellationToken,
) -> archivist::Result<ObjectKey> {
    let archiver = Archiver::from_config(config)?;
    let key = archiver.run(cancel).await?;

    let bucket = config.store.bucket.as_str();
    diagnostics::log_info!("archive stored as {key} in {bucket}", key: key.as_str(), bucket: bucket);
    Ok(key)
}
