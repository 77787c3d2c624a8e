// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use archivist::{Config, ObjectKey, list_archives};

/// Print every stored key, oldest first.
pub async fn list_command(config: &Config) -> archivist::Result<Vec<ObjectKey>> {
    let keys = list_archives(config).await?;

    let count = keys.len();
    diagnostics::log_debug!("{count} archives available", count: count);
    print_keys(&keys);
    Ok(keys)
}

#[allow(clippy::print_stdout)]
fn print_keys(keys: &[ObjectKey]) {
    for key in keys {
        println!("{key}");
    }
}
