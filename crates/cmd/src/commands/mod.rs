// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod archive;
pub mod list;
pub mod restore;

pub use archive::archive_command;
pub use list::list_command;
pub use restore::restore_command;
