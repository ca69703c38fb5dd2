// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[async_trait]
/// Filesystem shared with the cluster.
/// Scripts written here must become visible on the compute side.
pub trait LocalFilesystemPort: Send + Sync {
    async fn create_dir_all(&self, path: &Path) -> AppResult<()>;
    /// Removing a missing file is not an error.
    async fn remove_file(&self, path: &Path) -> AppResult<()>;
    async fn write(&self, path: &Path, contents: &str) -> AppResult<()>;
    /// Returns `None` when the file does not exist (yet).
    async fn read_to_string(&self, path: &Path) -> AppResult<Option<String>>;
}
