// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::LocalFilesystemPort;

/// The shared filesystem as mounted on this machine.
#[derive(Clone, Default)]
pub struct LocalFilesystem;

impl LocalFilesystem {
    pub fn new() -> Self {
        Self
    }
}

fn fs_error(op: &str, path: &Path, err: std::io::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Internal,
        codes::LOCAL_ERROR,
        format!("failed to {op} {}: {err}", path.display()),
    )
}

#[async_trait]
impl LocalFilesystemPort for LocalFilesystem {
    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "create_dir_all", path = %path.display()))]
    async fn create_dir_all(&self, path: &Path) -> AppResult<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|err| fs_error("create", path, err))
    }

    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "remove_file", path = %path.display()))]
    async fn remove_file(&self, path: &Path) -> AppResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(fs_error("remove", path, err)),
        }
    }

    #[tracing::instrument(name = "fs", level = "debug", skip(self, path, contents), fields(op = "write", path = %path.display()))]
    async fn write(&self, path: &Path, contents: &str) -> AppResult<()> {
        tokio::fs::write(path, contents)
            .await
            .map_err(|err| fs_error("write", path, err))
    }

    #[tracing::instrument(name = "fs", level = "debug", skip(self, path), fields(op = "read_to_string", path = %path.display()))]
    async fn read_to_string(&self, path: &Path) -> AppResult<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(fs_error("read", path, err)),
        }
    }
}
