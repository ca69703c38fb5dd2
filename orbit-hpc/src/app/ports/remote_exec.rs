// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[derive(Debug, Clone)]
pub struct ExecCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

#[async_trait]
/// One live command channel to a remote host.
/// `Err` means the transport broke; a non-zero exit code is a normal result.
pub trait RemoteExecPort: Send + Sync {
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture>;

    fn is_connected(&self) -> bool;

    async fn shutdown(&self);

    /// `user@host` label used when reporting commands.
    fn target(&self) -> String;
}

#[async_trait]
/// Transport construction boundary: opens a fresh connection to `host`.
pub trait ConnectorPort: Send + Sync {
    async fn connect(&self, host: &str) -> AppResult<Arc<dyn RemoteExecPort>>;
}
