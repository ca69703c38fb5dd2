// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Transport for running directly on a login node: every command goes to a
//! local `sh -c`.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ConnectorPort, ExecCapture, RemoteExecPort};

/// Exit code used when the shell was terminated by a signal.
const SIGNALLED_EXIT: i32 = 255;

#[derive(Clone, Default)]
pub struct LocalShellConnector;

impl LocalShellConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectorPort for LocalShellConnector {
    async fn connect(&self, host: &str) -> AppResult<Arc<dyn RemoteExecPort>> {
        Ok(Arc::new(LocalShellSession {
            label: host.to_string(),
        }))
    }
}

pub struct LocalShellSession {
    label: String,
}

#[async_trait]
impl RemoteExecPort for LocalShellSession {
    #[tracing::instrument(name = "shell", level = "debug", skip(self, command), fields(op = "exec_capture"))]
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                AppError::with_message(
                    AppErrorKind::Aborted,
                    codes::CONNECTION_FAILURE,
                    format!("failed to spawn sh: {err}"),
                )
            })?;
        Ok(ExecCapture {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code().unwrap_or(SIGNALLED_EXIT),
        })
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn shutdown(&self) {}

    fn target(&self) -> String {
        let user = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
        format!("{user}@{}", self.label)
    }
}
